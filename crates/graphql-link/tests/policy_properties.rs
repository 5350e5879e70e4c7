//! Property-based tests for error policy resolution and response
//! classification.
//!
//! ## Test Categories
//! 1. **Clean responses**: every policy returns the data untouched
//! 2. **Policy semantics**: `none` drops data, `ignore` drops errors, `all` keeps both
//! 3. **Purity**: resolving the same response twice gives the same result
//! 4. **Classification**: non-2xx statuses are always network errors

use std::time::Instant;

use graphql_link::{ErrorPolicy, GraphqlError, GraphqlResponse, NetworkError, classify, resolve};
use proptest::prelude::*;
use reqwest::StatusCode;
use serde_json::{Value, json};

/// Emit structured JSON log for test results.
fn log_test_result(test_name: &str, details: Value, timing_us: u64) {
    let log_entry = json!({
        "test": test_name,
        "phase": "verify",
        "timing_us": timing_us,
        "result": "success",
        "details": details
    });
    eprintln!("{log_entry}");
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Proptest Strategies
// ─────────────────────────────────────────────────────────────────────────────

fn policy() -> impl Strategy<Value = ErrorPolicy> {
    prop_oneof![
        Just(ErrorPolicy::None),
        Just(ErrorPolicy::Ignore),
        Just(ErrorPolicy::All),
    ]
}

fn data() -> impl Strategy<Value = Option<Value>> {
    prop::option::of(
        prop::collection::btree_map("[a-z]{1,8}", prop::option::of(any::<i64>()), 0..4).prop_map(
            |fields| {
                let map: serde_json::Map<String, Value> = fields
                    .into_iter()
                    .map(|(key, value)| (key, value.map_or(Value::Null, Value::from)))
                    .collect();
                Value::Object(map)
            },
        ),
    )
}

fn graphql_error() -> impl Strategy<Value = GraphqlError> {
    ("[ -~]{1,32}", prop::option::of("[A-Z_]{3,16}")).prop_map(|(message, code)| {
        let err = GraphqlError::new(message);
        match code {
            Some(code) => err.with_code(code),
            None => err,
        }
    })
}

fn errors(min: usize) -> impl Strategy<Value = Vec<GraphqlError>> {
    prop::collection::vec(graphql_error(), min..4)
}

fn response(data: Option<Value>, errors: Vec<GraphqlError>) -> GraphqlResponse {
    GraphqlResponse {
        data,
        errors,
        extensions: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property Tests: Policy Resolution
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Without GraphQL errors the policy is irrelevant.
    #[test]
    fn prop_clean_response_is_policy_independent(policy in policy(), data in data()) {
        let start = Instant::now();
        let result = resolve(policy, response(data.clone(), Vec::new()));

        prop_assert_eq!(result.data, data);
        prop_assert!(result.graphql_errors.is_empty());
        prop_assert!(result.network_error.is_none());
        log_test_result(
            "prop_clean_response_is_policy_independent",
            json!({ "policy": policy.as_str() }),
            elapsed_us(start),
        );
    }

    /// `none` never yields data alongside errors.
    #[test]
    fn prop_none_discards_data(data in data(), errors in errors(1)) {
        let result = resolve(ErrorPolicy::None, response(data, errors.clone()));

        prop_assert!(result.data.is_none());
        prop_assert_eq!(result.graphql_errors, errors);
    }

    /// `ignore` never yields errors and keeps data as received.
    #[test]
    fn prop_ignore_drops_errors(data in data(), errors in errors(0)) {
        let result = resolve(ErrorPolicy::Ignore, response(data.clone(), errors));

        prop_assert_eq!(result.data, data);
        prop_assert!(result.graphql_errors.is_empty());
    }

    /// `all` surfaces exactly what the server sent.
    #[test]
    fn prop_all_is_exact(data in data(), errors in errors(0)) {
        let result = resolve(ErrorPolicy::All, response(data.clone(), errors.clone()));

        prop_assert_eq!(result.data, data);
        prop_assert_eq!(result.graphql_errors, errors);
    }

    /// Resolution is a pure function of policy and response.
    #[test]
    fn prop_resolution_is_deterministic(
        policy in policy(),
        data in data(),
        errors in errors(0),
    ) {
        let input = response(data, errors);
        let first = resolve(policy, input.clone());
        let second = resolve(policy, input);

        prop_assert_eq!(first.data, second.data);
        prop_assert_eq!(first.graphql_errors, second.graphql_errors);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property Tests: Classification
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A non-2xx status is a network error whatever the body says.
    #[test]
    fn prop_non_success_status_is_network_error(
        code in prop_oneof![300u16..400, 400u16..500, 500u16..600],
        data in data(),
        errors in errors(0),
    ) {
        let status = StatusCode::from_u16(code).expect("valid status");
        let body = serde_json::to_vec(&response(data, errors)).expect("serialize body");

        let outcome = classify(status, &body, None);
        let is_http_status = matches!(
            outcome,
            Err(NetworkError::HttpStatus { status: got, .. }) if got == status
        );
        prop_assert!(is_http_status);
    }

    /// A 200 with data or errors always classifies as a response.
    #[test]
    fn prop_success_with_payload_is_response(data in data(), errors in errors(0)) {
        prop_assume!(data.is_some() || !errors.is_empty());
        let body = serde_json::to_vec(&response(data.clone(), errors.clone()))
            .expect("serialize body");

        let classified = classify(StatusCode::OK, &body, None).expect("response");
        prop_assert_eq!(classified.data, data);
        prop_assert_eq!(classified.errors, errors);
    }
}
