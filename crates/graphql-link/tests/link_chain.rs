mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde_json::json;

use common::TestContext;
use graphql_link::{
    DEDUP_DISABLED_KEY, DedupLink, ErrorHandler, ErrorInterceptLink, ExponentialBackoff,
    GraphqlError, GraphqlQuery, GraphqlResponse, InterceptAction, InterceptedErrors, LinkChain,
    NetworkError, Operation, RETRY_ATTEMPT_KEY, RetryLink, RetryPolicy, TransportErrorInfo,
    transport_fn,
};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5)),
        ..RetryPolicy::default()
    }
}

fn query() -> Operation {
    Operation::new(GraphqlQuery::new("query Viewer { viewer { id } }"))
        .with_operation_name("Viewer")
}

struct AlwaysRetry {
    calls: Arc<AtomicUsize>,
    action: InterceptAction,
}

#[async_trait]
impl ErrorHandler for AlwaysRetry {
    async fn on_error(
        &self,
        operation: &mut Operation,
        _errors: InterceptedErrors<'_>,
    ) -> InterceptAction {
        self.calls.fetch_add(1, Ordering::SeqCst);
        operation.context_mut().insert("handled", true);
        self.action
    }
}

#[tokio::test]
async fn retry_exhaustion_surfaces_last_error() {
    let mut ctx = TestContext::new("link_chain", "retry_exhaustion_surfaces_last_error");
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&attempts);

    let chain = LinkChain::builder()
        .link(RetryLink::new(fast_retry(3)))
        .transport(transport_fn(move |op: Operation| {
            let seen = Arc::clone(&seen);
            async move {
                let attempt = op.context().get_as::<u32>(RETRY_ATTEMPT_KEY).unwrap_or(0);
                seen.lock().expect("attempts").push(attempt);
                Err::<GraphqlResponse, _>(NetworkError::Transport(TransportErrorInfo::connect(
                    format!("refused {attempt}"),
                )))
            }
        }))
        .build()
        .expect("chain");

    let err = chain.execute(query()).await.expect_err("exhausted");

    ctx.assert_eq(
        attempts.lock().expect("attempts").clone(),
        vec![1, 2, 3],
        "attempt numbers",
    );
    ctx.assert_true(
        matches!(&err, NetworkError::Transport(info) if info.message == "refused 3"),
        "last error surfaced",
    );
    ctx.finalize("pass", Some(json!({"attempts": 3})));
}

#[tokio::test]
async fn retry_skips_non_retryable_errors() {
    let mut ctx = TestContext::new("link_chain", "retry_skips_non_retryable_errors");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let chain = LinkChain::builder()
        .link(RetryLink::new(fast_retry(5)))
        .transport(transport_fn(move |_op| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<GraphqlResponse, _>(NetworkError::Protocol {
                    message: "response has neither data nor errors".to_string(),
                })
            }
        }))
        .build()
        .expect("chain");

    let err = chain.execute(query()).await.expect_err("protocol error");
    ctx.assert_true(matches!(err, NetworkError::Protocol { .. }), "protocol error");
    ctx.assert_eq(calls.load(Ordering::SeqCst), 1, "no retry");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn retry_predicate_overrides_classification() {
    let mut ctx = TestContext::new("link_chain", "retry_predicate_overrides_classification");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let chain = LinkChain::builder()
        .link(
            RetryLink::new(fast_retry(3))
                .retry_if(|err, _op, _attempt| matches!(err, NetworkError::Protocol { .. })),
        )
        .transport(transport_fn(move |_op| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<GraphqlResponse, _>(NetworkError::Protocol {
                    message: "flaky".to_string(),
                })
            }
        }))
        .build()
        .expect("chain");

    chain.execute(query()).await.expect_err("still failing");
    ctx.assert_eq(calls.load(Ordering::SeqCst), 3, "predicate retried");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn retry_graphql_errors_when_enabled() {
    let mut ctx = TestContext::new("link_chain", "retry_graphql_errors_when_enabled");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let chain = LinkChain::builder()
        .link(RetryLink::new(RetryPolicy {
            retry_graphql_errors: true,
            ..fast_retry(3)
        }))
        .transport(transport_fn(move |_op| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Ok::<_, NetworkError>(GraphqlResponse::from_errors(vec![
                        GraphqlError::new("resolver timed out").with_code("TIMEOUT"),
                    ]))
                } else {
                    Ok(GraphqlResponse::from_data(json!({ "viewer": { "id": "1" } })))
                }
            }
        }))
        .build()
        .expect("chain");

    let response = chain.execute(query()).await.expect("response");
    ctx.assert_true(response.is_ok(), "second attempt clean");
    ctx.assert_eq(calls.load(Ordering::SeqCst), 2, "one retry");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn intercept_reissues_at_most_once() {
    let mut ctx = TestContext::new("link_chain", "intercept_reissues_at_most_once");
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let intercept = ErrorInterceptLink::new(AlwaysRetry {
        calls: Arc::clone(&handler_calls),
        action: InterceptAction::Retry,
    });
    let marker = intercept.marker().to_string();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);

    let chain = LinkChain::builder()
        .link(intercept)
        .link(RetryLink::new(fast_retry(2)))
        .transport(transport_fn(move |op: Operation| {
            let record = Arc::clone(&record);
            let marker = marker.clone();
            async move {
                record.lock().expect("seen").push((
                    op.context().contains_key(&marker),
                    op.context().contains_key("handled"),
                ));
                Err::<GraphqlResponse, _>(NetworkError::Transport(TransportErrorInfo::timeout(
                    "timed out",
                )))
            }
        }))
        .build()
        .expect("chain");

    chain.execute(query()).await.expect_err("persistent failure");

    ctx.assert_eq(handler_calls.load(Ordering::SeqCst), 1, "handler ran once");
    ctx.assert_eq(
        seen.lock().expect("seen").clone(),
        vec![(false, false), (false, false), (true, true), (true, true)],
        "two retried passes, the second re-issued and edited",
    );
    ctx.finalize("pass", Some(json!({"transport_calls": 4})));
}

#[tokio::test]
async fn intercept_pass_through_returns_original_outcome() {
    let mut ctx = TestContext::new("link_chain", "intercept_pass_through_returns_original_outcome");
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let transport_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&transport_calls);

    let chain = LinkChain::builder()
        .link(ErrorInterceptLink::new(AlwaysRetry {
            calls: Arc::clone(&handler_calls),
            action: InterceptAction::PassThrough,
        }))
        .transport(transport_fn(move |_op| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Ok::<_, NetworkError>(
                    GraphqlResponse::from_data(json!({ "viewer": null }))
                        .with_errors(vec![GraphqlError::new("forbidden").with_code("FORBIDDEN")]),
                )
            }
        }))
        .build()
        .expect("chain");

    let response = chain.execute(query()).await.expect("response");
    ctx.assert_eq(
        response.errors[0].extension_code(),
        Some("FORBIDDEN"),
        "original errors",
    );
    ctx.assert_eq(handler_calls.load(Ordering::SeqCst), 1, "handler consulted");
    ctx.assert_eq(transport_calls.load(Ordering::SeqCst), 1, "not re-issued");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn intercept_skips_success_and_cancellation() {
    let mut ctx = TestContext::new("link_chain", "intercept_skips_success_and_cancellation");
    let handler_calls = Arc::new(AtomicUsize::new(0));

    let chain = LinkChain::builder()
        .link(ErrorInterceptLink::new(AlwaysRetry {
            calls: Arc::clone(&handler_calls),
            action: InterceptAction::Retry,
        }))
        .transport(transport_fn(|op: Operation| async move {
            if op.operation_name() == Some("Cancel") {
                Err(NetworkError::Cancelled)
            } else {
                Ok(GraphqlResponse::from_data(json!({ "ok": true })))
            }
        }))
        .build()
        .expect("chain");

    chain.execute(query()).await.expect("success");
    let err = chain
        .execute(query().with_operation_name("Cancel"))
        .await
        .expect_err("cancelled");

    ctx.assert_true(err.is_cancelled(), "cancellation surfaced");
    ctx.assert_eq(handler_calls.load(Ordering::SeqCst), 0, "handler never ran");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn dedup_only_joins_idempotent_operations() {
    let mut ctx = TestContext::new("link_chain", "dedup_only_joins_idempotent_operations");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let dedup = DedupLink::new();

    let chain = LinkChain::builder()
        .link(dedup.clone())
        .transport(transport_fn(move |_op| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, NetworkError>(GraphqlResponse::from_data(json!({ "ok": true })))
            }
        }))
        .build()
        .expect("chain");

    let (a, b) = tokio::join!(chain.execute(query()), chain.execute(query()));
    a.expect("a");
    b.expect("b");
    ctx.assert_eq(calls.load(Ordering::SeqCst), 1, "queries joined");
    ctx.assert_eq(dedup.in_flight(), 0, "map drained");

    let mutation = || Operation::new(GraphqlQuery::new("mutation Touch { touch }"));
    let (a, b) = tokio::join!(chain.execute(mutation()), chain.execute(mutation()));
    a.expect("a");
    b.expect("b");
    ctx.assert_eq(calls.load(Ordering::SeqCst), 3, "mutations never joined");

    let opted_out = || {
        let mut op = query();
        op.context_mut().insert(DEDUP_DISABLED_KEY, true);
        op
    };
    let (a, b) = tokio::join!(chain.execute(opted_out()), chain.execute(opted_out()));
    a.expect("a");
    b.expect("b");
    ctx.assert_eq(calls.load(Ordering::SeqCst), 5, "opt-out honored");
    ctx.finalize("pass", None);
}

#[tokio::test]
async fn dedup_keeps_tenants_apart() {
    let mut ctx = TestContext::new("link_chain", "dedup_keeps_tenants_apart");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let chain = LinkChain::builder()
        .link(DedupLink::new())
        .transport(transport_fn(move |op: Operation| {
            counter.fetch_add(1, Ordering::SeqCst);
            let tenant = op
                .context()
                .headers()
                .get("x-tenant")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, NetworkError>(GraphqlResponse::from_data(json!({ "tenant": tenant })))
            }
        }))
        .build()
        .expect("chain");

    let for_tenant = |tenant: &'static str| {
        let mut op = Operation::new(GraphqlQuery::new("{ me { id } }"));
        op.context_mut().set_header(
            "x-tenant".parse().expect("header name"),
            HeaderValue::from_static(tenant),
        );
        op
    };
    let (acme, globex) = tokio::join!(
        chain.execute(for_tenant("acme")),
        chain.execute(for_tenant("globex")),
    );

    ctx.assert_eq(
        acme.expect("acme").data,
        Some(json!({ "tenant": "acme" })),
        "acme answered for acme",
    );
    ctx.assert_eq(
        globex.expect("globex").data,
        Some(json!({ "tenant": "globex" })),
        "globex answered for globex",
    );
    ctx.assert_eq(calls.load(Ordering::SeqCst), 2, "one pass per tenant");
    ctx.finalize("pass", None);
}
