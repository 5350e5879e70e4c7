//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Instant;

use chrono::Utc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing for tests; only the first call installs a subscriber.
///
/// Uses `RUST_LOG` if set, otherwise `info,graphql_link=debug`.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,graphql_link=debug"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_ansi(false)
                    .compact(),
            )
            .try_init();
    });
}

pub struct TestContext {
    test_name: String,
    module: String,
    correlation_id: String,
    start_time: Instant,
    assertions_passed: u32,
    assertions_failed: u32,
}

impl TestContext {
    pub fn new(module: &str, test_name: &str) -> Self {
        init_test_tracing();
        Self {
            test_name: test_name.to_string(),
            module: format!("graphql-link::{module}"),
            correlation_id: format!("graphql-link-{}", std::process::id()),
            start_time: Instant::now(),
            assertions_passed: 0,
            assertions_failed: 0,
        }
    }

    pub fn assert_true(&mut self, condition: bool, msg: &str) {
        if condition {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
            panic!("{}", msg);
        }
    }

    pub fn assert_eq<T: std::fmt::Debug + PartialEq>(&mut self, actual: T, expected: T, msg: &str) {
        if actual == expected {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
            panic!("{msg}: expected {expected:?}, got {actual:?}");
        }
    }

    pub fn finalize(&self, result: &str, details: Option<serde_json::Value>) {
        let duration_ms = u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": "info",
            "test_name": self.test_name,
            "module": self.module,
            "phase": "verify",
            "correlation_id": self.correlation_id,
            "result": result,
            "duration_ms": duration_ms,
            "assertions": {
                "passed": self.assertions_passed,
                "failed": self.assertions_failed
            }
        });

        if let Some(extra) = details {
            entry["details"] = extra;
        }

        assert!(entry.is_object(), "structured test log entry");
        eprintln!(
            "{}",
            serde_json::to_string(&entry).expect("structured test log entry")
        );
    }
}
