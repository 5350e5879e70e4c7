//! Structured logging of operations passing through the chain.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, Level, debug, info_span, warn};

use crate::link::{Forward, Link, LinkResult};
use crate::operation::Operation;

/// Emits one `tracing` event per operation outcome, inside an
/// `graphql_operation` span.
#[derive(Debug, Clone, Copy)]
pub struct TracingLink {
    error_level: Level,
}

impl TracingLink {
    /// Log failures at `WARN`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            error_level: Level::WARN,
        }
    }

    /// Log failures at `DEBUG` instead, for expected errors.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            error_level: Level::DEBUG,
        }
    }
}

impl Default for TracingLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Link for TracingLink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn request(&self, operation: Operation, forward: Forward) -> LinkResult {
        let span = info_span!(
            "graphql_operation",
            operation = operation.display_name(),
            idempotent = operation.is_idempotent(),
        );
        let warn_on_error = self.error_level == Level::WARN;

        async move {
            let started = Instant::now();
            let outcome = forward.run(operation).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &outcome {
                Ok(response) if response.is_ok() => {
                    debug!(elapsed_ms, "GraphQL operation succeeded");
                }
                Ok(response) => {
                    let codes: Vec<&str> = response
                        .errors
                        .iter()
                        .filter_map(|err| err.extension_code())
                        .collect();
                    if warn_on_error {
                        warn!(
                            elapsed_ms,
                            errors = response.errors.len(),
                            codes = ?codes,
                            partial_data = response.data.is_some(),
                            "GraphQL operation returned errors"
                        );
                    } else {
                        debug!(
                            elapsed_ms,
                            errors = response.errors.len(),
                            codes = ?codes,
                            partial_data = response.data.is_some(),
                            "GraphQL operation returned errors"
                        );
                    }
                }
                Err(err) => {
                    if warn_on_error {
                        warn!(elapsed_ms, error = %err, "GraphQL operation failed in transport");
                    } else {
                        debug!(elapsed_ms, error = %err, "GraphQL operation failed in transport");
                    }
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
