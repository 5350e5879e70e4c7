//! In-flight deduplication of identical idempotent operations.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::link::{Forward, Link, LinkResult};
use crate::operation::Operation;

/// Context key that opts an operation out of deduplication.
pub const DEDUP_DISABLED_KEY: &str = "graphql_link.dedup.disabled";

type SharedOutcome = Shared<BoxFuture<'static, LinkResult>>;
type InFlight = Arc<Mutex<HashMap<u64, SharedOutcome>>>;

/// Shares one downstream pass between concurrent identical operations.
///
/// Operations are identical when their query, variables, operation name and
/// every context header (`Authorization`, tenant headers, ...) match. Header
/// names are compared sorted and values byte for byte. Mutations and
/// operations carrying [`DEDUP_DISABLED_KEY`] are never deduplicated.
#[derive(Debug, Clone, Default)]
pub struct DedupLink {
    inflight: InFlight,
}

impl DedupLink {
    /// Empty dedup link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct operations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map_or(0, |guard| guard.len())
    }
}

struct RemoveOnDrop {
    inflight: InFlight,
    key: u64,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.inflight.lock() {
            guard.remove(&self.key);
        }
    }
}

#[async_trait]
impl Link for DedupLink {
    fn name(&self) -> &str {
        "dedup"
    }

    async fn request(&self, operation: Operation, forward: Forward) -> LinkResult {
        if !operation.is_idempotent() || operation.context().contains_key(DEDUP_DISABLED_KEY) {
            return forward.run(operation).await;
        }

        let key = dedup_key(&operation);
        let name = operation.display_name().to_string();
        let slot = match self.inflight.lock() {
            Ok(mut guard) => {
                if let Some(existing) = guard.get(&key).cloned() {
                    Slot::Join(existing)
                } else {
                    let shared = async move { forward.run(operation).await }
                        .boxed()
                        .shared();
                    guard.insert(key, shared.clone());
                    Slot::Lead(shared)
                }
            }
            Err(_) => Slot::Bypass(operation, forward),
        };

        match slot {
            Slot::Join(existing) => {
                debug!(operation = %name, "joining in-flight GraphQL operation");
                existing.await
            }
            Slot::Lead(shared) => {
                let _cleanup = RemoveOnDrop {
                    inflight: Arc::clone(&self.inflight),
                    key,
                };
                shared.await
            }
            Slot::Bypass(operation, forward) => {
                warn!(operation = %name, "dedup map lock poisoned; forwarding directly");
                forward.run(operation).await
            }
        }
    }
}

enum Slot {
    Join(SharedOutcome),
    Lead(SharedOutcome),
    Bypass(Operation, Forward),
}

fn dedup_key(operation: &Operation) -> u64 {
    let mut hasher = DefaultHasher::new();
    operation.query().hash(&mut hasher);
    operation.variables().to_string().hash(&mut hasher);
    operation.operation_name().hash(&mut hasher);

    // Stable sort keeps repeated values of one header in insertion order.
    let mut headers: Vec<(&str, &[u8])> = operation
        .context()
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(b.0));
    headers.hash(&mut hasher);
    hasher.finish()
}
