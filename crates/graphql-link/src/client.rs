//! GraphQL client: a link chain plus error policy resolution.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ClientConfig, ConfigError};
use crate::dedup::DedupLink;
use crate::error::{ChainError, NetworkError};
use crate::http::{DEFAULT_TIMEOUT, HttpTransport};
use crate::link::{Link, LinkChain, LinkResult, Transport};
use crate::operation::{GraphqlOperation, Operation};
use crate::policy::{ErrorPolicy, ExecutionResult, resolve};
use crate::retry::{RetryLink, RetryPolicy};
use crate::trace::TracingLink;

/// Client construction or typed execution failure.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid link chain.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The HTTP transport could not be created.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] NetworkError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Variables could not be serialized.
    #[error("failed to serialize variables: {0}")]
    Variables(#[source] serde_json::Error),

    /// Response data did not match the operation's data type.
    #[error("failed to decode response data: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Client metrics.
#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub struct GraphqlClientMetrics {
    operations_total: AtomicU64,
    operations_succeeded: AtomicU64,
    operations_graphql_errors: AtomicU64,
    operations_network_errors: AtomicU64,
}

impl GraphqlClientMetrics {
    /// Snapshot current metrics.
    #[must_use]
    pub fn snapshot(&self) -> GraphqlClientMetricsSnapshot {
        GraphqlClientMetricsSnapshot {
            operations_total: self.operations_total.load(Ordering::Relaxed),
            operations_succeeded: self.operations_succeeded.load(Ordering::Relaxed),
            operations_graphql_errors: self.operations_graphql_errors.load(Ordering::Relaxed),
            operations_network_errors: self.operations_network_errors.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &LinkResult) {
        self.operations_total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(response) if response.is_ok() => &self.operations_succeeded,
            Ok(_) => &self.operations_graphql_errors,
            Err(_) => &self.operations_network_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Metrics snapshot.
///
/// Counts outcomes as they left the chain, before the error policy ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_field_names)]
pub struct GraphqlClientMetricsSnapshot {
    /// Operations executed.
    pub operations_total: u64,
    /// Operations answered without GraphQL errors.
    pub operations_succeeded: u64,
    /// Operations answered with GraphQL errors.
    pub operations_graphql_errors: u64,
    /// Operations that failed in transport or were cancelled.
    pub operations_network_errors: u64,
}

/// GraphQL client builder.
///
/// The chain is assembled as: links added with [`with_link`], then
/// [`TracingLink`], [`DedupLink`] and [`RetryLink`] when enabled, then the
/// transport. Place an [`AuthLink`](crate::AuthLink) before an
/// [`ErrorInterceptLink`](crate::ErrorInterceptLink) so the handler sees the
/// token the operation was sent with.
///
/// [`with_link`]: GraphqlClientBuilder::with_link
pub struct GraphqlClientBuilder {
    endpoint: String,
    headers: HeaderMap,
    timeout: Duration,
    links: Vec<Arc<dyn Link>>,
    transport: Option<Arc<dyn Transport>>,
    default_policy: ErrorPolicy,
    retry: Option<RetryPolicy>,
    dedup: bool,
    tracing: bool,
}

impl GraphqlClientBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
            links: Vec::new(),
            transport: None,
            default_policy: ErrorPolicy::default(),
            retry: Some(RetryPolicy::default()),
            dedup: false,
            tracing: true,
        }
    }

    /// Append a link ahead of the built-in ones.
    #[must_use]
    pub fn with_link(mut self, link: impl Link + 'static) -> Self {
        self.links.push(Arc::new(link));
        self
    }

    /// Append a link shared with other clients.
    #[must_use]
    pub fn with_shared_link(mut self, link: Arc<dyn Link>) -> Self {
        self.links.push(link);
        self
    }

    /// Replace the HTTP transport; headers and timeout are then unused.
    #[must_use]
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Policy for operations that do not set one.
    #[must_use]
    pub const fn with_default_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Set retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Leave the retry link out of the chain.
    #[must_use]
    pub const fn without_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    /// Enable in-flight deduplication.
    #[must_use]
    pub const fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup = enabled;
        self
    }

    /// Enable per-operation logging.
    #[must_use]
    pub const fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a static bearer token header.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        if let Ok(mut header) = HeaderValue::from_str(&value) {
            header.set_sensitive(true);
            self.headers.insert(AUTHORIZATION, header);
        }
        self
    }

    /// Set timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GraphqlClient, ClientError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_options(
                self.endpoint,
                self.headers,
                self.timeout,
            )?),
        };

        let mut chain = LinkChain::builder();
        for link in self.links {
            chain = chain.shared_link(link);
        }
        if self.tracing {
            chain = chain.link(TracingLink::new());
        }
        if self.dedup {
            chain = chain.link(DedupLink::new());
        }
        if let Some(policy) = self.retry {
            chain = chain.link(RetryLink::new(policy));
        }
        let chain = chain.shared_transport(transport).build()?;

        Ok(GraphqlClient {
            chain,
            default_policy: self.default_policy,
            metrics: Arc::new(GraphqlClientMetrics::default()),
        })
    }
}

impl fmt::Debug for GraphqlClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphqlClientBuilder")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("links", &self.links.len())
            .field("custom_transport", &self.transport.is_some())
            .field("default_policy", &self.default_policy)
            .field("retry", &self.retry)
            .field("dedup", &self.dedup)
            .field("tracing", &self.tracing)
            .finish_non_exhaustive()
    }
}

/// GraphQL client.
///
/// Cheap to clone; clones share the chain, connection pool and metrics.
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    chain: LinkChain,
    default_policy: ErrorPolicy,
    metrics: Arc<GraphqlClientMetrics>,
}

impl GraphqlClient {
    /// Start building a client for `endpoint`.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> GraphqlClientBuilder {
        GraphqlClientBuilder::new(endpoint)
    }

    /// Client with default settings.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder(endpoint).build()
    }

    /// Client built from a validated [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut builder = Self::builder(config.endpoint.clone())
            .with_timeout(config.timeout())
            .with_default_error_policy(config.error_policy)
            .with_dedup(config.dedup)
            .with_tracing(config.tracing);
        for (name, value) in &config.header_map()? {
            builder = builder.with_header(name.clone(), value.clone());
        }
        builder = match &config.retry {
            Some(retry) => builder.with_retry_policy(retry.to_policy()),
            None => builder.without_retry(),
        };
        builder.build()
    }

    /// Policy used when an operation does not set one.
    #[must_use]
    pub const fn default_error_policy(&self) -> ErrorPolicy {
        self.default_policy
    }

    /// Underlying link chain.
    #[must_use]
    pub const fn chain(&self) -> &LinkChain {
        &self.chain
    }

    /// Return client metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> GraphqlClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run an operation through the chain and resolve the outcome under its
    /// error policy.
    pub async fn execute(&self, operation: Operation) -> ExecutionResult {
        let policy = self.policy_for(&operation);
        let outcome = self.chain.execute(operation).await;
        self.finish(policy, outcome)
    }

    /// Like [`execute`](Self::execute), but gives up when `cancel` fires.
    ///
    /// Cancelling drops the in-flight chain, including any pending backoff,
    /// and yields [`NetworkError::Cancelled`].
    pub async fn execute_cancellable(
        &self,
        operation: Operation,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let policy = self.policy_for(&operation);
        let name = operation.display_name().to_string();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(operation = %name, "GraphQL operation cancelled");
                Err(NetworkError::Cancelled)
            }
            outcome = self.chain.execute(operation) => outcome,
        };
        self.finish(policy, outcome)
    }

    /// Execute a typed operation; `policy` overrides the client default.
    pub async fn execute_typed<O: GraphqlOperation>(
        &self,
        variables: &O::Variables,
        policy: Option<ErrorPolicy>,
    ) -> Result<ExecutionResult<O::ResponseData>, ClientError> {
        let mut operation = Operation::typed::<O>(variables).map_err(ClientError::Variables)?;
        if let Some(policy) = policy {
            operation = operation.with_error_policy(policy);
        }
        self.execute(operation)
            .await
            .deserialize_data::<O::ResponseData>()
            .map_err(ClientError::Decode)
    }

    fn policy_for(&self, operation: &Operation) -> ErrorPolicy {
        operation.error_policy().unwrap_or(self.default_policy)
    }

    fn finish(&self, policy: ErrorPolicy, outcome: LinkResult) -> ExecutionResult {
        self.metrics.record(&outcome);
        match outcome {
            Ok(response) => resolve(policy, response),
            Err(err) => ExecutionResult::from_network_error(err),
        }
    }
}
