//! The link chain: ordered middleware terminated by exactly one transport.
//!
//! Each [`Link`] receives the operation and a [`Forward`] handle on the rest
//! of the chain. It may pass the operation through, edit its context before
//! forwarding, inspect or replace the outcome, or run `forward` again to
//! re-issue the operation. The [`Transport`] at the end performs the actual
//! I/O and never forwards.
//!
//! ```rust,ignore
//! let chain = LinkChain::builder()
//!     .link(TracingLink::new())
//!     .link(RetryLink::new(RetryPolicy::default()))
//!     .transport(HttpTransport::new(endpoint)?)
//!     .build()?;
//! let outcome = chain.execute(operation).await;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ChainError, NetworkError};
use crate::operation::{GraphqlResponse, Operation};

/// Outcome of one pass through (part of) the chain.
pub type LinkResult = Result<GraphqlResponse, NetworkError>;

/// Middleware in the chain.
#[async_trait]
pub trait Link: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Handle `operation`, usually by calling `forward.run(..)`.
    async fn request(&self, operation: Operation, forward: Forward) -> LinkResult;
}

/// Terminating link performing the network round trip.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the operation and classify the outcome.
    async fn send(&self, operation: Operation) -> LinkResult;
}

/// Handle on the remainder of the chain after the current link.
///
/// Cheap to clone; each [`Forward::run`] call is an independent pass.
#[derive(Clone)]
pub struct Forward {
    links: Arc<[Arc<dyn Link>]>,
    position: usize,
    transport: Arc<dyn Transport>,
}

impl Forward {
    /// Invoke the next link, or the transport when no links remain.
    pub async fn run(&self, operation: Operation) -> LinkResult {
        match self.links.get(self.position) {
            Some(link) => {
                let next = Self {
                    links: Arc::clone(&self.links),
                    position: self.position + 1,
                    transport: Arc::clone(&self.transport),
                };
                link.request(operation, next).await
            }
            None => self.transport.send(operation).await,
        }
    }

    /// Number of middleware links still ahead of the transport.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.links.len().saturating_sub(self.position)
    }
}

impl fmt::Debug for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forward")
            .field("position", &self.position)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable chain of links.
#[derive(Clone)]
pub struct LinkChain {
    head: Forward,
}

impl LinkChain {
    /// Start building a chain.
    #[must_use]
    pub fn builder() -> LinkChainBuilder {
        LinkChainBuilder::default()
    }

    /// Run an operation through every link and the transport.
    pub async fn execute(&self, operation: Operation) -> LinkResult {
        self.head.run(operation).await
    }

    /// Link names in execution order.
    #[must_use]
    pub fn link_names(&self) -> Vec<String> {
        self.head
            .links
            .iter()
            .map(|link| link.name().to_string())
            .collect()
    }
}

impl fmt::Debug for LinkChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkChain")
            .field("links", &self.link_names())
            .finish_non_exhaustive()
    }
}

/// Builder for [`LinkChain`].
///
/// Links run in the order they are added; the transport must come last.
#[derive(Default)]
pub struct LinkChainBuilder {
    links: Vec<Arc<dyn Link>>,
    transport: Option<Arc<dyn Transport>>,
    error: Option<ChainError>,
}

impl LinkChainBuilder {
    /// Append a middleware link.
    #[must_use]
    pub fn link(self, link: impl Link + 'static) -> Self {
        self.shared_link(Arc::new(link))
    }

    /// Append a middleware link that is shared with other chains.
    #[must_use]
    pub fn shared_link(mut self, link: Arc<dyn Link>) -> Self {
        if self.transport.is_some() && self.error.is_none() {
            self.error = Some(ChainError::LinkAfterTransport {
                name: link.name().to_string(),
            });
        }
        self.links.push(link);
        self
    }

    /// Set the terminating transport.
    #[must_use]
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    /// Set a terminating transport shared with other chains.
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        if self.transport.is_some() && self.error.is_none() {
            self.error = Some(ChainError::MultipleTransports);
        }
        self.transport = Some(transport);
        self
    }

    /// Validate and build the chain.
    pub fn build(self) -> Result<LinkChain, ChainError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let transport = self.transport.ok_or(ChainError::MissingTransport)?;
        Ok(LinkChain {
            head: Forward {
                links: self.links.into(),
                position: 0,
                transport,
            },
        })
    }
}

/// Link backed by an async closure.
pub struct FnLink<F> {
    name: String,
    f: F,
}

/// Build a [`Link`] from `Fn(Operation, Forward) -> impl Future<Output = LinkResult>`.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnLink<F>
where
    F: Fn(Operation, Forward) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LinkResult> + Send + 'static,
{
    FnLink {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Link for FnLink<F>
where
    F: Fn(Operation, Forward) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LinkResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, operation: Operation, forward: Forward) -> LinkResult {
        (self.f)(operation, forward).await
    }
}

/// Transport backed by an async closure; handy for tests and in-process
/// executors.
pub struct FnTransport<F> {
    f: F,
}

/// Build a [`Transport`] from `Fn(Operation) -> impl Future<Output = LinkResult>`.
pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LinkResult> + Send + 'static,
{
    FnTransport { f }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LinkResult> + Send + 'static,
{
    async fn send(&self, operation: Operation) -> LinkResult {
        (self.f)(operation).await
    }
}
