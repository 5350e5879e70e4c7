//! GraphQL link - Error policies and composable middleware for GraphQL clients.
//!
//! This crate provides:
//! - Error policies (`none`, `ignore`, `all`) reconciling partial data with
//!   GraphQL errors.
//! - Classification of transport outcomes into network and GraphQL errors.
//! - An ordered link chain with retry, error-intercept, context, dedup and
//!   tracing links, terminated by an HTTP transport.
//! - A client tying the chain to per-operation error policies.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]

mod classify;
mod client;
mod config;
mod context;
mod dedup;
mod error;
mod http;
mod intercept;
mod link;
mod operation;
mod policy;
mod retry;
mod trace;

pub use classify::{classify, parse_retry_after};
pub use client::{
    ClientError, GraphqlClient, GraphqlClientBuilder, GraphqlClientMetrics,
    GraphqlClientMetricsSnapshot,
};
pub use config::{ClientConfig, ConfigError, RetryConfig};
pub use context::{AuthLink, ContextLink};
pub use dedup::{DEDUP_DISABLED_KEY, DedupLink};
pub use error::{
    ChainError, GraphqlError, GraphqlErrorLocation, GraphqlPathSegment, NetworkError,
    TransportErrorInfo,
};
pub use http::{DEFAULT_TIMEOUT, HttpTransport};
pub use intercept::{
    CREDENTIAL_GENERATION_KEY, CredentialRefresher, CredentialStore, ErrorHandler,
    ErrorInterceptLink, InterceptAction, InterceptedErrors, RefreshError, RefreshOnCode,
    UNAUTHENTICATED,
};
pub use link::{
    FnLink, FnTransport, Forward, Link, LinkChain, LinkChainBuilder, LinkResult, Transport,
    from_fn, transport_fn,
};
pub use operation::{
    GraphqlOperation, GraphqlQuery, GraphqlRequest, GraphqlResponse, Operation, OperationContext,
};
pub use policy::{ErrorPolicy, ExecutionError, ExecutionResult, resolve};
pub use retry::{
    ExponentialBackoff, RETRY_ATTEMPT_KEY, RetryDecision, RetryLink, RetryPolicy, RetryStrategy,
};
pub use trace::TracingLink;
pub use tokio_util::sync::CancellationToken;
