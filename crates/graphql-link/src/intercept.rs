//! Error interception with a single guarded re-issue.
//!
//! [`ErrorInterceptLink`] hands failed outcomes to an [`ErrorHandler`]. The
//! handler may edit the operation (typically its headers) and ask for one
//! more attempt. The re-issued operation carries a marker unique to the link
//! instance, so the handler never sees its outcome and an operation cannot
//! loop through the same link.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{GraphqlError, NetworkError};
use crate::link::{Forward, Link, LinkResult};
use crate::operation::{GraphqlResponse, Operation};

/// Extension code signalling missing or expired credentials.
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";

const MARKER_PREFIX: &str = "graphql_link.intercept.";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Failed outcome as seen by an [`ErrorHandler`].
#[derive(Debug, Clone, Copy)]
pub struct InterceptedErrors<'a> {
    /// Response, when the server answered.
    pub response: Option<&'a GraphqlResponse>,
    /// GraphQL errors of the response (empty for network errors).
    pub graphql_errors: &'a [GraphqlError],
    /// Transport failure, when no response exists.
    pub network_error: Option<&'a NetworkError>,
}

impl InterceptedErrors<'_> {
    /// First GraphQL error whose `extensions.code` is one of `codes`.
    #[must_use]
    pub fn find_code(&self, codes: &[String]) -> Option<&GraphqlError> {
        self.graphql_errors.iter().find(|err| {
            err.extension_code()
                .is_some_and(|code| codes.iter().any(|wanted| wanted == code))
        })
    }
}

/// What the intercept link does after the handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptAction {
    /// Return the original outcome.
    PassThrough,
    /// Re-issue the (possibly edited) operation once.
    Retry,
}

/// Decides what to do with a failed outcome.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Inspect `errors`; edits to `operation` apply only to a re-issue.
    async fn on_error(
        &self,
        operation: &mut Operation,
        errors: InterceptedErrors<'_>,
    ) -> InterceptAction;

    /// Runs before the first pass of each operation; edits also reach a
    /// re-issue.
    async fn before_request(&self, _operation: &mut Operation) {}
}

/// Link routing failed outcomes through an [`ErrorHandler`].
pub struct ErrorInterceptLink<H> {
    handler: H,
    marker: String,
}

impl<H: ErrorHandler> ErrorInterceptLink<H> {
    /// Wrap a handler.
    #[must_use]
    pub fn new(handler: H) -> Self {
        let id = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        Self {
            handler,
            marker: format!("{MARKER_PREFIX}{id}"),
        }
    }

    /// Context key this instance sets on operations it re-issued.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The wrapped handler.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H> fmt::Debug for ErrorInterceptLink<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorInterceptLink")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<H: ErrorHandler> Link for ErrorInterceptLink<H> {
    fn name(&self) -> &str {
        "error-intercept"
    }

    async fn request(&self, mut operation: Operation, forward: Forward) -> LinkResult {
        if operation.context().contains_key(&self.marker) {
            return forward.run(operation).await;
        }

        self.handler.before_request(&mut operation).await;
        let mut reissue = operation.clone();
        let outcome = forward.run(operation).await;

        let failed = match &outcome {
            Ok(response) => !response.is_ok(),
            Err(err) => !err.is_cancelled(),
        };
        if !failed {
            return outcome;
        }

        let errors = match &outcome {
            Ok(response) => InterceptedErrors {
                response: Some(response),
                graphql_errors: &response.errors,
                network_error: None,
            },
            Err(err) => InterceptedErrors {
                response: None,
                graphql_errors: &[],
                network_error: Some(err),
            },
        };

        match self.handler.on_error(&mut reissue, errors).await {
            InterceptAction::PassThrough => outcome,
            InterceptAction::Retry => {
                debug!(
                    operation = reissue.display_name(),
                    marker = %self.marker,
                    "re-issuing GraphQL operation after intercepted error"
                );
                reissue.context_mut().insert(self.marker.clone(), true);
                forward.run(reissue).await
            }
        }
    }
}

/// Credential refresh failure.
#[derive(Debug, Clone, Error)]
#[error("credential refresh failed: {message}")]
pub struct RefreshError {
    /// Details.
    pub message: String,
}

impl RefreshError {
    /// Error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Source of fresh credentials.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Obtain a new bearer token.
    async fn refresh(&self) -> Result<String, RefreshError>;
}

/// Bearer token shared by every operation of a client.
///
/// Every change bumps a generation counter, so a caller that never saw the
/// token itself can still tell whether it was replaced in the meantime.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Credential>>,
}

#[derive(Debug, Default)]
struct Credential {
    token: Option<String>,
    generation: u64,
}

impl Credential {
    fn replace(&mut self, token: Option<String>) {
        self.token = token;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl CredentialStore {
    /// Store holding `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Credential {
                token: Some(token.into()),
                generation: 0,
            })),
        }
    }

    /// Current token.
    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    /// Number of times the token has changed.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Replace the token.
    pub async fn set(&self, token: impl Into<String>) {
        self.inner.write().await.replace(Some(token.into()));
    }

    /// Drop the token.
    pub async fn clear(&self) {
        self.inner.write().await.replace(None);
    }

    /// Refresh the token unless another operation already replaced `stale`.
    ///
    /// Concurrent callers that failed with the same stale token share one
    /// refresh; later callers get the token stored by the first.
    pub async fn refresh_if_stale<R>(
        &self,
        stale: Option<&str>,
        refresher: &R,
    ) -> Result<String, RefreshError>
    where
        R: CredentialRefresher + ?Sized,
    {
        let mut guard = self.inner.write().await;
        if let Some(current) = guard.token.as_deref() {
            if stale != Some(current) {
                return Ok(current.to_string());
            }
        }
        Self::refresh_locked(&mut guard, refresher).await
    }

    /// Refresh the token unless it changed after `generation` was read.
    ///
    /// Used when the failed request carried the token implicitly, for
    /// example through transport default headers.
    pub async fn refresh_since<R>(
        &self,
        generation: u64,
        refresher: &R,
    ) -> Result<String, RefreshError>
    where
        R: CredentialRefresher + ?Sized,
    {
        let mut guard = self.inner.write().await;
        if guard.generation != generation {
            if let Some(current) = guard.token.as_deref() {
                return Ok(current.to_string());
            }
        }
        Self::refresh_locked(&mut guard, refresher).await
    }

    async fn refresh_locked<R>(
        guard: &mut Credential,
        refresher: &R,
    ) -> Result<String, RefreshError>
    where
        R: CredentialRefresher + ?Sized,
    {
        let fresh = refresher.refresh().await?;
        guard.replace(Some(fresh.clone()));
        Ok(fresh)
    }
}

/// Context key holding the store generation an operation was sent under.
pub const CREDENTIAL_GENERATION_KEY: &str = "graphql_link.credential.generation";

/// Handler refreshing credentials when the server reports them invalid.
///
/// Triggers on any GraphQL error whose extension code is in the configured
/// set (default [`UNAUTHENTICATED`]), and on HTTP 401 unless disabled.
///
/// The token that failed is read from the operation's `Authorization`
/// header. Without one (a client-wide bearer token, say) the store
/// generation recorded before sending decides whether a refresh is due.
pub struct RefreshOnCode<R> {
    store: CredentialStore,
    refresher: R,
    codes: Vec<String>,
    on_unauthorized_status: bool,
}

impl<R: CredentialRefresher> RefreshOnCode<R> {
    /// Handler for `UNAUTHENTICATED` and HTTP 401.
    #[must_use]
    pub fn new(store: CredentialStore, refresher: R) -> Self {
        Self {
            store,
            refresher,
            codes: vec![UNAUTHENTICATED.to_string()],
            on_unauthorized_status: true,
        }
    }

    /// Replace the extension codes that trigger a refresh.
    #[must_use]
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether HTTP 401 also triggers a refresh.
    #[must_use]
    pub const fn with_unauthorized_status(mut self, enabled: bool) -> Self {
        self.on_unauthorized_status = enabled;
        self
    }

    fn triggered(&self, errors: &InterceptedErrors<'_>) -> bool {
        if errors.find_code(&self.codes).is_some() {
            return true;
        }
        self.on_unauthorized_status
            && errors
                .network_error
                .and_then(NetworkError::status_code)
                .is_some_and(|status| status == StatusCode::UNAUTHORIZED.as_u16())
    }
}

#[async_trait]
impl<R: CredentialRefresher> ErrorHandler for RefreshOnCode<R> {
    async fn on_error(
        &self,
        operation: &mut Operation,
        errors: InterceptedErrors<'_>,
    ) -> InterceptAction {
        if !self.triggered(&errors) {
            return InterceptAction::PassThrough;
        }

        let stale = operation
            .context()
            .authorization()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(ToString::to_string);
        let refreshed = match stale {
            Some(stale) => {
                self.store
                    .refresh_if_stale(Some(stale.as_str()), &self.refresher)
                    .await
            }
            None => {
                let sent_under = match operation
                    .context()
                    .get_as::<u64>(CREDENTIAL_GENERATION_KEY)
                {
                    Some(generation) => generation,
                    None => self.store.generation().await,
                };
                self.store.refresh_since(sent_under, &self.refresher).await
            }
        };
        let token = match refreshed {
            Ok(token) => token,
            Err(err) => {
                warn!(
                    operation = operation.display_name(),
                    error = %err,
                    "credential refresh failed"
                );
                return InterceptAction::PassThrough;
            }
        };

        if operation.context_mut().set_bearer_token(&token) {
            InterceptAction::Retry
        } else {
            warn!(
                operation = operation.display_name(),
                "refreshed credential is not a valid header value"
            );
            InterceptAction::PassThrough
        }
    }

    async fn before_request(&self, operation: &mut Operation) {
        let generation = self.store.generation().await;
        operation
            .context_mut()
            .insert(CREDENTIAL_GENERATION_KEY, generation);
    }
}
