//! Links that prepare the operation context before forwarding.

use std::fmt;

use async_trait::async_trait;

use crate::intercept::CredentialStore;
use crate::link::{Forward, Link, LinkResult};
use crate::operation::{Operation, OperationContext};

/// Edits the context of every operation with a closure.
pub struct ContextLink<F> {
    edit: F,
}

impl<F> ContextLink<F>
where
    F: Fn(&Operation, &mut OperationContext) + Send + Sync,
{
    /// Link applying `edit`; the closure sees the operation as it arrived.
    #[must_use]
    pub const fn new(edit: F) -> Self {
        Self { edit }
    }
}

impl<F> fmt::Debug for ContextLink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Link for ContextLink<F>
where
    F: Fn(&Operation, &mut OperationContext) + Send + Sync,
{
    fn name(&self) -> &str {
        "context"
    }

    async fn request(&self, operation: Operation, forward: Forward) -> LinkResult {
        let mut context = operation.context().clone();
        (self.edit)(&operation, &mut context);
        forward.run(operation.with_context(context)).await
    }
}

/// Copies the current token of a [`CredentialStore`] into the
/// `Authorization` header.
///
/// Operations that already carry an `Authorization` header keep it.
#[derive(Debug, Clone)]
pub struct AuthLink {
    store: CredentialStore,
}

impl AuthLink {
    /// Link reading from `store`.
    #[must_use]
    pub const fn new(store: CredentialStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Link for AuthLink {
    fn name(&self) -> &str {
        "auth"
    }

    async fn request(&self, mut operation: Operation, forward: Forward) -> LinkResult {
        if operation.context().authorization().is_none() {
            if let Some(token) = self.store.token().await {
                operation.context_mut().set_bearer_token(&token);
            }
        }
        forward.run(operation).await
    }
}
