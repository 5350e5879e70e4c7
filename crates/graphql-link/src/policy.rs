//! Error policy resolution.
//!
//! A policy decides how partial data and GraphQL errors from one response are
//! reconciled into the result handed to the caller:
//!
//! - [`ErrorPolicy::None`]: any GraphQL error discards the data.
//! - [`ErrorPolicy::Ignore`]: GraphQL errors are dropped, data is kept.
//! - [`ErrorPolicy::All`]: data and errors are both surfaced.
//!
//! Network errors are never affected by the policy.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphqlError, NetworkError};
use crate::operation::GraphqlResponse;

/// How GraphQL errors and partial data are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Errors discard data.
    #[default]
    None,
    /// Errors are dropped; data is kept.
    Ignore,
    /// Data and errors are both kept.
    All,
}

impl ErrorPolicy {
    /// Wire/config name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ignore => "ignore",
            Self::All => "all",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final value delivered to the caller.
#[derive(Debug, Clone)]
pub struct ExecutionResult<T = Value> {
    /// Resolved data.
    pub data: Option<T>,
    /// GraphQL errors surfaced under the policy.
    pub graphql_errors: Vec<GraphqlError>,
    /// Transport failure, if the operation never produced a response.
    pub network_error: Option<NetworkError>,
}

/// Errors view of an [`ExecutionResult`].
#[derive(Debug, Clone)]
pub struct ExecutionError {
    /// GraphQL errors.
    pub graphql_errors: Vec<GraphqlError>,
    /// Network error.
    pub network_error: Option<NetworkError>,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.network_error {
            return write!(f, "network error: {err}");
        }
        let mut first = true;
        for err in &self.graphql_errors {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{err}")?;
        }
        if first {
            f.write_str("missing GraphQL data")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.network_error
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Reconcile a response into a result under `policy`. Pure.
#[must_use]
pub fn resolve<T>(policy: ErrorPolicy, response: GraphqlResponse<T>) -> ExecutionResult<T> {
    let GraphqlResponse { data, errors, .. } = response;
    match policy {
        ErrorPolicy::None if !errors.is_empty() => ExecutionResult {
            data: None,
            graphql_errors: errors,
            network_error: None,
        },
        ErrorPolicy::None | ErrorPolicy::All => ExecutionResult {
            data,
            graphql_errors: errors,
            network_error: None,
        },
        ErrorPolicy::Ignore => ExecutionResult {
            data,
            graphql_errors: Vec::new(),
            network_error: None,
        },
    }
}

impl<T> ExecutionResult<T> {
    /// Result for an operation that failed in transport.
    #[must_use]
    pub const fn from_network_error(err: NetworkError) -> Self {
        Self {
            data: None,
            graphql_errors: Vec::new(),
            network_error: Some(err),
        }
    }

    /// Returns `true` if either error field is populated.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.network_error.is_some() || !self.graphql_errors.is_empty()
    }

    /// Errors view, `None` when the operation succeeded cleanly.
    #[must_use]
    pub fn error(&self) -> Option<ExecutionError> {
        self.has_errors().then(|| ExecutionError {
            graphql_errors: self.graphql_errors.clone(),
            network_error: self.network_error.clone(),
        })
    }

    /// Map the data, keeping the errors.
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> ExecutionResult<U> {
        ExecutionResult {
            data: self.data.map(f),
            graphql_errors: self.graphql_errors,
            network_error: self.network_error,
        }
    }

    /// Map the data with a fallible conversion.
    pub fn try_map_data<U, E>(
        self,
        f: impl FnOnce(T) -> Result<U, E>,
    ) -> Result<ExecutionResult<U>, E> {
        let data = self.data.map(f).transpose()?;
        Ok(ExecutionResult {
            data,
            graphql_errors: self.graphql_errors,
            network_error: self.network_error,
        })
    }

    /// Strict view: data when there are no errors, otherwise the errors.
    pub fn into_result(self) -> Result<T, ExecutionError> {
        let has_errors = self.has_errors();
        match self.data {
            Some(data) if !has_errors => Ok(data),
            _ => Err(ExecutionError {
                graphql_errors: self.graphql_errors,
                network_error: self.network_error,
            }),
        }
    }
}

impl ExecutionResult<Value> {
    /// Deserialize JSON data into `T`.
    pub fn deserialize_data<T: DeserializeOwned>(
        self,
    ) -> Result<ExecutionResult<T>, serde_json::Error> {
        self.try_map_data(serde_json::from_value)
    }
}
