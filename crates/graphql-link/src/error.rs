//! Error taxonomy: GraphQL errors reported by the server, network errors
//! raised by the transport, and chain construction errors.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport failure information captured from reqwest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportErrorInfo {
    /// Error message.
    pub message: String,
    /// HTTP status code (if available).
    pub status_code: Option<u16>,
    /// Whether the error was a timeout.
    pub is_timeout: bool,
    /// Whether the error was a connection failure.
    pub is_connect: bool,
}

impl TransportErrorInfo {
    /// Transport failure with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            is_timeout: false,
            is_connect: false,
        }
    }

    /// Connection refused or reset.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            is_connect: true,
            ..Self::new(message)
        }
    }

    /// Request deadline elapsed.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            is_timeout: true,
            ..Self::new(message)
        }
    }
}

impl From<reqwest::Error> for TransportErrorInfo {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status_code: err.status().map(|status| status.as_u16()),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
        }
    }
}

/// GraphQL error location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlErrorLocation {
    /// Line number in the query (1-based).
    pub line: u32,
    /// Column number in the query (1-based).
    pub column: u32,
}

/// GraphQL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphqlPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

/// A server-reported error, carried as data alongside (possibly partial) results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable error message.
    pub message: String,
    /// Location(s) within the query.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphqlErrorLocation>,
    /// Path within the response where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<GraphqlPathSegment>,
    /// Extensions metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphqlError {
    /// Error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }

    /// Attach `extensions.code`.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        let code = serde_json::Value::String(code.into());
        match self.extensions {
            Some(serde_json::Value::Object(ref mut map)) => {
                map.insert("code".to_string(), code);
            }
            _ => {
                self.extensions = Some(serde_json::json!({ "code": code }));
            }
        }
        self
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, line: u32, column: u32) -> Self {
        self.locations.push(GraphqlErrorLocation { line, column });
        self
    }

    /// `extensions.code`, when present and a string.
    #[must_use]
    pub fn extension_code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extension_code() {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Transport-level failure of a single attempt.
///
/// A network error means no server-shaped response exists for the attempt.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// Connection, timeout or request failure before a status was received.
    #[error("transport error: {}", .0.message)]
    Transport(TransportErrorInfo),

    /// Non-success HTTP status.
    #[error("HTTP status {status} with body: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: StatusCode,
        /// Response body (truncated if needed).
        body: String,
        /// Retry-After duration when supplied.
        retry_after: Option<Duration>,
    },

    /// Success status with a body that is not valid GraphQL JSON.
    #[error("JSON error: {0}")]
    Parse(String),

    /// Success status with a JSON body that is not a GraphQL response.
    #[error("GraphQL protocol error: {message}")]
    Protocol {
        /// Details.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(TransportErrorInfo::from(err))
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl NetworkError {
    /// Returns `true` if the failure is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(info) => info.is_timeout || info.is_connect,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    /// HTTP status code, when the failure carried one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport(info) => info.status_code,
            Self::HttpStatus { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }

    /// Server-requested delay before the next attempt.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns `true` for a cancelled operation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Link chain construction error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// No terminating link was supplied.
    #[error("link chain has no terminating transport")]
    MissingTransport,

    /// More than one terminating link was supplied.
    #[error("link chain has more than one terminating transport")]
    MultipleTransports,

    /// A middleware link was added after the terminating link.
    #[error("link `{name}` added after the terminating transport")]
    LinkAfterTransport {
        /// Name of the misplaced link.
        name: String,
    },
}
