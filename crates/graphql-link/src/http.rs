//! HTTP transport: the terminating link of a client's chain.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::debug;

use crate::classify::{classify, parse_retry_after};
use crate::error::NetworkError;
use crate::link::{LinkResult, Transport};
use crate::operation::Operation;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// POSTs operations as JSON to a GraphQL endpoint.
///
/// Owns the reqwest connection pool; clones share it.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Transport with default headers and timeout.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, NetworkError> {
        Self::with_options(endpoint, HeaderMap::new(), DEFAULT_TIMEOUT)
    }

    /// Transport sending `headers` with every request, before the
    /// operation's own headers.
    pub fn with_options(
        endpoint: impl Into<String>,
        mut headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        headers.entry(ACCEPT).or_insert(HeaderValue::from_static(
            "application/graphql-response+json, application/json",
        ));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(endpoint, http))
    }

    /// Transport reusing an existing reqwest client.
    #[must_use]
    pub fn with_client(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, operation: Operation) -> LinkResult {
        let body = serde_json::to_vec(&operation.request())?;
        debug!(
            operation = operation.display_name(),
            endpoint = %self.endpoint,
            bytes = body.len(),
            "sending GraphQL operation"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .headers(operation.context().headers().clone())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let bytes = response.bytes().await?;

        classify(status, &bytes, retry_after)
    }
}
