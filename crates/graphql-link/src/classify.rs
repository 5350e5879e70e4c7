//! Classification of raw HTTP outcomes into responses or network errors.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

use crate::error::NetworkError;
use crate::operation::GraphqlResponse;

const MAX_BODY_LEN: usize = 4096;

/// Turn a status and body into a GraphQL response, or the network error that
/// prevented one from existing.
///
/// Only a success status with a JSON object carrying `data` and/or `errors`
/// yields a response. Anything else short-circuits as a [`NetworkError`].
pub fn classify(
    status: StatusCode,
    body: &[u8],
    retry_after: Option<Duration>,
) -> Result<GraphqlResponse, NetworkError> {
    if !status.is_success() {
        return Err(NetworkError::HttpStatus {
            status,
            body: truncate_body(body),
            retry_after,
        });
    }

    let value: Value = serde_json::from_slice(body)?;
    let Some(object) = value.as_object() else {
        return Err(NetworkError::Protocol {
            message: "response body is not a JSON object".to_string(),
        });
    };
    if !object.contains_key("data") && !object.contains_key("errors") {
        return Err(NetworkError::Protocol {
            message: "response has neither data nor errors".to_string(),
        });
    }

    Ok(serde_json::from_value(value)?)
}

/// Delta-seconds `Retry-After` header.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate_body(bytes: &[u8]) -> String {
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if body.len() > MAX_BODY_LEN {
        let mut cut = MAX_BODY_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
