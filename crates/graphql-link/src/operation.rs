//! Operation types and typed GraphQL traits.

use std::collections::HashMap;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphqlError;
use crate::policy::ErrorPolicy;

/// GraphQL query wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphqlQuery {
    query: String,
}

impl GraphqlQuery {
    /// Create a new query from a string.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    /// Create a new query from a static string.
    #[must_use]
    pub fn from_static(query: &'static str) -> Self {
        Self::new(query)
    }

    /// Return the query text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.query
    }

    /// Returns `true` when the document's first operation is a mutation.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.query.trim_start().starts_with("mutation")
    }
}

/// Typed GraphQL operation definition.
///
/// Implement this trait for each query/mutation.
pub trait GraphqlOperation {
    /// Variables type.
    type Variables: Serialize + Send + Sync;
    /// Response data type.
    type ResponseData: DeserializeOwned + Send + Sync;

    /// GraphQL query text.
    const QUERY: &'static str;
    /// Operation name (used for observability and routing).
    const OPERATION_NAME: &'static str;

    /// Whether this operation is safe to retry and deduplicate.
    fn is_idempotent() -> bool {
        !GraphqlQuery::from_static(Self::QUERY).is_mutation()
    }
}

/// Per-operation metadata shared by every link during one pass of the chain.
///
/// Holds string-keyed JSON entries and the HTTP headers the transport sends.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    entries: HashMap<String, Value>,
    headers: HeaderMap,
}

impl OperationContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Entry deserialized into `T`; `None` when missing or of another shape.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }

    /// Insert an entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Headers sent with the operation.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers.
    pub const fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Set `Authorization: Bearer <token>`. Tokens that are not valid header
    /// values are ignored and `false` is returned.
    pub fn set_bearer_token(&mut self, token: &str) -> bool {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
                true
            }
            Err(_) => false,
        }
    }

    /// Current `Authorization` header as text.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION)?.to_str().ok()
    }
}

/// A single GraphQL request travelling through the link chain.
#[derive(Debug, Clone)]
pub struct Operation {
    query: GraphqlQuery,
    variables: Value,
    operation_name: Option<String>,
    idempotent: bool,
    error_policy: Option<ErrorPolicy>,
    context: OperationContext,
}

impl Operation {
    /// Operation with empty variables. Mutations are marked non-idempotent.
    #[must_use]
    pub fn new(query: GraphqlQuery) -> Self {
        let idempotent = !query.is_mutation();
        Self {
            query,
            variables: Value::Object(serde_json::Map::new()),
            operation_name: None,
            idempotent,
            error_policy: None,
            context: OperationContext::default(),
        }
    }

    /// Operation for a typed definition.
    pub fn typed<O: GraphqlOperation>(variables: &O::Variables) -> Result<Self, serde_json::Error> {
        let mut operation = Self::new(GraphqlQuery::from_static(O::QUERY))
            .with_operation_name(O::OPERATION_NAME)
            .with_variables(serde_json::to_value(variables)?);
        operation.idempotent = O::is_idempotent();
        Ok(operation)
    }

    /// Replace the variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Attach an operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Override idempotency.
    #[must_use]
    pub const fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Attach an error policy; unset operations use the client default.
    #[must_use]
    pub const fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    /// Replace the context.
    #[must_use]
    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    /// Query document.
    #[must_use]
    pub const fn query(&self) -> &GraphqlQuery {
        &self.query
    }

    /// Variables.
    #[must_use]
    pub const fn variables(&self) -> &Value {
        &self.variables
    }

    /// Operation name.
    #[must_use]
    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    /// Name for logs: the operation name or `"anonymous"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.operation_name.as_deref().unwrap_or("anonymous")
    }

    /// Whether the operation may be retried or deduplicated.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Explicit error policy, if any.
    #[must_use]
    pub const fn error_policy(&self) -> Option<ErrorPolicy> {
        self.error_policy
    }

    /// Context.
    #[must_use]
    pub const fn context(&self) -> &OperationContext {
        &self.context
    }

    /// Mutable context.
    pub const fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.context
    }

    /// Wire payload for this operation.
    #[must_use]
    pub fn request(&self) -> GraphqlRequest<'_> {
        GraphqlRequest {
            query: self.query.as_str(),
            variables: &self.variables,
            operation_name: self.operation_name.as_deref(),
        }
    }
}

/// GraphQL request payload.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest<'a> {
    /// Query text.
    pub query: &'a str,
    /// Variables.
    pub variables: &'a Value,
    /// Optional operation name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'a str>,
}

/// GraphQL response container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct GraphqlResponse<T = Value> {
    /// Response data.
    #[serde(default)]
    pub data: Option<T>,
    /// GraphQL errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
    /// Extensions payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl<T> GraphqlResponse<T> {
    /// Response carrying data only.
    #[must_use]
    pub const fn from_data(data: T) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            extensions: None,
        }
    }

    /// Response carrying errors only.
    #[must_use]
    pub const fn from_errors(errors: Vec<GraphqlError>) -> Self {
        Self {
            data: None,
            errors,
            extensions: None,
        }
    }

    /// Attach errors.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<GraphqlError>) -> Self {
        self.errors = errors;
        self
    }

    /// Returns `true` if no GraphQL errors were returned.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
