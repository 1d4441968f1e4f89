//! Per-call request descriptors.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;

use crate::body::{MultipartForm, RequestBody};
use crate::url::{Query, QueryValue};

/// Everything needed to make one API call.
///
/// Built once and borrowed by the executor; retries never modify it.
///
/// ```
/// use deva_http::ApiRequest;
/// use serde_json::json;
///
/// let request = ApiRequest::post("/v1/ai/chat")
///     .json(json!({"messages": [{"role": "user", "content": "hi"}]}))
///     .query_opt("model", Some("deva-1"));
/// assert_eq!(request.path, "/v1/ai/chat");
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path appended to the base URL, with a leading `/`.
    pub path: String,
    /// Query parameters.
    pub query: Query,
    /// Optional body.
    pub body: Option<RequestBody>,
    /// Extra headers; these override the JSON content type.
    pub headers: HeaderMap,
    /// Whether the bearer credential is attached.
    pub requires_auth: bool,
    /// Per-call timeout, overriding the client default.
    pub timeout: Option<Duration>,
    /// Whether a 402 may be settled by the payer and retried.
    pub retry_on_402: bool,
}

impl ApiRequest {
    /// Creates an authenticated request with no body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Query::new(),
            body: None,
            headers: HeaderMap::new(),
            requires_auth: true,
            timeout: None,
            retry_on_402: true,
        }
    }

    /// `GET path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH path`.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query.insert(key, value);
        self
    }

    /// Adds a query parameter when `value` is present.
    #[must_use]
    pub fn query_opt<V: Into<QueryValue>>(
        mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        self.query.insert_opt(key, value);
        self
    }

    /// Sets a body.
    #[must_use]
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(self, value: Value) -> Self {
        self.body(RequestBody::Json(value))
    }

    /// Sets a raw byte body.
    #[must_use]
    pub fn bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(RequestBody::Bytes(bytes.into()))
    }

    /// Sets a text body.
    #[must_use]
    pub fn text(self, text: impl Into<String>) -> Self {
        self.body(RequestBody::Text(text.into()))
    }

    /// Sets a multipart body.
    #[must_use]
    pub fn multipart(self, form: MultipartForm) -> Self {
        self.body(RequestBody::Multipart(form))
    }

    /// Sets a header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sends the request without the bearer credential.
    #[must_use]
    pub const fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Overrides the client timeout for this call.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Surfaces 402 responses without invoking the payer.
    #[must_use]
    pub const fn without_payment_retry(mut self) -> Self {
        self.retry_on_402 = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let request = ApiRequest::get("/v1/agents/me");
        assert_eq!(request.method, Method::GET);
        assert!(request.requires_auth);
        assert!(request.retry_on_402);
        assert!(request.body.is_none());
        assert!(request.timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let request = ApiRequest::patch("/v1/kv/item")
            .query("ttl", 60)
            .query_opt("namespace", None::<String>)
            .json(json!({"value": 1}))
            .header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/merge-patch+json"),
            )
            .without_auth()
            .timeout(Duration::from_secs(5))
            .without_payment_retry();

        assert_eq!(request.query.encode(), "ttl=60");
        assert_eq!(request.body, Some(RequestBody::Json(json!({"value": 1}))));
        assert_eq!(
            request.headers[http::header::CONTENT_TYPE],
            "application/merge-patch+json"
        );
        assert!(!request.requires_auth);
        assert!(!request.retry_on_402);
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }
}
