//! The replaceable network layer.
//!
//! The executor talks to the network only through [`HttpSend`]. The default
//! implementation is [`ReqwestSender`]; tests and embedders can substitute
//! their own, either by implementing the trait or with [`SendFn`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use deva_x402::{BoxError, BoxFuture};

use crate::body::WireBody;

/// A stream of response body chunks.
pub type ByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// A fully prepared request.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Final headers, authorization included.
    pub headers: HeaderMap,
    /// Encoded body.
    pub body: WireBody,
}

/// A response whose body has not been read yet.
pub struct WireResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body stream, `None` when the response has no body.
    pub body: Option<ByteStream>,
}

impl fmt::Debug for WireResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl WireResponse {
    /// A response without a body.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A response whose body is delivered in one chunk.
    #[must_use]
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::from_chunks(status, [body.into()])
    }

    /// A response whose body is delivered as the given chunks.
    #[must_use]
    pub fn from_chunks<I>(status: StatusCode, chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Some(Box::pin(stream::iter(chunks).map(Ok::<Bytes, BoxError>))),
        }
    }

    /// Adds a response header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Takes the body stream.
    #[must_use]
    pub fn into_body(self) -> Option<ByteStream> {
        self.body
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the body stream.
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        let Some(body) = self.body else {
            return Ok(Bytes::new());
        };
        let collected = body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(collected.freeze())
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the body stream.
    pub async fn text(self) -> Result<String, BoxError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Sends a prepared request and returns the response head and body stream.
///
/// Implementations report only failures to obtain a response; non-2xx
/// statuses are returned as regular responses.
pub trait HttpSend: Send + Sync {
    /// Performs one request.
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse, BoxError>>;
}

impl<T: HttpSend + ?Sized> HttpSend for Arc<T> {
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse, BoxError>> {
        (**self).send(request)
    }
}

/// [`HttpSend`] backed by a [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    /// Creates a sender with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sender that reuses `client`.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpSend for ReqwestSender {
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse, BoxError>> {
        Box::pin(async move {
            let builder = self
                .client
                .request(request.method, request.url)
                .headers(request.headers);
            let builder = match request.body {
                WireBody::Empty => builder,
                WireBody::Bytes(bytes) => builder.body(bytes),
                WireBody::Text(text) => builder.body(text),
                WireBody::Multipart(form) => builder.multipart(form.to_reqwest()?),
            };

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body: ByteStream =
                Box::pin(response.bytes_stream().map_err(|err| Box::new(err) as BoxError));

            Ok::<_, BoxError>(WireResponse {
                status,
                headers,
                body: Some(body),
            })
        })
    }
}

/// [`HttpSend`] backed by an async closure.
pub struct SendFn<F> {
    send: F,
}

impl<F> fmt::Debug for SendFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFn").finish_non_exhaustive()
    }
}

impl<F, Fut> SendFn<F>
where
    F: Fn(WireRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WireResponse, BoxError>> + Send + 'static,
{
    /// Wraps `send` as an [`HttpSend`].
    pub const fn new(send: F) -> Self {
        Self { send }
    }
}

impl<F, Fut> HttpSend for SendFn<F>
where
    F: Fn(WireRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WireResponse, BoxError>> + Send + 'static,
{
    fn send(&self, request: WireRequest) -> BoxFuture<'_, Result<WireResponse, BoxError>> {
        Box::pin((self.send)(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::MultipartForm;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(server: &MockServer, method: Method, route: &str, body: WireBody) -> WireRequest {
        WireRequest {
            method,
            url: Url::parse(&format!("{}{route}", server.uri())).unwrap(),
            headers: HeaderMap::new(),
            body,
        }
    }

    #[tokio::test]
    async fn test_reqwest_sender_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/echo"))
            .and(header("x-trace", "abc"))
            .and(body_string("ping"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-request-id", "r-1")
                    .set_body_string("pong"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut req = request(
            &server,
            Method::POST,
            "/v1/echo",
            WireBody::Text("ping".to_owned()),
        );
        req.headers
            .insert("x-trace", HeaderValue::from_static("abc"));

        let response = ReqwestSender::new().send(req).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers["x-request-id"], "r-1");
        assert_eq!(response.text().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_reqwest_sender_returns_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let response = ReqwestSender::new()
            .send(request(&server, Method::GET, "/x", WireBody::Empty))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().await.unwrap(), "busy");
    }

    #[tokio::test]
    async fn test_reqwest_sender_sends_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let form = MultipartForm::new()
            .text("purpose", "avatar")
            .file("file", "a.txt", "hello", Some("text/plain"));
        ReqwestSender::new()
            .send(request(
                &server,
                Method::POST,
                "/v1/files",
                WireBody::Multipart(form),
            ))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let content_type = received[0].headers["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"purpose\""));
        assert!(body.contains("filename=\"a.txt\""));
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url = Url::parse(&format!("http://127.0.0.1:{port}/gone")).unwrap();

        let result = ReqwestSender::new()
            .send(WireRequest {
                method: Method::GET,
                url,
                headers: HeaderMap::new(),
                body: WireBody::Empty,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_fn_and_body_helpers() {
        let sender = SendFn::new(|req: WireRequest| async move {
            Ok::<_, BoxError>(WireResponse::from_chunks(
                StatusCode::OK,
                vec![
                    Bytes::from(req.url.path().to_owned()),
                    Bytes::from_static(b"!"),
                ],
            ))
        });
        let response = sender
            .send(WireRequest {
                method: Method::GET,
                url: Url::parse("http://localhost/hello").unwrap(),
                headers: HeaderMap::new(),
                body: WireBody::Empty,
            })
            .await
            .unwrap();
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"/hello!"));

        assert_eq!(
            WireResponse::empty(StatusCode::NO_CONTENT).text().await.unwrap(),
            ""
        );
    }
}
