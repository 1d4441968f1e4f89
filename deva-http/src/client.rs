//! The request executor.
//!
//! [`DevaHttpClient::execute`] sends an [`ApiRequest`] and drives two
//! independent retry loops around it:
//!
//! - transient failures (network errors, timeouts and 429/5xx statuses) are
//!   retried up to `max_retries` times, waiting 300 ms and doubling between
//!   attempts;
//! - a 402 carrying a payment challenge is handed to the configured
//!   [`Payer`], and when it pays, the request is retried with the
//!   `x-payment-authorization` and `x-payment-proof` headers it returned.
//!
//! A successful body is returned as JSON; every other outcome is a
//! [`DevaError`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use url::Url;

use deva_x402::{
    ApiError, BoxError, DevaError, PaymentChallenge, PaymentContext, PaymentResult, Payer,
};

use crate::body::{EncodedBody, RequestBody};
use crate::config::{ClientConfig, PaymentConfig};
use crate::constants::{
    EVENT_STREAM_CONTENT_TYPE, PAYMENT_AUTHORIZATION_HEADER, PAYMENT_PROOF_HEADER,
    is_retryable_status,
};
use crate::credential::Credential;
use crate::request::ApiRequest;
use crate::send::{HttpSend, ReqwestSender, WireRequest, WireResponse};
use crate::sse::SseStream;
use crate::url::{Query, build_url};
use crate::wallet::WalletPayer;

#[cfg(feature = "telemetry")]
use tracing::{debug, info, instrument, warn};

/// Payment settings resolved at construction.
#[derive(Clone)]
struct PaymentPolicy {
    enabled: bool,
    max_retries: u32,
    payer: Option<Arc<dyn Payer>>,
}

impl PaymentPolicy {
    fn payer(&self) -> Option<&dyn Payer> {
        if self.enabled {
            self.payer.as_deref()
        } else {
            None
        }
    }
}

/// Exponential backoff for transient failures.
struct Backoff {
    retries: u32,
    max_retries: u32,
    delay: Duration,
}

impl Backoff {
    const fn new(max_retries: u32, initial: Duration) -> Self {
        Self {
            retries: 0,
            max_retries,
            delay: initial,
        }
    }

    /// Sleeps and returns `true` if another attempt is allowed.
    async fn wait(&mut self) -> bool {
        if self.retries >= self.max_retries {
            return false;
        }
        self.retries += 1;
        #[cfg(feature = "telemetry")]
        debug!(
            retry = self.retries,
            delay_ms = self.delay.as_millis(),
            "Backing off before retry"
        );
        tokio::time::sleep(self.delay).await;
        self.delay = self.delay.saturating_mul(2);
        true
    }
}

/// HTTP client for the Deva API.
///
/// Cheap to clone; clones share the network layer and the API key.
///
/// ```no_run
/// use deva_http::{ApiRequest, ClientConfig, DevaHttpClient, PaymentConfig};
/// use serde_json::json;
///
/// # async fn run() -> Result<(), deva_http::DevaError> {
/// let client = DevaHttpClient::new(
///     ClientConfig::default()
///         .with_api_key("sk_live_...")
///         .with_payments(PaymentConfig::default().with_wallet_auto_pay(true)),
/// );
/// let reply = client
///     .execute(&ApiRequest::post("/v1/ai/chat").json(json!({"messages": []})))
///     .await?;
/// println!("{reply}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DevaHttpClient {
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    sender: Arc<dyn HttpSend>,
    credential: Credential,
    payments: PaymentPolicy,
}

impl fmt::Debug for DevaHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevaHttpClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("credential", &self.credential)
            .field("payments_enabled", &self.payments.enabled)
            .finish_non_exhaustive()
    }
}

impl Default for DevaHttpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl DevaHttpClient {
    /// Creates a client from `config`.
    ///
    /// When wallet auto-pay is enabled and no custom payer is set, a
    /// [`WalletPayer`] sharing this client's sender, base URL and credential
    /// is installed.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_owned();
        let sender = config
            .sender
            .unwrap_or_else(|| Arc::new(ReqwestSender::new()));
        let credential = Credential::new(config.api_key);

        let PaymentConfig {
            enabled,
            max_retries,
            payer,
            wallet_auto_pay,
            wallet_pay_path,
        } = config.payments;
        let payer = payer.or_else(|| {
            wallet_auto_pay.then(|| {
                let wallet = WalletPayer::new(Arc::clone(&sender), &base_url, credential.clone())
                    .with_pay_path(wallet_pay_path)
                    .with_timeout(config.timeout);
                Arc::new(wallet) as Arc<dyn Payer>
            })
        });

        Self {
            base_url,
            timeout: config.timeout,
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            sender,
            credential,
            payments: PaymentPolicy {
                enabled,
                max_retries,
                payer,
            },
        }
    }

    /// Creates a client configured from the environment.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self, DevaError> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    /// Base URL without trailing slashes.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The shared credential handle.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// The current API key.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.credential.get()
    }

    /// Replaces the API key for subsequent attempts.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.credential.set(api_key);
    }

    /// Removes the API key.
    pub fn clear_api_key(&self) {
        self.credential.clear();
    }

    /// URL a request for `path` and `query` is sent to.
    #[must_use]
    pub fn build_url(&self, path: &str, query: &Query) -> String {
        build_url(&self.base_url, path, query)
    }

    /// Sends `request` and returns the decoded JSON body.
    ///
    /// An empty success body yields an empty object and a body that is not
    /// JSON yields `{"raw": <text>}`.
    ///
    /// # Errors
    ///
    /// - [`DevaError::Configuration`] if the call needs a credential and none
    ///   is set; no request is sent.
    /// - [`DevaError::Transport`] once transient retries are exhausted on a
    ///   network failure or timeout.
    /// - [`DevaError::Api`] for a non-2xx status other than 402.
    /// - [`DevaError::PaymentRequired`] for a 402 that was not paid.
    /// - Any error returned by the payer, unchanged.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "deva.http.execute",
            skip_all,
            fields(method = %request.method, path = %request.path),
            err
        )
    )]
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, DevaError> {
        let url = self.request_url(request)?;
        let encoded = encode_body(request)?;
        let timeout = request.timeout.unwrap_or(self.timeout);
        let mut backoff = Backoff::new(self.max_retries, self.initial_backoff);
        let mut payment_headers = HeaderMap::new();
        let mut payments_made = 0_u32;

        loop {
            let wire = self.wire_request(request, &url, &encoded, &payment_headers)?;
            let (status, headers, text) = match self.attempt(wire, timeout).await {
                Ok(response) => response,
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    warn!(error = %err, "Request attempt failed");
                    if backoff.wait().await {
                        continue;
                    }
                    return Err(err);
                }
            };

            let payload = parse_payload(&text);
            if status.is_success() {
                return Ok(payload);
            }

            let error = ApiError::from_payload(status.as_u16(), &payload);
            if status == StatusCode::PAYMENT_REQUIRED {
                let challenge = PaymentChallenge::parse(&headers, Some(&payload));
                if let Some(challenge) = &challenge
                    && request.retry_on_402
                    && payments_made < self.payments.max_retries
                    && let Some(payer) = self.payments.payer()
                {
                    let context =
                        PaymentContext::new(request.path.as_str(), &request.method, status, &headers);
                    let result = payer.pay(challenge, &context).await?;
                    if result.paid {
                        payments_made += 1;
                        apply_payment(&mut payment_headers, &result)?;
                        #[cfg(feature = "telemetry")]
                        info!(payments_made, "Payment settled, retrying request");
                        continue;
                    }
                    #[cfg(feature = "telemetry")]
                    debug!("Payer declined the challenge");
                }
                return Err(DevaError::from_response(error, challenge));
            }

            if is_retryable_status(status.as_u16()) && backoff.wait().await {
                continue;
            }
            return Err(DevaError::from_response(error, None));
        }
    }

    /// Like [`execute`](Self::execute), decoding the body into `T`.
    ///
    /// # Errors
    ///
    /// Everything [`execute`](Self::execute) returns, plus
    /// [`DevaError::Json`] when the body does not match `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, DevaError> {
        let value = self.execute(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends `request` once and returns the response unread.
    ///
    /// No retries and no payment handling; non-2xx responses are returned as
    /// is. The timeout covers the response head only.
    ///
    /// # Errors
    ///
    /// [`DevaError::Configuration`] for a missing credential and
    /// [`DevaError::Transport`] when no response arrives.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "deva.http.raw",
            skip_all,
            fields(method = %request.method, path = %request.path),
            err
        )
    )]
    pub async fn raw(&self, request: &ApiRequest) -> Result<WireResponse, DevaError> {
        let url = self.request_url(request)?;
        let encoded = encode_body(request)?;
        let wire = self.wire_request(request, &url, &encoded, &HeaderMap::new())?;
        let timeout = request.timeout.unwrap_or(self.timeout);

        match tokio::time::timeout(timeout, self.sender.send(wire)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(transport_error(err)),
            Err(_) => Err(DevaError::timeout(timeout)),
        }
    }

    /// Sends `request` once and decodes the response as an event stream.
    ///
    /// # Errors
    ///
    /// Everything [`raw`](Self::raw) returns, plus [`DevaError::Api`] or
    /// [`DevaError::PaymentRequired`] for a non-2xx status, and
    /// [`DevaError::Transport`] when the response has no body or its error
    /// body cannot be read within the timeout.
    pub async fn stream<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<SseStream<T>, DevaError> {
        let mut request = request.clone();
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
        let response = self.raw(&request).await?;

        if !response.status.is_success() {
            let status = response.status;
            let headers = response.headers.clone();
            let timeout = request.timeout.unwrap_or(self.timeout);
            let text = match tokio::time::timeout(timeout, response.text()).await {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => return Err(transport_error(err)),
                Err(_) => return Err(DevaError::timeout(timeout)),
            };
            let payload = parse_payload(&text);
            let mut error = ApiError::from_payload(status.as_u16(), &payload);
            if payload.get("raw").is_some() && !text.trim().is_empty() {
                error.message = text.trim().to_owned();
            }
            let challenge = if status == StatusCode::PAYMENT_REQUIRED {
                PaymentChallenge::parse(&headers, Some(&payload))
            } else {
                None
            };
            return Err(DevaError::from_response(error, challenge));
        }

        let body = response.into_body().ok_or_else(|| {
            DevaError::transport("No response stream returned by server.", None)
        })?;
        Ok(SseStream::new(body))
    }

    fn request_url(&self, request: &ApiRequest) -> Result<Url, DevaError> {
        let url = self.build_url(&request.path, &request.query);
        Url::parse(&url)
            .map_err(|err| DevaError::Configuration(format!("invalid request URL {url}: {err}")))
    }

    /// Builds one attempt. Header precedence, lowest first: request headers,
    /// payment headers, bearer credential.
    fn wire_request(
        &self,
        request: &ApiRequest,
        url: &Url,
        encoded: &EncodedBody,
        payment_headers: &HeaderMap,
    ) -> Result<WireRequest, DevaError> {
        let mut headers = request.headers.clone();
        encoded.apply_content_type(&mut headers);
        for (name, value) in payment_headers {
            headers.insert(name.clone(), value.clone());
        }
        if request.requires_auth {
            headers.insert(AUTHORIZATION, self.credential.bearer()?);
        }

        Ok(WireRequest {
            method: request.method.clone(),
            url: url.clone(),
            headers,
            body: encoded.body.clone(),
        })
    }

    /// One exchange: send and read the whole body within `timeout`.
    async fn attempt(
        &self,
        request: WireRequest,
        timeout: Duration,
    ) -> Result<(StatusCode, HeaderMap, String), DevaError> {
        let exchange = async {
            let mut response = self.sender.send(request).await?;
            let status = response.status;
            let headers = std::mem::take(&mut response.headers);
            let text = response.text().await?;
            Ok::<_, BoxError>((status, headers, text))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(transport_error(err)),
            Err(_) => Err(DevaError::timeout(timeout)),
        }
    }
}

fn encode_body(request: &ApiRequest) -> Result<EncodedBody, DevaError> {
    request
        .body
        .as_ref()
        .map_or_else(|| Ok(EncodedBody::empty()), RequestBody::encode)
}

fn transport_error(err: BoxError) -> DevaError {
    DevaError::transport(format!("HTTP request failed: {err}"), Some(err))
}

fn parse_payload(text: &str) -> Value {
    if text.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

fn apply_payment(headers: &mut HeaderMap, result: &PaymentResult) -> Result<(), DevaError> {
    let values = [
        (PAYMENT_AUTHORIZATION_HEADER, &result.authorization_header),
        (PAYMENT_PROOF_HEADER, &result.proof),
    ];
    for (name, value) in values {
        let Some(value) = value else {
            continue;
        };
        let value = HeaderValue::from_str(value).map_err(|_| {
            DevaError::Configuration(format!("payer returned an invalid {name} header value"))
        })?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(())
}
