//! Error types for the Deva API transport.
//!
//! Every failure reaches callers as a [`DevaError`]. The variants separate
//! the failure classes (configuration, transport, API, payment), while the
//! accessors on [`DevaError`] expose one normalized shape: status, code,
//! message, details, balance, required amount and payment challenge.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::challenge::PaymentChallenge;

/// Boxed error used for failures of the underlying network layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Statuses that indicate a transient server-side condition.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Returns `true` if a response with this status is worth retrying.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Errors surfaced by the Deva API transport.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DevaError {
    /// The client is not configured to make this call (e.g. no API key).
    ///
    /// Raised before any network I/O and never retried.
    #[error("{0}")]
    Configuration(String),

    /// The request never produced an HTTP response.
    ///
    /// Covers connection failures, timeouts and failures while reading a
    /// response body, once the transient retry budget is spent.
    #[error("{message}")]
    Transport {
        /// Human-readable description of the failure.
        message: String,
        /// Whether the per-call timeout fired.
        timed_out: bool,
        /// The underlying network error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The API answered with a non-2xx status other than 402.
    #[error("{0}")]
    Api(Box<ApiError>),

    /// The API answered 402 and the payment was declined, failed or ran out
    /// of retries.
    #[error("{0}")]
    PaymentRequired(Box<PaymentRequiredError>),

    /// A JSON value could not be converted to or from a typed payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DevaError {
    /// Error raised when an authenticated call is made without an API key.
    #[must_use]
    pub fn missing_credential() -> Self {
        Self::Configuration(
            "No API key configured. Pass an API key when creating the client.".to_owned(),
        )
    }

    /// Wraps a network-layer failure.
    #[must_use]
    pub fn transport(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
            source,
        }
    }

    /// Error raised when a call exceeds its timeout.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Transport {
            message: format!("request timed out after {}ms", after.as_millis()),
            timed_out: true,
            source: None,
        }
    }

    /// Builds the error for a non-2xx response.
    ///
    /// A 402 status always yields [`DevaError::PaymentRequired`], so the
    /// challenge is attached exactly when the status is 402.
    #[must_use]
    pub fn from_response(error: ApiError, challenge: Option<PaymentChallenge>) -> Self {
        if error.status == http::StatusCode::PAYMENT_REQUIRED.as_u16() {
            Self::PaymentRequired(Box::new(PaymentRequiredError { error, challenge }))
        } else {
            Self::Api(Box::new(error))
        }
    }

    /// Returns the API error body, for [`Api`](Self::Api) and
    /// [`PaymentRequired`](Self::PaymentRequired).
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(&**err),
            Self::PaymentRequired(err) => Some(&err.error),
            _ => None,
        }
    }

    /// HTTP status code, absent for failures without a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|err| err.status)
    }

    /// Machine-readable error code reported by the server.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.api_error().and_then(|err| err.code.as_deref())
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Configuration(message) | Self::Transport { message, .. } => message.clone(),
            Self::Api(err) => err.message.clone(),
            Self::PaymentRequired(err) => err.error.message.clone(),
            Self::Json(err) => err.to_string(),
        }
    }

    /// Arbitrary details reported by the server.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.api_error().and_then(|err| err.details.as_ref())
    }

    /// Current balance reported by the server.
    #[must_use]
    pub fn balance(&self) -> Option<f64> {
        self.api_error().and_then(|err| err.balance)
    }

    /// Amount the server requires for the call.
    #[must_use]
    pub fn required(&self) -> Option<f64> {
        self.api_error().and_then(|err| err.required)
    }

    /// The unresolved payment challenge of a 402 failure.
    #[must_use]
    pub fn payment_challenge(&self) -> Option<&PaymentChallenge> {
        match self {
            Self::PaymentRequired(err) => err.challenge.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` if the server answered with a transient status
    /// (429, 500, 502, 503 or 504).
    #[must_use]
    pub fn is_retryable_status(&self) -> bool {
        self.status().is_some_and(is_retryable_status)
    }

    /// Returns `true` if this is a [`DevaError::PaymentRequired`].
    #[must_use]
    pub const fn is_payment_required(&self) -> bool {
        matches!(self, Self::PaymentRequired(_))
    }

    /// Returns `true` if the per-call timeout fired.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timed_out: true, .. })
    }
}

/// Error payload of a non-2xx API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Machine-readable error code.
    pub code: Option<String>,
    /// Human-readable message, `HTTP <status>` when the server sent none.
    pub message: String,
    /// Arbitrary details.
    pub details: Option<Value>,
    /// Current balance, reported on insufficient-funds failures.
    pub balance: Option<f64>,
    /// Required amount, reported on insufficient-funds failures.
    pub required: Option<f64>,
}

impl ApiError {
    /// Creates an error with only a status and message.
    #[must_use]
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
            details: None,
            balance: None,
            required: None,
        }
    }

    /// Normalizes a decoded error body.
    ///
    /// Fields are read from a nested `error` object first and from the top
    /// level otherwise. A bare string under `error` is used as the message
    /// when no `message` field exists.
    #[must_use]
    pub fn from_payload(status: u16, payload: &Value) -> Self {
        let root = payload.as_object();
        let nested = root
            .and_then(|root| root.get("error"))
            .and_then(Value::as_object);
        let field = |key: &str| lookup(nested, key).or_else(|| lookup(root, key));

        let message = field("message")
            .and_then(Value::as_str)
            .or_else(|| {
                root.and_then(|root| root.get("error"))
                    .and_then(Value::as_str)
            })
            .map_or_else(|| format!("HTTP {status}"), str::to_owned);

        Self {
            status,
            code: field("code").and_then(Value::as_str).map(str::to_owned),
            message,
            details: field("details").cloned(),
            balance: field("balance").and_then(Value::as_f64),
            required: field("required").and_then(Value::as_f64),
        }
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the details payload.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn lookup<'a>(object: Option<&'a Map<String, Value>>, key: &str) -> Option<&'a Value> {
    object?.get(key).filter(|value| !value.is_null())
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{code}: {}", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ApiError {}

/// A 402 response that could not be resolved by payment.
///
/// Carries the unresolved challenge so callers can inspect the terms or hand
/// them to a different payer.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequiredError {
    /// The normalized error body (status is always 402).
    pub error: ApiError,
    /// The challenge parsed from the response, if the server sent one.
    pub challenge: Option<PaymentChallenge>,
}

impl fmt::Display for PaymentRequiredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payment required: {}", self.error)
    }
}

impl std::error::Error for PaymentRequiredError {}
