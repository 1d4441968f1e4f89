//! The pluggable payment capability.
//!
//! A [`Payer`] receives the parsed [`PaymentChallenge`] together with a
//! [`PaymentContext`] describing the request that was refused, and either
//! declines or returns a [`PaymentResult`] whose authorization and proof are
//! attached to the retried request. The executor never special-cases a
//! particular payer; the built-in wallet payer in `deva-http` sits behind
//! the same trait.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::challenge::PaymentChallenge;
use crate::error::DevaError;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The request a challenge was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentContext {
    /// Request path, without base URL or query.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Status of the response that carried the challenge.
    pub status: u16,
    /// Response headers, lower-cased; repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
}

impl PaymentContext {
    /// Builds the context for a refused request.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Self {
        let mut flattened: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            flattened
                .entry(name.as_str().to_owned())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_owned());
        }

        Self {
            path: path.into(),
            method: method.as_str().to_owned(),
            status: status.as_u16(),
            headers: flattened,
        }
    }
}

/// Outcome of a payment attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    /// Whether the challenge was paid.
    pub paid: bool,
    /// Value for the `x-payment-authorization` header of the retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_header: Option<String>,
    /// Value for the `x-payment-proof` header of the retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    /// Free-form data returned by the payer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl PaymentResult {
    /// A declined payment; the executor raises the 402 to the caller.
    #[must_use]
    pub fn declined() -> Self {
        Self::default()
    }

    /// A successful payment with no credentials yet attached.
    #[must_use]
    pub fn paid() -> Self {
        Self {
            paid: true,
            ..Self::default()
        }
    }

    /// Sets the authorization header value.
    #[must_use]
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization_header = Some(authorization.into());
        self
    }

    /// Sets the payment proof.
    #[must_use]
    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.proof = Some(proof.into());
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Settles payment challenges.
///
/// Implementations may perform network I/O. An `Err` is propagated to the
/// caller as is; the executor does not retry it.
///
/// # Examples
///
/// ```
/// use deva_x402::{BoxFuture, DevaError, Payer, PaymentChallenge, PaymentContext, PaymentResult};
///
/// struct Prepaid(String);
///
/// impl Payer for Prepaid {
///     fn pay<'a>(
///         &'a self,
///         _challenge: &'a PaymentChallenge,
///         _context: &'a PaymentContext,
///     ) -> BoxFuture<'a, Result<PaymentResult, DevaError>> {
///         Box::pin(async move { Ok(PaymentResult::paid().with_proof(self.0.clone())) })
///     }
/// }
/// ```
pub trait Payer: Send + Sync {
    /// Attempts to pay `challenge` for the request described by `context`.
    fn pay<'a>(
        &'a self,
        challenge: &'a PaymentChallenge,
        context: &'a PaymentContext,
    ) -> BoxFuture<'a, Result<PaymentResult, DevaError>>;
}

/// [`Payer`] backed by an async closure.
///
/// The closure receives owned copies of the challenge and context.
pub struct PayerFn<F> {
    pay: F,
}

impl<F> fmt::Debug for PayerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayerFn").finish_non_exhaustive()
    }
}

impl<F, Fut> PayerFn<F>
where
    F: Fn(PaymentChallenge, PaymentContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PaymentResult, DevaError>> + Send + 'static,
{
    /// Wraps `pay` as a [`Payer`].
    pub const fn new(pay: F) -> Self {
        Self { pay }
    }
}

impl<F, Fut> Payer for PayerFn<F>
where
    F: Fn(PaymentChallenge, PaymentContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PaymentResult, DevaError>> + Send + 'static,
{
    fn pay<'a>(
        &'a self,
        challenge: &'a PaymentChallenge,
        context: &'a PaymentContext,
    ) -> BoxFuture<'a, Result<PaymentResult, DevaError>> {
        Box::pin((self.pay)(challenge.clone(), context.clone()))
    }
}

/// [`Payer`] that declines every challenge.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclinePayer;

impl Payer for DeclinePayer {
    fn pay<'a>(
        &'a self,
        _challenge: &'a PaymentChallenge,
        _context: &'a PaymentContext,
    ) -> BoxFuture<'a, Result<PaymentResult, DevaError>> {
        #[cfg(feature = "telemetry")]
        tracing::debug!("Declining payment challenge");
        Box::pin(async { Ok(PaymentResult::declined()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn context() -> PaymentContext {
        PaymentContext::new(
            "/v1/ai/chat",
            &Method::POST,
            StatusCode::PAYMENT_REQUIRED,
            &HeaderMap::new(),
        )
    }

    #[test]
    fn test_context_joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("x-payment-scheme", HeaderValue::from_static("exact"));
        headers.append("vary", HeaderValue::from_static("accept"));
        headers.append("vary", HeaderValue::from_static("origin"));

        let ctx =
            PaymentContext::new("/v1/kv", &Method::GET, StatusCode::PAYMENT_REQUIRED, &headers);

        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.status, 402);
        assert_eq!(
            ctx.headers.get("x-payment-scheme").map(String::as_str),
            Some("exact")
        );
        assert_eq!(
            ctx.headers.get("vary").map(String::as_str),
            Some("accept, origin")
        );
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = PaymentResult::paid().with_authorization("auth").with_proof("p1");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({"paid": true, "authorizationHeader": "auth", "proof": "p1"})
        );
    }

    #[tokio::test]
    async fn test_payer_fn_receives_challenge() {
        let payer = PayerFn::new(|challenge: PaymentChallenge, ctx: PaymentContext| async move {
            assert_eq!(ctx.path, "/v1/ai/chat");
            Ok(PaymentResult::paid().with_proof(challenge.token.unwrap_or_default()))
        });
        let challenge = PaymentChallenge {
            token: Some("tok".to_owned()),
            ..PaymentChallenge::default()
        };

        let result = payer.pay(&challenge, &context()).await.unwrap();
        assert!(result.paid);
        assert_eq!(result.proof.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_decline_payer() {
        let result = DeclinePayer
            .pay(&PaymentChallenge::default(), &context())
            .await
            .unwrap();
        assert!(!result.paid);
        assert!(result.proof.is_none());
    }
}
