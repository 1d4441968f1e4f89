//! Built-in payer that settles challenges through the Deva wallet.

use std::sync::Arc;
use std::time::Duration;

use http::header::AUTHORIZATION;
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use deva_x402::{
    ApiError, BoxFuture, DevaError, Payer, PaymentChallenge, PaymentContext, PaymentResult,
};

use crate::body::RequestBody;
use crate::constants::{DEFAULT_TIMEOUT, DEFAULT_WALLET_PAY_PATH};
use crate::credential::Credential;
use crate::send::{HttpSend, WireRequest};
use crate::url::{Query, build_url};

/// Keys the wallet may use for the authorization value, in priority order.
const AUTHORIZATION_KEYS: [&str; 3] = [
    "authorization",
    "payment_authorization",
    "paymentAuthorization",
];

#[derive(Serialize)]
struct WalletPayRequest<'a> {
    challenge: &'a PaymentChallenge,
    request: &'a PaymentContext,
}

/// [`Payer`] that posts the challenge to the wallet pay endpoint.
///
/// Uses the same network layer, base URL and credential as the client that
/// owns it. A non-2xx answer from the wallet fails the payment with the
/// wallet's status and message.
#[derive(Clone)]
pub struct WalletPayer {
    sender: Arc<dyn HttpSend>,
    base_url: String,
    credential: Credential,
    pay_path: String,
    timeout: Duration,
}

impl std::fmt::Debug for WalletPayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletPayer")
            .field("base_url", &self.base_url)
            .field("pay_path", &self.pay_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl WalletPayer {
    /// Creates a payer posting to `base_url` + the default pay path.
    #[must_use]
    pub fn new(
        sender: Arc<dyn HttpSend>,
        base_url: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            sender,
            base_url: base_url.into(),
            credential,
            pay_path: DEFAULT_WALLET_PAY_PATH.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the pay endpoint path.
    #[must_use]
    pub fn with_pay_path(mut self, pay_path: impl Into<String>) -> Self {
        self.pay_path = pay_path.into();
        self
    }

    /// Overrides the timeout of the pay call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL of the pay endpoint.
    #[must_use]
    pub fn pay_url(&self) -> String {
        build_url(&self.base_url, &self.pay_path, &Query::new())
    }

    async fn settle(
        &self,
        challenge: &PaymentChallenge,
        context: &PaymentContext,
    ) -> Result<PaymentResult, DevaError> {
        let api_key = self.credential.get().ok_or_else(|| {
            DevaError::Configuration("Cannot auto-pay x402 challenge: missing API key.".to_owned())
        })?;

        let url = self.pay_url();
        let url = Url::parse(&url)
            .map_err(|err| DevaError::Configuration(format!("invalid wallet URL {url}: {err}")))?;
        let encoded = RequestBody::json(&WalletPayRequest {
            challenge,
            request: context,
        })?
        .encode()?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, crate::credential::bearer_header(&api_key)?);
        encoded.apply_content_type(&mut headers);

        #[cfg(feature = "telemetry")]
        tracing::debug!(url = %url, "Settling payment challenge through wallet");

        let request = WireRequest {
            method: Method::POST,
            url,
            headers,
            body: encoded.body,
        };
        let (status, text) = tokio::time::timeout(self.timeout, async {
            let response = self.sender.send(request).await?;
            let status = response.status;
            Ok::<_, deva_x402::BoxError>((status, response.text().await?))
        })
        .await
        .map_err(|_| DevaError::timeout(self.timeout))?
        .map_err(|err| {
            DevaError::transport(format!("Wallet auto-pay request failed: {err}"), Some(err))
        })?;

        let payload = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        };

        if !status.is_success() {
            let message = payload
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Wallet auto-pay failed.");
            let mut error = ApiError::new(status.as_u16(), message);
            if let Some(payload) = payload {
                error = error.with_details(Value::Object(payload));
            }
            #[cfg(feature = "telemetry")]
            tracing::warn!(status = status.as_u16(), "Wallet auto-pay failed");
            return Err(DevaError::from_response(error, None));
        }

        Ok(payment_result(payload))
    }
}

fn payment_result(payload: Option<Map<String, Value>>) -> PaymentResult {
    let text = |key: &str| {
        payload
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };

    PaymentResult {
        paid: true,
        authorization_header: AUTHORIZATION_KEYS.iter().find_map(|key| text(key)),
        proof: text("proof"),
        metadata: payload,
    }
}

impl Payer for WalletPayer {
    fn pay<'a>(
        &'a self,
        challenge: &'a PaymentChallenge,
        context: &'a PaymentContext,
    ) -> BoxFuture<'a, Result<PaymentResult, DevaError>> {
        Box::pin(self.settle(challenge, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send::ReqwestSender;
    use http::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn challenge() -> PaymentChallenge {
        PaymentChallenge {
            scheme: Some("exact".to_owned()),
            amount: Some("0.01".into()),
            pay_to: Some("0xabc".to_owned()),
            ..PaymentChallenge::default()
        }
    }

    fn context() -> PaymentContext {
        PaymentContext::new(
            "/v1/ai/chat",
            &Method::POST,
            StatusCode::PAYMENT_REQUIRED,
            &HeaderMap::new(),
        )
    }

    fn payer(server: &MockServer, api_key: Option<&str>) -> WalletPayer {
        WalletPayer::new(
            Arc::new(ReqwestSender::new()),
            server.uri(),
            Credential::new(api_key.map(str::to_owned)),
        )
    }

    #[tokio::test]
    async fn test_pays_through_wallet_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agents/wallet/pay"))
            .and(header("authorization", "Bearer sk_test"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "challenge": {"scheme": "exact", "amount": "0.01", "pay_to": "0xabc"},
                "request": {"path": "/v1/ai/chat", "method": "POST", "status": 402, "headers": {}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "proof": "p1",
                "payment_authorization": "auth-1",
                "tx": "0xdead"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = payer(&server, Some("sk_test"))
            .pay(&challenge(), &context())
            .await
            .unwrap();

        assert!(result.paid);
        assert_eq!(result.proof.as_deref(), Some("p1"));
        assert_eq!(result.authorization_header.as_deref(), Some("auth-1"));
        assert_eq!(
            result.metadata.unwrap().get("tx"),
            Some(&json!("0xdead"))
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = payer(&server, None)
            .pay(&challenge(), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, DevaError::Configuration(_)));
        assert!(err.message().contains("missing API key"));
    }

    #[tokio::test]
    async fn test_wallet_error_uses_wallet_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/custom/pay"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"message": "Insufficient wallet balance"})),
            )
            .mount(&server)
            .await;

        let err = payer(&server, Some("sk_test"))
            .with_pay_path("/custom/pay")
            .pay(&challenge(), &context())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(409));
        assert_eq!(err.message(), "Insufficient wallet balance");
        assert_eq!(
            err.details(),
            Some(&json!({"message": "Insufficient wallet balance"}))
        );
    }

    #[tokio::test]
    async fn test_wallet_error_without_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = payer(&server, Some("sk_test"))
            .pay(&challenge(), &context())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.message(), "Wallet auto-pay failed.");
        assert!(err.details().is_none());
    }

    #[test]
    fn test_payment_result_prefers_authorization_key() {
        let payload = json!({"authorization": "a", "paymentAuthorization": "b"});
        let Value::Object(payload) = payload else {
            unreachable!()
        };
        let result = payment_result(Some(payload));
        assert_eq!(result.authorization_header.as_deref(), Some("a"));
        assert!(result.proof.is_none());

        let result = payment_result(None);
        assert!(result.paid);
        assert!(result.metadata.is_none());
    }

    #[test]
    fn test_pay_url_trims_base() {
        let payer = WalletPayer::new(
            Arc::new(ReqwestSender::new()),
            "https://api.deva.me/",
            Credential::default(),
        );
        assert_eq!(payer.pay_url(), "https://api.deva.me/v1/agents/wallet/pay");
    }
}
