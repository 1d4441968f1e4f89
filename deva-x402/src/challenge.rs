//! Payment challenges carried by `402 Payment Required` responses.
//!
//! The server may describe the payment it wants in response headers
//! (`x-payment-*`, or the unprefixed `payment-*` form), in the JSON body, or
//! in both. [`PaymentChallenge::parse`] merges the two sources field by
//! field: a value embedded in the body wins, the headers fill in the rest.

use std::fmt;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys under which a challenge object may be embedded in a JSON body.
const EMBEDDED_KEYS: [&str; 4] = ["payment_challenge", "paymentChallenge", "challenge", "x402"];

const SCHEME_HEADERS: &[&str] = &["x-payment-scheme", "payment-scheme"];
const NETWORK_HEADERS: &[&str] = &["x-payment-network", "payment-network"];
const AMOUNT_HEADERS: &[&str] = &["x-payment-amount", "payment-amount"];
const PAY_TO_HEADERS: &[&str] = &[
    "x-payment-pay-to",
    "x-payment-pay_to",
    "payment-pay-to",
    "payment-pay_to",
];
const MEMO_HEADERS: &[&str] = &["x-payment-memo", "payment-memo"];
const TOKEN_HEADERS: &[&str] = &["x-payment-token", "payment-token", "www-authenticate"];
const CHALLENGE_ID_HEADERS: &[&str] = &["x-payment-challenge-id", "payment-challenge-id"];
const EXPIRES_AT_HEADERS: &[&str] = &["x-payment-expires-at", "payment-expires-at"];

/// Amount requested by a challenge.
///
/// Servers send it either as a decimal string or as a bare JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChallengeAmount {
    /// A JSON number.
    Number(serde_json::Number),
    /// A string amount, as sent in headers.
    Text(String),
}

impl fmt::Display for ChallengeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ChallengeAmount {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<u64> for ChallengeAmount {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// A server-issued description of the payment required before a request is
/// honored.
///
/// Every field is optional; a challenge is only produced when at least one
/// identifying field is set (see [`PaymentChallenge::is_present`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    /// Payment scheme, e.g. `"exact"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Network the payment settles on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Amount to pay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<ChallengeAmount>,
    /// Payee address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_to: Option<String>,
    /// Free-form memo to attach to the payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Opaque token identifying the challenge to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Challenge identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    /// Expiry timestamp, passed through as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// The JSON the challenge was read from: the embedded challenge object,
    /// or the whole body when none was embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl PaymentChallenge {
    /// Extracts a challenge from a 402 response.
    ///
    /// The embedded object is looked up under `error.<key>` and then
    /// `<key>` for each of `payment_challenge`, `paymentChallenge`,
    /// `challenge` and `x402`. Field names are accepted in snake_case and
    /// camelCase. Empty strings count as missing.
    ///
    /// Returns `None` if no identifying field could be resolved.
    ///
    /// # Examples
    ///
    /// ```
    /// use deva_x402::PaymentChallenge;
    /// use http::HeaderMap;
    /// use serde_json::json;
    ///
    /// let body = json!({"error": {"payment_challenge": {"scheme": "exact", "amount": "100"}}});
    /// let challenge = PaymentChallenge::parse(&HeaderMap::new(), Some(&body)).unwrap();
    /// assert_eq!(challenge.scheme.as_deref(), Some("exact"));
    /// ```
    #[must_use]
    pub fn parse(headers: &HeaderMap, body: Option<&Value>) -> Option<Self> {
        let root = body.and_then(Value::as_object);
        let embedded = root
            .and_then(|root| root.get("error"))
            .and_then(Value::as_object)
            .and_then(find_embedded)
            .or_else(|| root.and_then(find_embedded));

        let text = |keys: &[&str], header_names: &[&str]| {
            embedded
                .and_then(|object| read_text(object, keys))
                .or_else(|| read_header(headers, header_names))
        };

        let challenge = Self {
            scheme: text(&["scheme"], SCHEME_HEADERS),
            network: text(&["network"], NETWORK_HEADERS),
            amount: embedded
                .and_then(|object| object.get("amount"))
                .and_then(read_amount)
                .or_else(|| read_header(headers, AMOUNT_HEADERS).map(ChallengeAmount::Text)),
            pay_to: text(&["pay_to", "payTo"], PAY_TO_HEADERS),
            memo: text(&["memo"], MEMO_HEADERS),
            token: text(&["token"], TOKEN_HEADERS),
            challenge_id: text(&["challenge_id", "challengeId"], CHALLENGE_ID_HEADERS),
            expires_at: text(&["expires_at", "expiresAt"], EXPIRES_AT_HEADERS),
            raw: embedded.or(root).map(|object| Value::Object(object.clone())),
        };

        challenge.is_present().then_some(challenge)
    }

    /// Returns `true` if any identifying field is set.
    ///
    /// The memo, expiry and raw payload alone do not identify a challenge.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.scheme.is_some()
            || self.network.is_some()
            || self.amount.is_some()
            || self.pay_to.is_some()
            || self.token.is_some()
            || self.challenge_id.is_some()
    }
}

fn find_embedded(object: &Map<String, Value>) -> Option<&Map<String, Value>> {
    EMBEDDED_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_object))
}

fn read_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    })
}

fn read_amount(value: &Value) -> Option<ChallengeAmount> {
    match value {
        Value::Number(n) => Some(ChallengeAmount::Number(n.clone())),
        Value::String(s) if !s.is_empty() => Some(ChallengeAmount::Text(s.clone())),
        _ => None,
    }
}

fn read_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_parse_body_only() {
        let body = json!({"error": {"payment_challenge": {"scheme": "exact", "amount": "100"}}});
        let challenge = PaymentChallenge::parse(&HeaderMap::new(), Some(&body)).unwrap();

        assert_eq!(challenge.scheme.as_deref(), Some("exact"));
        assert_eq!(challenge.amount, Some(ChallengeAmount::from("100")));
        assert!(challenge.network.is_none());
        assert_eq!(
            challenge.raw,
            Some(json!({"scheme": "exact", "amount": "100"}))
        );
    }

    #[test]
    fn test_parse_headers_only() {
        let map = headers(&[
            ("x-payment-scheme", "exact"),
            ("x-payment-network", "base-sepolia"),
            ("x-payment-amount", "2500"),
            ("x-payment-pay-to", "0xPayee"),
            ("x-payment-memo", "chat"),
            ("x-payment-token", "tok_1"),
            ("x-payment-challenge-id", "ch_1"),
            ("x-payment-expires-at", "2026-01-01T00:00:00Z"),
        ]);
        let challenge = PaymentChallenge::parse(&map, None).unwrap();

        assert_eq!(challenge.scheme.as_deref(), Some("exact"));
        assert_eq!(challenge.network.as_deref(), Some("base-sepolia"));
        assert_eq!(challenge.amount, Some(ChallengeAmount::from("2500")));
        assert_eq!(challenge.pay_to.as_deref(), Some("0xPayee"));
        assert_eq!(challenge.memo.as_deref(), Some("chat"));
        assert_eq!(challenge.token.as_deref(), Some("tok_1"));
        assert_eq!(challenge.challenge_id.as_deref(), Some("ch_1"));
        assert_eq!(challenge.expires_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert!(challenge.raw.is_none());
    }

    #[test]
    fn test_parse_unprefixed_headers() {
        let map = headers(&[("payment-scheme", "exact"), ("payment-pay_to", "0xAbc")]);
        let challenge = PaymentChallenge::parse(&map, None).unwrap();

        assert_eq!(challenge.scheme.as_deref(), Some("exact"));
        assert_eq!(challenge.pay_to.as_deref(), Some("0xAbc"));
    }

    #[test]
    fn test_body_overrides_headers_field_by_field() {
        let map = headers(&[
            ("x-payment-scheme", "header-scheme"),
            ("x-payment-network", "header-net"),
        ]);
        let body = json!({"challenge": {"scheme": "body-scheme", "payTo": "0xBody"}});
        let challenge = PaymentChallenge::parse(&map, Some(&body)).unwrap();

        assert_eq!(challenge.scheme.as_deref(), Some("body-scheme"));
        assert_eq!(challenge.network.as_deref(), Some("header-net"));
        assert_eq!(challenge.pay_to.as_deref(), Some("0xBody"));
    }

    #[test]
    fn test_parse_camel_case_aliases_and_numeric_amount() {
        let body = json!({
            "paymentChallenge": {
                "amount": 42,
                "challengeId": "c-9",
                "expiresAt": "soon"
            }
        });
        let challenge = PaymentChallenge::parse(&HeaderMap::new(), Some(&body)).unwrap();

        assert_eq!(challenge.amount, Some(ChallengeAmount::from(42)));
        assert_eq!(challenge.amount.unwrap().to_string(), "42");
        assert_eq!(challenge.challenge_id.as_deref(), Some("c-9"));
        assert_eq!(challenge.expires_at.as_deref(), Some("soon"));
    }

    #[test]
    fn test_error_nested_wins_over_root() {
        let body = json!({
            "x402": {"scheme": "root"},
            "error": {"x402": {"scheme": "nested"}}
        });
        let challenge = PaymentChallenge::parse(&HeaderMap::new(), Some(&body)).unwrap();
        assert_eq!(challenge.scheme.as_deref(), Some("nested"));
    }

    #[test]
    fn test_token_falls_back_to_www_authenticate() {
        let map = headers(&[("www-authenticate", "Payment realm=\"deva\"")]);
        let challenge = PaymentChallenge::parse(&map, None).unwrap();
        assert_eq!(challenge.token.as_deref(), Some("Payment realm=\"deva\""));
    }

    #[test]
    fn test_absent_without_identifying_field() {
        let map = headers(&[("x-payment-memo", "only a memo")]);
        let body = json!({"error": {"message": "Payment required"}});
        assert!(PaymentChallenge::parse(&map, Some(&body)).is_none());
        assert!(PaymentChallenge::parse(&HeaderMap::new(), None).is_none());
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let map = headers(&[("x-payment-scheme", "exact")]);
        let body = json!({"challenge": {"scheme": "", "amount": ""}});
        let challenge = PaymentChallenge::parse(&map, Some(&body)).unwrap();

        assert_eq!(challenge.scheme.as_deref(), Some("exact"));
        assert!(challenge.amount.is_none());
    }

    #[test]
    fn test_raw_falls_back_to_whole_body() {
        let map = headers(&[("x-payment-amount", "1")]);
        let body = json!({"error": {"code": "payment_required"}});
        let challenge = PaymentChallenge::parse(&map, Some(&body)).unwrap();
        assert_eq!(challenge.raw, Some(body));
    }

    #[test]
    fn test_serializes_snake_case_without_empty_fields() {
        let challenge = PaymentChallenge {
            pay_to: Some("0x1".to_owned()),
            challenge_id: Some("c".to_owned()),
            ..PaymentChallenge::default()
        };
        assert_eq!(
            serde_json::to_value(&challenge).unwrap(),
            json!({"pay_to": "0x1", "challenge_id": "c"})
        );
    }
}
