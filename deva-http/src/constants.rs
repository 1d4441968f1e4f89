//! Defaults, header names and retry policy constants.

use std::time::Duration;

pub use deva_x402::error::{RETRYABLE_STATUS_CODES, is_retryable_status};

/// Production API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.deva.me";

/// Per-call timeout used when a request does not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transient retries allowed per call (timeouts, network errors, retryable statuses).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Wait before the first transient retry; doubled after every retry.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(300);

/// Payment retries allowed per call.
pub const DEFAULT_MAX_PAYMENT_RETRIES: u32 = 1;

/// Path of the wallet endpoint used by the built-in payer.
pub const DEFAULT_WALLET_PAY_PATH: &str = "/v1/agents/wallet/pay";

/// Header carrying the payer's authorization on a paid retry.
pub const PAYMENT_AUTHORIZATION_HEADER: &str = "x-payment-authorization";

/// Header carrying the payer's proof on a paid retry.
pub const PAYMENT_PROOF_HEADER: &str = "x-payment-proof";

/// Media type requested for streaming calls.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "DEVA_API_KEY";

/// Environment variable overriding the API base URL.
pub const ENV_API_BASE: &str = "DEVA_API_BASE";

/// Environment variable overriding the default timeout, in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "DEVA_TIMEOUT_MS";
