//! Client and payment configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deva_x402::{DevaError, Payer};

use crate::constants::{
    DEFAULT_API_BASE, DEFAULT_MAX_PAYMENT_RETRIES, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
    DEFAULT_WALLET_PAY_PATH, ENV_API_BASE, ENV_API_KEY, ENV_TIMEOUT_MS, INITIAL_BACKOFF,
};
use crate::send::HttpSend;

/// How 402 responses are settled.
///
/// A custom [`Payer`] takes precedence over wallet auto-pay. With neither,
/// every 402 is surfaced as [`DevaError::PaymentRequired`].
#[derive(Clone)]
pub struct PaymentConfig {
    /// Master switch for the payment loop.
    pub enabled: bool,
    /// Payment retries allowed per call.
    pub max_retries: u32,
    /// Custom payer.
    pub payer: Option<Arc<dyn Payer>>,
    /// Pay through the Deva wallet endpoint when no custom payer is set.
    pub wallet_auto_pay: bool,
    /// Path of the wallet endpoint.
    pub wallet_pay_path: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_PAYMENT_RETRIES,
            payer: None,
            wallet_auto_pay: false,
            wallet_pay_path: DEFAULT_WALLET_PAY_PATH.to_owned(),
        }
    }
}

impl fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("payer", &self.payer.as_ref().map(|_| "<payer>"))
            .field("wallet_auto_pay", &self.wallet_auto_pay)
            .field("wallet_pay_path", &self.wallet_pay_path)
            .finish()
    }
}

impl PaymentConfig {
    /// A configuration that never pays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets a custom payer.
    #[must_use]
    pub fn with_payer(mut self, payer: impl Payer + 'static) -> Self {
        self.payer = Some(Arc::new(payer));
        self
    }

    /// Sets the payment retry cap.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enables or disables wallet auto-pay.
    #[must_use]
    pub const fn with_wallet_auto_pay(mut self, enabled: bool) -> Self {
        self.wallet_auto_pay = enabled;
        self
    }

    /// Overrides the wallet endpoint path.
    #[must_use]
    pub fn with_wallet_pay_path(mut self, path: impl Into<String>) -> Self {
        self.wallet_pay_path = path.into();
        self
    }
}

/// Configuration for [`DevaHttpClient`](crate::DevaHttpClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// API base URL; trailing slashes are ignored.
    pub base_url: String,
    /// Default per-call timeout.
    pub timeout: Duration,
    /// API key sent as a bearer token.
    pub api_key: Option<String>,
    /// Network layer; a [`ReqwestSender`](crate::ReqwestSender) when unset.
    pub sender: Option<Arc<dyn HttpSend>>,
    /// Transient retries allowed per call.
    pub max_retries: u32,
    /// Wait before the first transient retry.
    pub initial_backoff: Duration,
    /// Payment settings.
    pub payments: PaymentConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            api_key: None,
            sender: None,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
            payments: PaymentConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("sender", &self.sender.as_ref().map(|_| "<sender>"))
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("payments", &self.payments)
            .finish()
    }
}

impl ClientConfig {
    /// Creates a configuration for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads `DEVA_API_KEY`, `DEVA_API_BASE` and `DEVA_TIMEOUT_MS`.
    ///
    /// Unset or empty variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DevaError::Configuration`] if `DEVA_TIMEOUT_MS` is not a
    /// whole number of milliseconds.
    pub fn from_env() -> Result<Self, DevaError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DevaError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(base_url) = var(ENV_API_BASE) {
            config.base_url = base_url;
        }
        config.api_key = var(ENV_API_KEY);
        if let Some(timeout) = var(ENV_TIMEOUT_MS) {
            let millis = timeout.trim().parse::<u64>().map_err(|err| {
                DevaError::Configuration(format!("invalid {ENV_TIMEOUT_MS} value {timeout:?}: {err}"))
            })?;
            config.timeout = Duration::from_millis(millis);
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            base_url = %config.base_url,
            has_api_key = config.api_key.is_some(),
            "Loaded client configuration from environment"
        );

        Ok(config)
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the default timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the network layer.
    #[must_use]
    pub fn with_sender(mut self, sender: impl HttpSend + 'static) -> Self {
        self.sender = Some(Arc::new(sender));
        self
    }

    /// Sets the transient retry cap.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial backoff.
    #[must_use]
    pub const fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Sets the payment configuration.
    #[must_use]
    pub fn with_payments(mut self, payments: PaymentConfig) -> Self {
        self.payments = payments;
        self
    }
}
