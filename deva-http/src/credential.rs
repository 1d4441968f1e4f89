//! The shared API key.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use http::HeaderValue;

use deva_x402::DevaError;

/// Mutable API key shared between a client and its wallet payer.
///
/// Each request attempt reads a fresh snapshot, so a key replaced while a
/// call is in flight takes effect from that call's next attempt.
#[derive(Clone, Default)]
pub struct Credential {
    inner: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("is_set", &self.is_set())
            .finish()
    }
}

impl Credential {
    /// Creates a handle holding `api_key`.
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(api_key)),
        }
    }

    /// Returns the current key; empty keys count as absent.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|key| !key.is_empty())
            .cloned()
    }

    /// Replaces the key.
    pub fn set(&self, api_key: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(api_key.into());
    }

    /// Removes the key.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns `true` if a non-empty key is present.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    /// Builds the `Authorization` header for the current key.
    ///
    /// # Errors
    ///
    /// Returns [`DevaError::Configuration`] if no key is set or the key is not
    /// a valid header value.
    pub fn bearer(&self) -> Result<HeaderValue, DevaError> {
        let key = self.get().ok_or_else(DevaError::missing_credential)?;
        bearer_header(&key)
    }
}

pub(crate) fn bearer_header(api_key: &str) -> Result<HeaderValue, DevaError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
        DevaError::Configuration("API key contains characters not allowed in a header".to_owned())
    })?;
    value.set_sensitive(true);
    Ok(value)
}
