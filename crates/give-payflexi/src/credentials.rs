//! Merchant Credentials

use crate::config::{Mode, PayflexiConfig};
use crate::error::{PaymentError, Result};

/// Active PayFlexi key pair for one mode
#[derive(Clone, PartialEq, Eq)]
pub struct MerchantCredentials {
    pub mode: Mode,
    pub public_key: String,
    secret_key: String,
}

impl MerchantCredentials {
    /// Resolve the key pair configured for `mode`.
    ///
    /// Both keys must be present and non-blank; a half-configured mode is
    /// treated the same as an unconfigured one.
    pub fn resolve(config: &PayflexiConfig, mode: Mode) -> Result<Self> {
        let (public_key, secret_key) = match mode {
            Mode::Test => (&config.test_public_key, &config.test_secret_key),
            Mode::Live => (&config.live_public_key, &config.live_secret_key),
        };

        let public_key = non_blank(public_key).ok_or_else(|| {
            PaymentError::Config(format!("PayFlexi {mode} public key is not set"))
        })?;
        let secret_key = non_blank(secret_key).ok_or_else(|| {
            PaymentError::Config(format!("PayFlexi {mode} secret key is not set"))
        })?;

        Ok(Self {
            mode,
            public_key,
            secret_key,
        })
    }

    /// Resolve the key pair for the configured mode
    pub fn resolve_active(config: &PayflexiConfig) -> Result<Self> {
        Self::resolve(config, config.mode)
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for MerchantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantCredentials")
            .field("mode", &self.mode)
            .field("public_key", &self.public_key)
            .field("secret_key", &"***")
            .finish()
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}
