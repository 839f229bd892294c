//! Gateway Configuration
//!
//! Everything the plugin settings screen used to hold, loaded from
//! `PAYFLEXI_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// Upper bound for any single gateway request
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay before an unreconciled donation is marked abandoned
pub const DEFAULT_ABANDONMENT_DELAY: Duration = Duration::from_secs(60 * 60);

/// Gateway mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Test,
    Live,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Test => "test",
            Mode::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(Mode::Test),
            "live" => Ok(Mode::Live),
            other => Err(PaymentError::Config(format!(
                "PAYFLEXI_MODE must be 'test' or 'live', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PayFlexi merchant and site configuration
#[derive(Clone)]
pub struct PayflexiConfig {
    pub mode: Mode,
    pub test_public_key: Option<String>,
    pub test_secret_key: Option<String>,
    pub live_public_key: Option<String>,
    pub live_secret_key: Option<String>,

    /// Ask donors for billing address fields on the donation form
    pub collect_billing_details: bool,

    pub api_base_url: String,

    /// Home URL the verify callback is built from
    pub site_url: String,
    pub success_page_url: String,
    pub failure_page_url: String,
    pub checkout_page_url: String,

    pub currency: String,
    pub abandonment_delay: Duration,
    pub request_timeout: Duration,

    /// Skip TLS certificate validation. Ignored outside test mode.
    pub accept_invalid_certs: bool,
}

impl Default for PayflexiConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Test,
            test_public_key: None,
            test_secret_key: None,
            live_public_key: None,
            live_secret_key: None,
            collect_billing_details: false,
            api_base_url: "https://api.payflexi.co".into(),
            site_url: "http://localhost:3000/".into(),
            success_page_url: "http://localhost:3000/donation-confirmation".into(),
            failure_page_url: "http://localhost:3000/donation-failed".into(),
            checkout_page_url: "http://localhost:3000/donations".into(),
            currency: "NGN".into(),
            abandonment_delay: DEFAULT_ABANDONMENT_DELAY,
            request_timeout: MAX_REQUEST_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

impl std::fmt::Debug for PayflexiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayflexiConfig")
            .field("mode", &self.mode)
            .field("test_public_key", &self.test_public_key)
            .field("test_secret_key", &self.test_secret_key.as_ref().map(|_| "***"))
            .field("live_public_key", &self.live_public_key)
            .field("live_secret_key", &self.live_secret_key.as_ref().map(|_| "***"))
            .field("collect_billing_details", &self.collect_billing_details)
            .field("api_base_url", &self.api_base_url)
            .field("site_url", &self.site_url)
            .field("currency", &self.currency)
            .field("abandonment_delay", &self.abandonment_delay)
            .field("request_timeout", &self.request_timeout)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

impl PayflexiConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, a map in tests, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let mode = get("PAYFLEXI_MODE").map_or(Ok(Mode::Test), |m| Mode::parse(&m))?;

        let collect_billing_details = match get("PAYFLEXI_BILLING_DETAILS") {
            None => defaults.collect_billing_details,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "enabled" | "true" | "1" => true,
                "disabled" | "false" | "0" => false,
                other => {
                    return Err(PaymentError::Config(format!(
                        "PAYFLEXI_BILLING_DETAILS must be 'enabled' or 'disabled', got '{other}'"
                    )));
                }
            },
        };

        let abandonment_delay = match get("PAYFLEXI_ABANDON_AFTER_SECS") {
            Some(v) => Duration::from_secs(parse_secs("PAYFLEXI_ABANDON_AFTER_SECS", &v)?),
            None => defaults.abandonment_delay,
        };

        let request_timeout = match get("PAYFLEXI_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_secs("PAYFLEXI_TIMEOUT_SECS", &v)?),
            None => defaults.request_timeout,
        }
        .min(MAX_REQUEST_TIMEOUT);

        let accept_invalid_certs = get("PAYFLEXI_ACCEPT_INVALID_CERTS")
            .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Self {
            mode,
            test_public_key: get("PAYFLEXI_TEST_PUBLIC_KEY"),
            test_secret_key: get("PAYFLEXI_TEST_SECRET_KEY"),
            live_public_key: get("PAYFLEXI_LIVE_PUBLIC_KEY"),
            live_secret_key: get("PAYFLEXI_LIVE_SECRET_KEY"),
            collect_billing_details,
            api_base_url: get("PAYFLEXI_API_BASE_URL").unwrap_or(defaults.api_base_url),
            site_url: get("PAYFLEXI_SITE_URL").unwrap_or(defaults.site_url),
            success_page_url: get("PAYFLEXI_SUCCESS_URL").unwrap_or(defaults.success_page_url),
            failure_page_url: get("PAYFLEXI_FAILURE_URL").unwrap_or(defaults.failure_page_url),
            checkout_page_url: get("PAYFLEXI_CHECKOUT_URL").unwrap_or(defaults.checkout_page_url),
            currency: get("PAYFLEXI_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or(defaults.currency),
            abandonment_delay,
            request_timeout,
            accept_invalid_certs,
        })
    }

    /// Whether the HTTP client may skip certificate validation
    pub fn allows_invalid_certs(&self) -> bool {
        self.mode == Mode::Test && self.accept_invalid_certs
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| PaymentError::Config(format!("{key} must be a whole number of seconds")))
}
