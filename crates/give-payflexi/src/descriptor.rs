//! Payment Method Registration

use serde::{Deserialize, Serialize};

use crate::config::{Mode, PayflexiConfig};
use crate::credentials::MerchantCredentials;

/// How the donation platform lists this gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayDescriptor {
    pub id: String,
    pub admin_label: String,
    pub checkout_label: String,
    pub mode: Mode,

    /// Show billing address fields on the donation form
    pub collect_billing_details: bool,

    /// Public key for the active mode, if configured
    pub public_key: Option<String>,
}

impl GatewayDescriptor {
    pub fn from_config(config: &PayflexiConfig) -> Self {
        Self {
            id: "payflexi".into(),
            admin_label: "PayFlexi Flexible Checkout".into(),
            checkout_label: "PayFlexi (Pay in Instalments)".into(),
            mode: config.mode,
            collect_billing_details: config.collect_billing_details,
            public_key: MerchantCredentials::resolve_active(config)
                .ok()
                .map(|c| c.public_key),
        }
    }
}
