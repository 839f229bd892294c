//! PayFlexi Gateway Integration
//!
//! The `Gateway` trait is the seam between the reconciliation engine and the
//! remote API. `PayflexiClient` talks to the real REST API; `MockGateway`
//! answers from scripted snapshots.

mod mock;
mod payflexi;

pub use mock::MockGateway;
pub use payflexi::PayflexiClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::donation::Reference;
use crate::error::Result;

/// Transaction creation request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub reference: Reference,
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub name: String,

    /// Donor redirect target once the hosted checkout finishes
    pub callback_url: String,
    pub meta: TransactionMeta,
}

/// Free-form metadata echoed back by PayFlexi
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub title: String,
    pub donation_id: u64,
}

/// Hosted checkout created by PayFlexi
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
}

/// Validated point-in-time view of a remote transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransactionSnapshot {
    /// No errors reported; `txn_amount` may be below the pledged amount
    Approved {
        transaction_id: String,
        txn_amount: Option<Decimal>,
        message: Option<String>,
    },

    /// Gateway flagged the transaction as errored
    Errored {
        message: Option<String>,
        gateway_response: Option<String>,
    },
}

impl TransactionSnapshot {
    /// Human-readable reason, preferring the message over the raw gateway response
    pub fn reason(&self) -> Option<&str> {
        match self {
            TransactionSnapshot::Approved { message, .. } => message.as_deref(),
            TransactionSnapshot::Errored {
                message,
                gateway_response,
            } => message.as_deref().or(gateway_response.as_deref()),
        }
    }
}

/// Payment gateway client (Strategy pattern)
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Create a remote transaction and return the hosted checkout URL
    async fn initiate(&self, request: &InitiateRequest) -> Result<CheckoutSession>;

    /// Fetch the authoritative state of a transaction
    async fn fetch_transaction(&self, reference: &Reference) -> Result<TransactionSnapshot>;

    /// Gateway name
    fn name(&self) -> &str;
}
