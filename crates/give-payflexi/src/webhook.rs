//! PayFlexi Webhook Handling
//!
//! Authenticates signed server-to-server events and feeds approved
//! transactions into the reconciliation engine. Nothing in the body is
//! parsed, logged, or trusted before the signature matches.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::{Arc, RwLock};

use crate::donation::{DonationStore, Reference};
use crate::engine::{ReconcileOutcome, ReconciliationEngine};
use crate::error::{PaymentError, Result};
use crate::gateway::Gateway;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex HMAC-SHA512 of the raw body
pub const SIGNATURE_HEADER: &str = "x-payflexi-signature";

/// The only event type that drives reconciliation
pub const TRANSACTION_APPROVED: &str = "transaction.approved";

/// Body returned to the gateway for events we refuse to process
pub const FAILURE_MARKER: &str = "-1";

/// Parsed webhook event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub event: String,
    #[serde(default)]
    pub data: Option<WebhookData>,
}

/// Transaction fields carried by the event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookData {
    pub reference: Option<Reference>,
    #[serde(default)]
    pub transaction_id: Option<serde_json::Value>,
    #[serde(default)]
    pub txn_amount: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WebhookEvent {
    pub fn reference(&self) -> Option<&Reference> {
        self.data.as_ref().and_then(|d| d.reference.as_ref())
    }

    fn id_display(&self) -> String {
        match &self.id {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => "-".into(),
        }
    }
}

/// What to answer the gateway with
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookAck {
    /// 200 with a processed message
    Processed(String),

    /// 400/401: signature missing or wrong, or body unreadable after auth
    Rejected { status: u16, message: String },

    /// 404: authenticated event for a reference we never issued
    UnknownReference,

    /// 500 with the failure marker; the gateway may redeliver
    Failed,
}

impl WebhookAck {
    pub fn status(&self) -> u16 {
        match self {
            WebhookAck::Processed(_) => 200,
            WebhookAck::Rejected { status, .. } => *status,
            WebhookAck::UnknownReference => 404,
            WebhookAck::Failed => 500,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            WebhookAck::Processed(message) | WebhookAck::Rejected { message, .. } => message,
            WebhookAck::UnknownReference => "not a valid ref",
            WebhookAck::Failed => FAILURE_MARKER,
        }
    }
}

/// Verify the hex HMAC-SHA512 `signature` of `body` in constant time
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<()> {
    let expected = hex::decode(signature.trim()).map_err(|_| PaymentError::SignatureMismatch)?;

    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::SignatureMismatch)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| PaymentError::SignatureMismatch)
}

/// Hex HMAC-SHA512 of `body`, as PayFlexi computes it
pub fn sign(body: &[u8], secret: &str) -> Result<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("unusable webhook secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Webhook listener
pub struct WebhookListener<S: DonationStore, G: Gateway> {
    engine: Arc<ReconciliationEngine<S, G>>,
    secret_key: String,
    last_received: RwLock<Option<DateTime<Utc>>>,
}

impl<S, G> WebhookListener<S, G>
where
    S: DonationStore + 'static,
    G: Gateway + 'static,
{
    pub fn new(engine: Arc<ReconciliationEngine<S, G>>, secret_key: impl Into<String>) -> Self {
        Self {
            engine,
            secret_key: secret_key.into(),
            last_received: RwLock::new(None),
        }
    }

    /// When the last authenticated `transaction.approved` event arrived
    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        self.last_received.read().ok().and_then(|t| *t)
    }

    /// Authenticate, parse, and process a raw webhook delivery
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> WebhookAck {
        let Some(signature) = signature else {
            tracing::warn!("Webhook without signature header");
            return WebhookAck::Rejected {
                status: 400,
                message: "Missing signature".into(),
            };
        };

        if verify_signature(body, signature, &self.secret_key).is_err() {
            tracing::warn!(body_len = body.len(), "Webhook signature mismatch");
            return WebhookAck::Rejected {
                status: 401,
                message: "Invalid signature".into(),
            };
        }

        let event: WebhookEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Authenticated webhook body is not a valid event");
                return WebhookAck::Rejected {
                    status: 400,
                    message: "Malformed event".into(),
                };
            }
        };

        match self.process(&event).await {
            Ok(event_type) => {
                let message = format!("Processed event: {event_type}");
                tracing::info!(
                    event_id = %event.id_display(),
                    event_type = %event.event,
                    "PayFlexi webhook received and processed"
                );
                WebhookAck::Processed(message)
            }
            Err(PaymentError::WebhookParse(reason)) => {
                tracing::warn!(
                    event_id = %event.id_display(),
                    reason = %reason,
                    "Webhook event incomplete"
                );
                WebhookAck::Rejected {
                    status: 400,
                    message: "Malformed event".into(),
                }
            }
            Err(PaymentError::UnknownReference(reference)) => {
                tracing::warn!(
                    event_id = %event.id_display(),
                    reference = %reference,
                    "Webhook for unknown reference"
                );
                WebhookAck::UnknownReference
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id_display(),
                    event_type = %event.event,
                    error = %e,
                    "Something went wrong with processing the payment gateway event"
                );
                WebhookAck::Failed
            }
        }
    }

    /// Process an authenticated event. Only `transaction.approved` is handled.
    pub async fn process(&self, event: &WebhookEvent) -> Result<String> {
        if event.event != TRANSACTION_APPROVED {
            return Err(PaymentError::UnsupportedEvent(event.event.clone()));
        }

        if let Ok(mut last) = self.last_received.write() {
            *last = Some(Utc::now());
        }

        let reference = event
            .reference()
            .ok_or_else(|| PaymentError::WebhookParse("missing data.reference".into()))?;

        match self.engine.verify(reference).await? {
            ReconcileOutcome::UnknownReference => {
                Err(PaymentError::UnknownReference(reference.to_string()))
            }
            outcome => {
                tracing::debug!(
                    reference = %reference,
                    ?outcome,
                    "Webhook reconciliation finished"
                );
                Ok(event.event.clone())
            }
        }
    }
}
