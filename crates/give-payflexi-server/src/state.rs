//! Application State

use std::sync::Arc;

use give_payflexi::{
    GatewayDescriptor, MemoryDonationStore, PayflexiClient, PayflexiConfig, ReconciliationEngine,
    RedirectDispatcher, WebhookListener,
};

pub type Engine = ReconciliationEngine<MemoryDonationStore, PayflexiClient>;
pub type Listener = WebhookListener<MemoryDonationStore, PayflexiClient>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PayflexiConfig>,

    /// Reconciliation engine (None if PayFlexi keys are not configured)
    pub engine: Option<Arc<Engine>>,

    /// Webhook listener (None together with `engine`)
    pub webhooks: Option<Arc<Listener>>,

    pub redirects: Arc<RedirectDispatcher>,
    pub descriptor: Arc<GatewayDescriptor>,
}
