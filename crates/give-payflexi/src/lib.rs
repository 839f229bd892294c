//! # give-payflexi
//!
//! PayFlexi installment-payment gateway for donations.
//!
//! ## Flow
//!
//! Donations use PayFlexi's hosted checkout: the donor leaves the site,
//! pays in full or in installments, and comes back.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │  Donation   │────▶│  PayFlexi Hosted │────▶│  ?payflexi- │
//! │    form     │     │  Checkout Page   │     │  give-api=  │
//! └─────────────┘     └──────────────────┘     │   verify    │
//!                              │               └─────────────┘
//!                              │ signed webhook       │
//!                              ▼                      ▼
//!                     ┌────────────────────────────────────┐
//!                     │       ReconciliationEngine         │
//!                     │  fetch_transaction -> store update │
//!                     └────────────────────────────────────┘
//! ```
//!
//! The donor redirect and the webhook may both arrive for the same
//! reference; whichever reaches the store first wins and the other is a
//! no-op. Donations nobody reconciles are failed by a background timer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use give_payflexi::{
//!     DonationRequest, MemoryDonationStore, PayflexiClient, PayflexiConfig,
//!     ReconciliationEngine,
//! };
//!
//! let config = PayflexiConfig::from_env()?;
//! let engine = ReconciliationEngine::new(
//!     Arc::new(MemoryDonationStore::new()),
//!     Arc::new(PayflexiClient::new(&config)?),
//!     &config,
//! );
//!
//! let initiation = engine.initiate_payment(request).await?;
//! // Redirect donor to: initiation.checkout_url
//! ```

pub mod abandonment;
pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod donation;
pub mod engine;
pub mod gateway;
pub mod redirect;
pub mod webhook;
mod error;

pub use config::{Mode, PayflexiConfig};
pub use credentials::MerchantCredentials;
pub use descriptor::GatewayDescriptor;
pub use donation::{
    Donation, DonationId, DonationStatus, DonationStore, MemoryDonationStore, Reference,
};
pub use engine::{
    CallbackAction, DonationRequest, Initiation, ReconcileOutcome, ReconciliationEngine,
};
pub use error::{PaymentError, Result};
pub use gateway::{Gateway, MockGateway, PayflexiClient, TransactionSnapshot};
pub use redirect::RedirectDispatcher;
pub use webhook::{WebhookAck, WebhookListener};
