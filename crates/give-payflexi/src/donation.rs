//! Donation Records
//!
//! The donation store is owned by the donation platform; this module defines
//! the contract the reconciliation engine needs from it plus an in-memory
//! implementation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PaymentError, Result};

/// Meta key holding the amount collected on an installment plan
pub const INSTALLMENT_AMOUNT_META: &str = "_payflexi_installment_amount_paid";

/// Store-assigned donation identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DonationId(pub u64);

impl std::fmt::Display for DonationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation key between one donation and one PayFlexi transaction
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Generate a new purchase-key style reference
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Donation lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Complete,
    Failed,
    Cancelled,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Complete => "complete",
            DonationStatus::Failed => "failed",
            DonationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DonationStatus::Pending)
    }
}

impl std::fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-visible note attached to a donation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DonationNote {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Payment data for a donation that has not been stored yet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewDonation {
    pub reference: Reference,
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub donor_name: String,
    pub form_id: u64,
    pub form_title: String,
}

/// A stored donation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Donation {
    pub id: DonationId,
    pub reference: Reference,

    /// Full amount the donor pledged
    pub amount: Decimal,
    pub currency: String,
    pub status: DonationStatus,

    /// Amount actually collected, lower than `amount` for installments
    pub amount_paid: Option<Decimal>,

    /// PayFlexi transaction ID, attached on first approval
    pub transaction_id: Option<String>,

    pub email: String,
    pub donor_name: String,
    pub form_id: u64,
    pub form_title: String,
    pub notes: Vec<DonationNote>,
    pub meta: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Donation {
    fn from_new(id: DonationId, new: NewDonation) -> Self {
        Self {
            id,
            reference: new.reference,
            amount: new.amount,
            currency: new.currency,
            status: DonationStatus::Pending,
            amount_paid: None,
            transaction_id: None,
            email: new.email,
            donor_name: new.donor_name,
            form_id: new.form_id,
            form_title: new.form_title,
            notes: Vec::new(),
            meta: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Donation storage contract
///
/// Implementations must make `compare_and_set_status` atomic per record:
/// racing reconciliation paths for one reference rely on it to pick a
/// single winner.
pub trait DonationStore: Send + Sync {
    /// Record a pending donation
    fn create(&self, donation: NewDonation) -> Result<DonationId>;

    /// Get donation by ID
    fn get(&self, id: DonationId) -> Result<Option<Donation>>;

    /// Get donation by PayFlexi reference
    fn find_by_reference(&self, reference: &Reference) -> Result<Option<Donation>>;

    /// Unconditionally set the status
    fn update_status(&self, id: DonationId, status: DonationStatus) -> Result<()>;

    /// Set the status only if it currently equals `expected`.
    /// Returns whether the swap happened.
    fn compare_and_set_status(
        &self,
        id: DonationId,
        expected: DonationStatus,
        new: DonationStatus,
    ) -> Result<bool>;

    /// Attach the gateway transaction ID (first value wins)
    fn attach_transaction_id(&self, id: DonationId, transaction_id: &str) -> Result<()>;

    fn append_note(&self, id: DonationId, text: &str) -> Result<()>;

    fn update_amount_paid(&self, id: DonationId, amount: Decimal) -> Result<()>;

    fn set_meta(&self, id: DonationId, key: &str, value: &str) -> Result<()>;
}

/// In-memory donation store
pub struct MemoryDonationStore {
    donations: RwLock<HashMap<DonationId, Donation>>,
    by_reference: RwLock<HashMap<Reference, DonationId>>,
    next_id: AtomicU64,
}

impl Default for MemoryDonationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDonationStore {
    pub fn new() -> Self {
        Self {
            donations: RwLock::new(HashMap::new()),
            by_reference: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn with_donation<T>(
        &self,
        id: DonationId,
        f: impl FnOnce(&mut Donation) -> T,
    ) -> Result<T> {
        let mut donations = self.donations.write().map_err(poisoned)?;
        let donation = donations
            .get_mut(&id)
            .ok_or_else(|| PaymentError::Storage(format!("donation {id} not found")))?;
        Ok(f(donation))
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> PaymentError {
    PaymentError::Storage("donation store lock poisoned".into())
}

impl DonationStore for MemoryDonationStore {
    fn create(&self, donation: NewDonation) -> Result<DonationId> {
        let mut donations = self.donations.write().map_err(poisoned)?;
        let mut by_reference = self.by_reference.write().map_err(poisoned)?;

        if by_reference.contains_key(&donation.reference) {
            return Err(PaymentError::Storage(format!(
                "reference {} already in use",
                donation.reference
            )));
        }

        let id = DonationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        by_reference.insert(donation.reference.clone(), id);
        donations.insert(id, Donation::from_new(id, donation));

        Ok(id)
    }

    fn get(&self, id: DonationId) -> Result<Option<Donation>> {
        let donations = self.donations.read().map_err(poisoned)?;
        Ok(donations.get(&id).cloned())
    }

    fn find_by_reference(&self, reference: &Reference) -> Result<Option<Donation>> {
        // Same lock order as `create`
        let donations = self.donations.read().map_err(poisoned)?;
        let by_reference = self.by_reference.read().map_err(poisoned)?;

        Ok(by_reference
            .get(reference)
            .and_then(|id| donations.get(id))
            .cloned())
    }

    fn update_status(&self, id: DonationId, status: DonationStatus) -> Result<()> {
        self.with_donation(id, |d| d.status = status)
    }

    fn compare_and_set_status(
        &self,
        id: DonationId,
        expected: DonationStatus,
        new: DonationStatus,
    ) -> Result<bool> {
        self.with_donation(id, |d| {
            if d.status == expected {
                d.status = new;
                true
            } else {
                false
            }
        })
    }

    fn attach_transaction_id(&self, id: DonationId, transaction_id: &str) -> Result<()> {
        self.with_donation(id, |d| {
            if d.transaction_id.is_none() {
                d.transaction_id = Some(transaction_id.to_string());
            }
        })
    }

    fn append_note(&self, id: DonationId, text: &str) -> Result<()> {
        self.with_donation(id, |d| {
            d.notes.push(DonationNote {
                text: text.to_string(),
                created_at: Utc::now(),
            });
        })
    }

    fn update_amount_paid(&self, id: DonationId, amount: Decimal) -> Result<()> {
        self.with_donation(id, |d| d.amount_paid = Some(amount))
    }

    fn set_meta(&self, id: DonationId, key: &str, value: &str) -> Result<()> {
        self.with_donation(id, |d| {
            d.meta.insert(key.to_string(), value.to_string());
        })
    }
}
