//! Reconciliation Engine
//!
//! Owns the donation state machine:
//!
//! ```text
//!              initiate
//!                 │
//!                 ▼
//!   ┌──────────── pending ────────────┐
//!   │ verify:       │ cancel   decline│ verify: errored
//!   │ approved      │          or     │ or abandonment
//!   ▼               ▼          timer  ▼
//! complete      cancelled           failed
//! (full or partial/installment)
//! ```
//!
//! Every transition out of `pending` goes through the store's
//! compare-and-set, so a donor redirect racing a webhook for the same
//! reference produces exactly one terminal state and one set of notes.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::abandonment::AbandonmentScheduler;
use crate::config::PayflexiConfig;
use crate::donation::{
    DonationId, DonationStatus, DonationStore, INSTALLMENT_AMOUNT_META, NewDonation, Reference,
};
use crate::error::{PaymentError, Result};
use crate::gateway::{Gateway, InitiateRequest, TransactionMeta, TransactionSnapshot};

/// Query variable selecting the PayFlexi callback handler
pub const API_QUERY_VAR: &str = "payflexi-give-api";

/// Donation form submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DonationRequest {
    pub amount: Decimal,

    /// Falls back to the configured currency
    #[serde(default)]
    pub currency: Option<String>,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub form_id: u64,
    #[serde(default)]
    pub form_title: String,

    /// Caller-supplied purchase key; generated when absent
    #[serde(default)]
    pub reference: Option<Reference>,
}

impl DonationRequest {
    pub fn donor_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// A donation handed over to the hosted checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Initiation {
    pub donation_id: DonationId,
    pub reference: Reference,
    pub checkout_url: String,
}

/// Which donor redirect arrived
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Approved,
    Cancelled,
    Declined,
}

/// Result of a reconciliation attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed { donation_id: DonationId, partial: bool },
    Failed { donation_id: DonationId },
    Cancelled { donation_id: DonationId },
    Declined { donation_id: DonationId },

    /// Donation was already terminal; nothing was changed
    AlreadyReconciled {
        donation_id: DonationId,
        status: DonationStatus,
    },

    UnknownReference,
}

impl ReconcileOutcome {
    /// Whether the donor should land on the success page
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Completed { .. }
                | ReconcileOutcome::AlreadyReconciled {
                    status: DonationStatus::Complete,
                    ..
                }
        )
    }
}

/// Drives donations from creation to a terminal state
pub struct ReconciliationEngine<S: DonationStore, G: Gateway> {
    store: Arc<S>,
    gateway: Arc<G>,
    scheduler: AbandonmentScheduler,
    site_url: String,
    currency: String,
    abandonment_delay: Duration,
}

impl<S, G> ReconciliationEngine<S, G>
where
    S: DonationStore + 'static,
    G: Gateway + 'static,
{
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: &PayflexiConfig) -> Self {
        Self {
            store,
            gateway,
            scheduler: AbandonmentScheduler::new(),
            site_url: config.site_url.clone(),
            currency: config.currency.clone(),
            abandonment_delay: config.abandonment_delay,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn scheduler(&self) -> &AbandonmentScheduler {
        &self.scheduler
    }

    /// Record a pending donation and create the remote transaction.
    ///
    /// On gateway failure the donation stays pending and the error is
    /// returned; nothing is retried.
    pub async fn initiate_payment(&self, request: DonationRequest) -> Result<Initiation> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidDonation(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        if request.email.trim().is_empty() {
            return Err(PaymentError::InvalidDonation("donor email is required".into()));
        }

        let reference = request.reference.clone().unwrap_or_else(Reference::generate);
        let currency = request
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map_or_else(|| self.currency.clone(), str::to_uppercase);
        let donor_name = request.donor_name();
        let callback_url = self.callback_url(&reference)?;

        let donation_id = self
            .store
            .create(NewDonation {
                reference: reference.clone(),
                amount: request.amount,
                currency: currency.clone(),
                email: request.email.clone(),
                donor_name: donor_name.clone(),
                form_id: request.form_id,
                form_title: request.form_title.clone(),
            })
            .inspect_err(|e| {
                tracing::error!(
                    reference = %reference,
                    form_id = request.form_id,
                    error = %e,
                    "Payment creation failed before sending donor to PayFlexi"
                );
            })?;

        let initiate = InitiateRequest {
            reference: reference.clone(),
            amount: request.amount,
            currency,
            email: request.email,
            name: donor_name,
            callback_url,
            meta: TransactionMeta {
                title: request.form_title,
                donation_id: donation_id.0,
            },
        };

        let session = match self.gateway.initiate(&initiate).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    donation_id = %donation_id,
                    reference = %reference,
                    error = %e,
                    "PayFlexi transaction creation failed"
                );
                self.note(donation_id, &format!("PayFlexi transaction could not be created: {e}"));
                return Err(e);
            }
        };

        let store = Arc::clone(&self.store);
        let delay = self.abandonment_delay;
        self.scheduler.schedule(donation_id, delay, move || async move {
            expire(store.as_ref(), donation_id, delay);
        });

        tracing::info!(
            donation_id = %donation_id,
            reference = %reference,
            gateway = self.gateway.name(),
            "Donor sent to hosted checkout"
        );

        Ok(Initiation {
            donation_id,
            reference,
            checkout_url: session.checkout_url,
        })
    }

    /// Reconcile a donor redirect
    pub async fn reconcile(
        &self,
        reference: &Reference,
        action: CallbackAction,
    ) -> Result<ReconcileOutcome> {
        match action {
            CallbackAction::Approved => self.verify(reference).await,
            CallbackAction::Cancelled => self.cancel(reference),
            CallbackAction::Declined => self.decline(reference),
        }
    }

    /// Reconcile against the gateway's authoritative transaction state.
    ///
    /// Gateway errors propagate without touching the donation.
    pub async fn verify(&self, reference: &Reference) -> Result<ReconcileOutcome> {
        let Some(donation) = self.store.find_by_reference(reference)? else {
            tracing::warn!(reference = %reference, "Verify for unknown reference");
            return Ok(ReconcileOutcome::UnknownReference);
        };

        if donation.status.is_terminal() {
            tracing::debug!(
                donation_id = %donation.id,
                status = %donation.status,
                "Donation already reconciled"
            );
            return Ok(ReconcileOutcome::AlreadyReconciled {
                donation_id: donation.id,
                status: donation.status,
            });
        }

        let snapshot = self
            .gateway
            .fetch_transaction(reference)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    donation_id = %donation.id,
                    reference = %reference,
                    error = %e,
                    "PayFlexi transaction lookup failed"
                );
            })?;

        let id = donation.id;
        match snapshot {
            TransactionSnapshot::Approved {
                transaction_id,
                txn_amount,
                ..
            } => {
                if !self.claim(id, DonationStatus::Complete)? {
                    return self.already_reconciled(id);
                }

                self.store.attach_transaction_id(id, &transaction_id)?;
                self.store.append_note(
                    id,
                    &format!("Transaction Successful. PayFlexi Transaction ID: {transaction_id}"),
                )?;

                let amount_paid = txn_amount.unwrap_or(Decimal::ZERO);
                let partial = amount_paid < donation.amount;

                if partial {
                    self.store.update_amount_paid(id, amount_paid)?;
                    self.store
                        .set_meta(id, INSTALLMENT_AMOUNT_META, &amount_paid.to_string())?;
                    self.store.append_note(
                        id,
                        &format!(
                            "Instalment Payment made: {amount_paid} of {} {}",
                            donation.amount, donation.currency
                        ),
                    )?;
                } else {
                    self.store.update_amount_paid(id, donation.amount)?;
                }

                tracing::info!(
                    donation_id = %id,
                    transaction_id = %transaction_id,
                    amount_paid = %amount_paid,
                    partial,
                    "Donation complete"
                );

                Ok(ReconcileOutcome::Completed {
                    donation_id: id,
                    partial,
                })
            }

            TransactionSnapshot::Errored { .. } => {
                if !self.claim(id, DonationStatus::Failed)? {
                    return self.already_reconciled(id);
                }

                let reason = snapshot
                    .reason()
                    .unwrap_or("PayFlexi reported the transaction as unsuccessful");
                self.store.append_note(id, &format!("ERROR: {reason}"))?;

                tracing::warn!(donation_id = %id, reason = %reason, "Donation failed at gateway");

                Ok(ReconcileOutcome::Failed { donation_id: id })
            }
        }
    }

    /// Donor cancelled on the hosted page. No gateway call is made: the
    /// transition never claims money was received.
    pub fn cancel(&self, reference: &Reference) -> Result<ReconcileOutcome> {
        self.close_unpaid(reference, DonationStatus::Cancelled, "cancelled")
    }

    /// Gateway declined on the hosted page. Same as `cancel` but fails the donation.
    pub fn decline(&self, reference: &Reference) -> Result<ReconcileOutcome> {
        self.close_unpaid(reference, DonationStatus::Failed, "declined")
    }

    /// Fail a donation nobody reconciled in time. No-op on terminal donations.
    pub fn expire_abandoned(&self, id: DonationId) -> bool {
        expire(self.store.as_ref(), id, self.abandonment_delay)
    }

    fn close_unpaid(
        &self,
        reference: &Reference,
        status: DonationStatus,
        verb: &str,
    ) -> Result<ReconcileOutcome> {
        let Some(donation) = self.store.find_by_reference(reference)? else {
            tracing::warn!(reference = %reference, "Donor {verb} an unknown reference");
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let id = donation.id;
        if !self.claim(id, status)? {
            return self.already_reconciled(id);
        }

        self.store
            .append_note(id, &format!("Donor {verb} the donation {id}"))?;
        tracing::warn!(donation_id = %id, reference = %reference, "Donor {verb} the donation");

        Ok(match status {
            DonationStatus::Cancelled => ReconcileOutcome::Cancelled { donation_id: id },
            _ => ReconcileOutcome::Declined { donation_id: id },
        })
    }

    /// Move `pending -> status`; the winner also stops the abandonment timer
    fn claim(&self, id: DonationId, status: DonationStatus) -> Result<bool> {
        let claimed = self
            .store
            .compare_and_set_status(id, DonationStatus::Pending, status)?;
        if claimed {
            self.scheduler.cancel(id);
        }
        Ok(claimed)
    }

    fn already_reconciled(&self, id: DonationId) -> Result<ReconcileOutcome> {
        let status = self
            .store
            .get(id)?
            .map(|d| d.status)
            .ok_or_else(|| PaymentError::Storage(format!("donation {id} vanished")))?;

        tracing::debug!(donation_id = %id, status = %status, "Lost reconciliation race");

        Ok(ReconcileOutcome::AlreadyReconciled {
            donation_id: id,
            status,
        })
    }

    fn callback_url(&self, reference: &Reference) -> Result<String> {
        Url::parse_with_params(
            &self.site_url,
            &[(API_QUERY_VAR, "verify"), ("reference", reference.as_str())],
        )
        .map(String::from)
        .map_err(|e| PaymentError::Config(format!("invalid site URL '{}': {e}", self.site_url)))
    }

    fn note(&self, id: DonationId, text: &str) {
        if let Err(e) = self.store.append_note(id, text) {
            tracing::warn!(donation_id = %id, error = %e, "Failed to record donation note");
        }
    }
}

fn expire<S: DonationStore + ?Sized>(store: &S, id: DonationId, delay: Duration) -> bool {
    match store.compare_and_set_status(id, DonationStatus::Pending, DonationStatus::Failed) {
        Ok(true) => {
            let note = format!(
                "Donation abandoned: no response from PayFlexi within {} minutes",
                delay.as_secs() / 60
            );
            if let Err(e) = store.append_note(id, &note) {
                tracing::warn!(donation_id = %id, error = %e, "Failed to record abandonment note");
            }
            tracing::info!(donation_id = %id, "Donation abandoned");
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::error!(donation_id = %id, error = %e, "Abandonment check failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donation::{Donation, MemoryDonationStore};
    use crate::gateway::MockGateway;
    use rust_decimal_macros::dec;

    type Engine = ReconciliationEngine<MemoryDonationStore, MockGateway>;

    fn engine() -> Engine {
        ReconciliationEngine::new(
            Arc::new(MemoryDonationStore::new()),
            Arc::new(MockGateway::new()),
            &PayflexiConfig::default(),
        )
    }

    fn request() -> DonationRequest {
        DonationRequest {
            amount: dec!(10000),
            currency: None,
            email: "donor@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Obi".into(),
            form_id: 7,
            form_title: "School Fund".into(),
            reference: None,
        }
    }

    fn approved(txn_amount: Option<Decimal>) -> TransactionSnapshot {
        TransactionSnapshot::Approved {
            transaction_id: "PFX-1".into(),
            txn_amount,
            message: Some("Approved".into()),
        }
    }

    fn donation(engine: &Engine, reference: &Reference) -> Donation {
        engine.store().find_by_reference(reference).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_initiate_records_pending_donation() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Pending);
        assert_eq!(stored.currency, "NGN");
        assert_eq!(stored.donor_name, "Ada Obi");
        assert!(engine.scheduler().is_scheduled(initiation.donation_id));

        let sent = engine.gateway().initiated();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].meta.donation_id, initiation.donation_id.0);
        assert!(sent[0].callback_url.contains("payflexi-give-api=verify"));
        assert!(sent[0]
            .callback_url
            .contains(&format!("reference={}", initiation.reference)));
    }

    #[tokio::test]
    async fn test_initiate_failure_keeps_donation_pending() {
        let engine = engine();
        engine.gateway().fail_initiate_with("Invalid currency");
        let reference = Reference::from_string("ref-fail");

        let err = engine
            .initiate_payment(DonationRequest {
                reference: Some(reference.clone()),
                ..request()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Gateway(_)));
        let stored = donation(&engine, &reference);
        assert_eq!(stored.status, DonationStatus::Pending);
        assert_eq!(engine.scheduler().pending(), 0);
    }

    #[tokio::test]
    async fn test_initiate_rejects_bad_requests() {
        let engine = engine();
        let zero = DonationRequest {
            amount: Decimal::ZERO,
            ..request()
        };
        assert!(matches!(
            engine.initiate_payment(zero).await,
            Err(PaymentError::InvalidDonation(_))
        ));
        assert!(engine.gateway().initiated().is_empty());
    }

    #[tokio::test]
    async fn test_bad_site_url_stores_nothing() {
        let engine = ReconciliationEngine::new(
            Arc::new(MemoryDonationStore::new()),
            Arc::new(MockGateway::new()),
            &PayflexiConfig {
                site_url: "not a url".into(),
                ..Default::default()
            },
        );
        let reference = Reference::from_string("ref-bad-site");

        let err = engine
            .initiate_payment(DonationRequest {
                reference: Some(reference.clone()),
                ..request()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Config(_)));
        assert!(engine.store().find_by_reference(&reference).unwrap().is_none());
        assert!(engine.gateway().initiated().is_empty());
    }

    #[tokio::test]
    async fn test_partial_payment_completes_with_shortfall_note() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(6000))));

        let outcome = engine.verify(&initiation.reference).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Completed {
                donation_id: initiation.donation_id,
                partial: true
            }
        );
        assert!(outcome.is_success());

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Complete);
        assert_eq!(stored.amount_paid, Some(dec!(6000)));
        assert_eq!(stored.transaction_id.as_deref(), Some("PFX-1"));
        assert_eq!(
            stored.meta.get(INSTALLMENT_AMOUNT_META).map(String::as_str),
            Some("6000")
        );
        assert!(stored
            .notes
            .iter()
            .any(|n| n.text.starts_with("Instalment Payment made: 6000")));
        assert!(!engine.scheduler().is_scheduled(initiation.donation_id));
    }

    #[tokio::test]
    async fn test_full_payment_has_no_shortfall_note() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(10000))));

        let outcome = engine.verify(&initiation.reference).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Completed { partial: false, .. }));

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Complete);
        assert_eq!(stored.amount_paid, Some(dec!(10000)));
        assert!(!stored.meta.contains_key(INSTALLMENT_AMOUNT_META));
        assert!(!stored.notes.iter().any(|n| n.text.contains("Instalment")));
    }

    #[tokio::test]
    async fn test_verify_twice_is_idempotent() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(6000))));

        let first = engine.verify(&initiation.reference).await.unwrap();
        let notes_after_first = donation(&engine, &initiation.reference).notes.len();

        let second = engine.verify(&initiation.reference).await.unwrap();
        let stored = donation(&engine, &initiation.reference);

        assert!(first.is_success());
        assert!(second.is_success());
        assert_eq!(
            second,
            ReconcileOutcome::AlreadyReconciled {
                donation_id: initiation.donation_id,
                status: DonationStatus::Complete
            }
        );
        assert_eq!(stored.notes.len(), notes_after_first);
        assert_eq!(stored.amount_paid, Some(dec!(6000)));
        assert_eq!(engine.gateway().fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_errored_snapshot_fails_donation() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine.gateway().set_snapshot(
            &initiation.reference,
            TransactionSnapshot::Errored {
                message: None,
                gateway_response: Some("Insufficient funds".into()),
            },
        );

        let outcome = engine.verify(&initiation.reference).await.unwrap();
        assert!(!outcome.is_success());

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Failed);
        assert!(stored.notes.iter().any(|n| n.text == "ERROR: Insufficient funds"));
        assert!(stored.transaction_id.is_none());
    }

    #[tokio::test]
    async fn test_gateway_unavailable_leaves_donation_untouched() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine.gateway().set_unavailable(true);

        let err = engine.verify(&initiation.reference).await.unwrap_err();
        assert!(matches!(err, PaymentError::GatewayUnavailable(_)));

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Pending);
        assert!(stored.notes.is_empty());
        assert!(engine.scheduler().is_scheduled(initiation.donation_id));
    }

    #[tokio::test]
    async fn test_decline_never_fetches() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();

        let outcome = engine
            .reconcile(&initiation.reference, CallbackAction::Declined)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Declined {
                donation_id: initiation.donation_id
            }
        );
        assert_eq!(engine.gateway().fetch_count(), 0);
        assert_eq!(
            donation(&engine, &initiation.reference).status,
            DonationStatus::Failed
        );
        assert!(!engine.scheduler().is_scheduled(initiation.donation_id));
    }

    #[tokio::test]
    async fn test_cancel_marks_cancelled_with_note() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();

        let outcome = engine
            .reconcile(&initiation.reference, CallbackAction::Cancelled)
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Cancelled { .. }));
        assert!(!outcome.is_success());
        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Cancelled);
        assert_eq!(stored.notes.len(), 1);
        assert_eq!(engine.gateway().fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_safe_on_every_path() {
        let engine = engine();
        let unknown = Reference::from_string("nope");

        for action in [
            CallbackAction::Approved,
            CallbackAction::Cancelled,
            CallbackAction::Declined,
        ] {
            let outcome = engine.reconcile(&unknown, action).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::UnknownReference);
            assert!(!outcome.is_success());
        }
        assert_eq!(engine.gateway().fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_changes_nothing() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(10000))));
        engine.verify(&initiation.reference).await.unwrap();

        let outcome = engine.cancel(&initiation.reference).unwrap();
        assert!(outcome.is_success());
        assert_eq!(
            donation(&engine, &initiation.reference).status,
            DonationStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_racing_verifies_credit_once() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(10000))));
        engine.gateway().hold_fetches(2);

        let (a, b) = tokio::join!(
            engine.verify(&initiation.reference),
            engine.verify(&initiation.reference)
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(engine.gateway().fetch_count(), 2);
        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
        assert!(outcomes.contains(&ReconcileOutcome::AlreadyReconciled {
            donation_id: initiation.donation_id,
            status: DonationStatus::Complete
        }));
        assert!(outcomes.iter().all(ReconcileOutcome::is_success));

        let stored = donation(&engine, &initiation.reference);
        let success_notes = stored
            .notes
            .iter()
            .filter(|n| n.text.starts_with("Transaction Successful"))
            .count();
        assert_eq!(success_notes, 1);
    }

    #[tokio::test]
    async fn test_racing_failed_verifies_note_once() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine.gateway().set_snapshot(
            &initiation.reference,
            TransactionSnapshot::Errored {
                message: Some("Card declined".into()),
                gateway_response: None,
            },
        );
        engine.gateway().hold_fetches(2);

        let (a, b) = tokio::join!(
            engine.verify(&initiation.reference),
            engine.verify(&initiation.reference)
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(engine.gateway().fetch_count(), 2);
        assert!(outcomes.contains(&ReconcileOutcome::Failed {
            donation_id: initiation.donation_id
        }));
        assert!(outcomes.contains(&ReconcileOutcome::AlreadyReconciled {
            donation_id: initiation.donation_id,
            status: DonationStatus::Failed
        }));

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Failed);
        assert_eq!(stored.notes.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_verify_wins() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(10000))));
        let gate = engine.gateway().hold_fetches(2);

        // verify parks inside the lookup while the donor cancels
        let (verified, cancelled) = tokio::join!(engine.verify(&initiation.reference), async {
            let outcome = engine.cancel(&initiation.reference);
            gate.wait().await;
            outcome
        });

        assert_eq!(
            cancelled.unwrap(),
            ReconcileOutcome::Cancelled {
                donation_id: initiation.donation_id
            }
        );
        let verified = verified.unwrap();
        assert_eq!(
            verified,
            ReconcileOutcome::AlreadyReconciled {
                donation_id: initiation.donation_id,
                status: DonationStatus::Cancelled
            }
        );
        assert!(!verified.is_success());
        assert_eq!(engine.gateway().fetch_count(), 1);

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Cancelled);
        assert!(stored.transaction_id.is_none());
        assert!(stored.amount_paid.is_none());
        assert_eq!(stored.notes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_donation_fails_once() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();

        tokio::time::sleep(crate::config::DEFAULT_ABANDONMENT_DELAY + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Failed);
        let abandonment_notes = stored
            .notes
            .iter()
            .filter(|n| n.text.starts_with("Donation abandoned"))
            .count();
        assert_eq!(abandonment_notes, 1);

        assert!(!engine.expire_abandoned(initiation.donation_id));
        assert_eq!(donation(&engine, &initiation.reference).notes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciliation_cancels_abandonment() {
        let engine = engine();
        let initiation = engine.initiate_payment(request()).await.unwrap();
        engine
            .gateway()
            .set_snapshot(&initiation.reference, approved(Some(dec!(10000))));
        engine.verify(&initiation.reference).await.unwrap();
        assert_eq!(engine.scheduler().pending(), 0);

        tokio::time::sleep(crate::config::DEFAULT_ABANDONMENT_DELAY * 2).await;
        tokio::task::yield_now().await;

        let stored = donation(&engine, &initiation.reference);
        assert_eq!(stored.status, DonationStatus::Complete);
        assert!(!stored.notes.iter().any(|n| n.text.starts_with("Donation abandoned")));
    }
}
