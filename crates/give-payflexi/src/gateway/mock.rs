//! Mock Gateway
//!
//! For testing and local demos. Answers lookups from scripted snapshots and
//! records every call it receives.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Barrier;

use super::{CheckoutSession, Gateway, InitiateRequest, TransactionSnapshot};
use crate::donation::Reference;
use crate::error::{PaymentError, Result};

/// Scripted PayFlexi stand-in
#[derive(Default)]
pub struct MockGateway {
    snapshots: Mutex<HashMap<Reference, TransactionSnapshot>>,
    initiated: Mutex<Vec<InitiateRequest>>,
    initiate_error: Mutex<Option<String>>,
    unavailable: Mutex<bool>,
    fetch_gate: Mutex<Option<Arc<Barrier>>>,
    fetch_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the snapshot returned for `reference`
    pub fn set_snapshot(&self, reference: &Reference, snapshot: TransactionSnapshot) {
        lock(&self.snapshots).insert(reference.clone(), snapshot);
    }

    /// Make every `initiate` fail with a business error
    pub fn fail_initiate_with(&self, message: impl Into<String>) {
        *lock(&self.initiate_error) = Some(message.into());
    }

    /// Make every `fetch_transaction` fail as if the gateway timed out
    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    /// Park every `fetch_transaction` until `parties` callers (fetches or
    /// holders of the returned barrier) are waiting, then release them together
    pub fn hold_fetches(&self, parties: usize) -> Arc<Barrier> {
        let gate = Arc::new(Barrier::new(parties));
        *lock(&self.fetch_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `fetch_transaction` calls so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Requests passed to `initiate` so far
    pub fn initiated(&self) -> Vec<InitiateRequest> {
        lock(&self.initiated).clone()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn initiate(&self, request: &InitiateRequest) -> Result<CheckoutSession> {
        lock(&self.initiated).push(request.clone());

        if let Some(message) = lock(&self.initiate_error).clone() {
            return Err(PaymentError::Gateway(message));
        }

        Ok(CheckoutSession {
            checkout_url: format!("https://checkout.payflexi.co/pay/{}", request.reference),
        })
    }

    async fn fetch_transaction(&self, reference: &Reference) -> Result<TransactionSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.fetch_gate).clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }

        if *lock(&self.unavailable) {
            return Err(PaymentError::GatewayUnavailable("request timed out".into()));
        }

        lock(&self.snapshots)
            .get(reference)
            .cloned()
            .ok_or_else(|| {
                PaymentError::GatewayUnavailable(format!(
                    "transaction lookup returned HTTP 404 for {reference}"
                ))
            })
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway() {
        let gateway = MockGateway::new();
        let reference = Reference::from_string("ref-1");
        gateway.set_snapshot(
            &reference,
            TransactionSnapshot::Errored {
                message: Some("declined".into()),
                gateway_response: None,
            },
        );

        let snapshot = gateway.fetch_transaction(&reference).await.unwrap();
        assert_eq!(snapshot.reason(), Some("declined"));
        assert_eq!(gateway.fetch_count(), 1);

        gateway.set_unavailable(true);
        assert!(gateway.fetch_transaction(&reference).await.is_err());
        assert_eq!(gateway.fetch_count(), 2);
    }
}
