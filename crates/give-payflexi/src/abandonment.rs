//! Abandonment Timers
//!
//! Donors who never come back from the hosted checkout leave a pending
//! donation behind. Each initiated donation gets one cancelable timer; when
//! it fires, the engine fails the donation unless it was reconciled first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::donation::DonationId;

struct Timer {
    token: u64,
    handle: JoinHandle<()>,
}

/// One background timer per donation
#[derive(Default)]
pub struct AbandonmentScheduler {
    timers: Arc<Mutex<Timers>>,
    next_token: AtomicU64,
}

type Timers = HashMap<DonationId, Timer>;

fn lock(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AbandonmentScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless cancelled first.
    ///
    /// Replaces any timer already pending for `id`. Must be called from
    /// within a tokio runtime.
    pub fn schedule<F, Fut>(&self, id: DonationId, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Hold the lock across spawn so the task cannot look itself up
        // before it has been registered.
        let mut guard = lock(&self.timers);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let fired = {
                let mut timers = lock(&timers);
                match timers.get(&id) {
                    Some(timer) if timer.token == token => {
                        timers.remove(&id);
                        true
                    }
                    _ => false,
                }
            };

            if fired {
                action().await;
            }
        });

        if let Some(previous) = guard.insert(id, Timer { token, handle }) {
            previous.handle.abort();
        }

        tracing::debug!(
            donation_id = %id,
            delay_secs = delay.as_secs(),
            "Abandonment timer scheduled"
        );
    }

    /// Cancel the pending timer for `id`. Returns whether one was pending.
    pub fn cancel(&self, id: DonationId) -> bool {
        let removed = lock(&self.timers).remove(&id);
        match removed {
            Some(timer) => {
                timer.handle.abort();
                tracing::debug!(donation_id = %id, "Abandonment timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: DonationId) -> bool {
        lock(&self.timers).contains_key(&id)
    }

    /// Number of pending timers
    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Drop for AbandonmentScheduler {
    fn drop(&mut self) {
        for (_, timer) in lock(&self.timers).drain() {
            timer.handle.abort();
        }
    }
}
