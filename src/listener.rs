//! Long-lived subscription to the store's live transaction-update feed.
//!
//! One subscription exists at a time for the plugin's lifetime. Verified
//! updates are normalized, finished, and forwarded to the host as
//! `transactionUpdated`; unverified ones become
//! `transactionVerificationFailed` and are left unfinished.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tauri::async_runtime::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::{PurchaseRecord, VerificationFailure};
use crate::store::{StoreBridge, Verification};
use crate::transaction;

/// Settle time between finishing an updated transaction and notifying the
/// host layer.
pub const UPDATE_NOTIFY_DELAY: Duration = Duration::from_millis(500);

/// Fire-and-forget notification channel from the listener to the host.
pub trait UpdateEvents: Send + Sync + 'static {
    fn transaction_updated(&self, record: &PurchaseRecord);
    fn transaction_verification_failed(&self, failure: &VerificationFailure);
}

struct Subscription {
    stop: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl Subscription {
    fn cancel(self) {
        // Cooperative: the task observes the signal between items and runs
        // any in-flight item to completion. Never aborted.
        let _ = self.stop.send(true);
    }
}

/// Single-owner handle for the listener task. `start` is idempotent
/// (cancel-then-start), so exactly one subscription is active at a time.
#[derive(Default)]
pub struct UpdateListener {
    subscription: Mutex<Option<Subscription>>,
}

impl UpdateListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, store: Arc<dyn StoreBridge>, events: Arc<dyn UpdateEvents>) {
        let mut slot = self.subscription.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let (stop, stop_rx) = watch::channel(false);
        let task = async_runtime::spawn(run(store, events, stop_rx));
        *slot = Some(Subscription { stop, _task: task });
    }

    pub fn stop(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.lock().unwrap().is_some()
    }
}

async fn run(
    store: Arc<dyn StoreBridge>,
    events: Arc<dyn UpdateEvents>,
    mut stop: watch::Receiver<bool>,
) {
    let mut updates = store.transaction_updates();
    debug!("transaction update listener started");
    loop {
        let entry = tokio::select! {
            _ = stop.changed() => break,
            entry = updates.next() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };
        match entry {
            Verification::Verified(txn) => {
                let record = transaction::normalize(store.as_ref(), &txn, true).await;
                // Finish right away; an open transaction blocks later
                // purchases on the platform queue.
                if let Err(err) = store.finish(&txn.id).await {
                    warn!(transaction_id = %txn.id, "failed to finish updated transaction: {err}");
                }
                // Give the host layer a moment to settle before notifying.
                tokio::time::sleep(UPDATE_NOTIFY_DELAY).await;
                events.transaction_updated(&record);
            }
            Verification::Unverified {
                transaction_id,
                error,
            } => {
                debug!(%transaction_id, "unverified transaction update: {error}");
                events.transaction_verification_failed(&VerificationFailure {
                    transaction_id,
                    error,
                });
            }
        }
    }
    debug!("transaction update listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{sample_transaction, MemoryStore};

    #[derive(Default)]
    struct RecordingEvents {
        updated: Mutex<Vec<PurchaseRecord>>,
        failed: Mutex<Vec<VerificationFailure>>,
    }

    impl UpdateEvents for RecordingEvents {
        fn transaction_updated(&self, record: &PurchaseRecord) {
            self.updated.lock().unwrap().push(record.clone());
        }

        fn transaction_verification_failed(&self, failure: &VerificationFailure) {
            self.failed.lock().unwrap().push(failure.clone());
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..60 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn starting_twice_leaves_one_active_subscription() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEvents::default());
        let listener = UpdateListener::new();

        listener.start(Arc::new(store.clone()), events.clone());
        listener.start(Arc::new(store.clone()), events);

        assert!(
            wait_until(|| store.active_update_subscriptions() == 1).await,
            "expected exactly one live subscription, got {}",
            store.active_update_subscriptions()
        );
        // The count must settle at one, not just pass through it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.active_update_subscriptions(), 1);
        assert!(listener.is_active());

        listener.stop();
        assert!(wait_until(|| store.active_update_subscriptions() == 0).await);
        assert!(!listener.is_active());
    }

    #[tokio::test]
    async fn verified_update_is_finished_and_forwarded() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEvents::default());
        let listener = UpdateListener::new();
        listener.start(Arc::new(store.clone()), events.clone());

        assert!(wait_until(|| store.active_update_subscriptions() == 1).await);
        store.push_update(Verification::Verified(sample_transaction("42", "premium")));

        assert!(
            wait_until(|| !events.updated.lock().unwrap().is_empty()).await,
            "transactionUpdated never emitted"
        );
        let updated = events.updated.lock().unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].transaction_id, "42");
        assert_eq!(updated[0].product_identifier, "premium");
        // Forced tri-state key, unknown for a one-time purchase.
        assert_eq!(updated[0].will_cancel, Some(None));
        assert_eq!(store.finish_calls(), vec!["42".to_string()]);

        listener.stop();
    }

    #[tokio::test]
    async fn unverified_update_reports_failure_without_finishing() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEvents::default());
        let listener = UpdateListener::new();
        listener.start(Arc::new(store.clone()), events.clone());

        assert!(wait_until(|| store.active_update_subscriptions() == 1).await);
        store.push_update(Verification::Unverified {
            transaction_id: "99".into(),
            error: "signature mismatch".into(),
        });

        assert!(wait_until(|| !events.failed.lock().unwrap().is_empty()).await);
        let failed = events.failed.lock().unwrap();
        assert_eq!(failed[0].transaction_id, "99");
        assert_eq!(failed[0].error, "signature mismatch");
        assert!(events.updated.lock().unwrap().is_empty());
        assert!(store.finish_calls().is_empty());

        listener.stop();
    }

    #[tokio::test]
    async fn stop_takes_effect_without_a_feed_event() {
        let store = MemoryStore::new();
        let listener = UpdateListener::new();
        listener.start(
            Arc::new(store.clone()),
            Arc::new(RecordingEvents::default()),
        );
        assert!(wait_until(|| store.active_update_subscriptions() == 1).await);

        // The feed never produces an item; cancellation must be observed
        // anyway, not after the next event arrives.
        listener.stop();
        assert!(
            wait_until(|| store.active_update_subscriptions() == 0).await,
            "subscription survived stop on an idle feed"
        );
    }

    #[tokio::test]
    async fn stopped_listener_ignores_later_updates() {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEvents::default());
        let listener = UpdateListener::new();
        listener.start(Arc::new(store.clone()), events.clone());

        assert!(wait_until(|| store.active_update_subscriptions() == 1).await);
        listener.stop();
        assert!(wait_until(|| store.active_update_subscriptions() == 0).await);

        store.push_update(Verification::Verified(sample_transaction("7", "coins")));
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(events.updated.lock().unwrap().is_empty());
    }
}
