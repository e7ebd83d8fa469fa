//! In-memory [`StoreBridge`] used by the test suite and for development on
//! hosts without a native store. Everything is scripted up front; the only
//! live behavior is the update feed and the open-transaction set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    PurchaseOptions, PurchaseOutcome, RawAppTransaction, StoreBridge, StoreOwnership,
    StoreProductKind, StoreTransaction, SubscriptionStatus, TransactionStream, Verification,
};
use crate::models::ProductRecord;
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    products: Vec<ProductRecord>,
    entitlements: Vec<Verification<StoreTransaction>>,
    history: Vec<Verification<StoreTransaction>>,
    unfinished: Vec<Verification<StoreTransaction>>,
    statuses: HashMap<String, SubscriptionStatus>,
    receipt: Option<String>,
    app_transaction: Option<RawAppTransaction>,
    scripted_outcomes: HashMap<String, PurchaseOutcome>,
    update_senders: Vec<mpsc::UnboundedSender<Verification<StoreTransaction>>>,
    finish_calls: Vec<String>,
    synced: usize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    active_updates: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product: ProductRecord) {
        self.inner.lock().unwrap().products.push(product);
    }

    pub fn add_entitlement(&self, entry: Verification<StoreTransaction>) {
        self.inner.lock().unwrap().entitlements.push(entry);
    }

    pub fn add_transaction(&self, entry: Verification<StoreTransaction>) {
        self.inner.lock().unwrap().history.push(entry);
    }

    pub fn add_unfinished(&self, entry: Verification<StoreTransaction>) {
        self.inner.lock().unwrap().unfinished.push(entry);
    }

    pub fn set_subscription_status(&self, transaction_id: &str, status: SubscriptionStatus) {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .insert(transaction_id.to_owned(), status);
    }

    pub fn set_receipt(&self, receipt: &str) {
        self.inner.lock().unwrap().receipt = Some(receipt.to_owned());
    }

    pub fn set_app_transaction(&self, app_transaction: RawAppTransaction) {
        self.inner.lock().unwrap().app_transaction = Some(app_transaction);
    }

    /// Script the outcome the store reports for a purchase of `product_id`.
    pub fn script_purchase(&self, product_id: &str, outcome: PurchaseOutcome) {
        self.inner
            .lock()
            .unwrap()
            .scripted_outcomes
            .insert(product_id.to_owned(), outcome);
    }

    /// Deliver one event on the live update feed.
    pub fn push_update(&self, entry: Verification<StoreTransaction>) {
        self.inner
            .lock()
            .unwrap()
            .update_senders
            .retain(|tx| tx.send(entry.clone()).is_ok());
    }

    /// Transaction ids still in the open set.
    pub fn open_transaction_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .unfinished
            .iter()
            .map(|entry| match entry {
                Verification::Verified(txn) => txn.id.clone(),
                Verification::Unverified { transaction_id, .. } => transaction_id.clone(),
            })
            .collect()
    }

    /// Every `finish` call seen, in order, including repeats.
    pub fn finish_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().finish_calls.clone()
    }

    pub fn sync_count(&self) -> usize {
        self.inner.lock().unwrap().synced
    }

    /// Number of live subscriptions to the update feed.
    pub fn active_update_subscriptions(&self) -> usize {
        self.active_updates.load(Ordering::SeqCst)
    }

    fn snapshot_stream(entries: Vec<Verification<StoreTransaction>>) -> TransactionStream {
        futures::stream::iter(entries).boxed()
    }
}

#[async_trait]
impl StoreBridge for MemoryStore {
    fn is_supported(&self) -> bool {
        true
    }

    async fn products(&self, identifiers: &[String]) -> Result<Vec<ProductRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .products
            .iter()
            .filter(|p| identifiers.contains(&p.product_identifier))
            .cloned()
            .collect())
    }

    async fn purchase(
        &self,
        product_id: &str,
        _options: PurchaseOptions,
    ) -> Result<PurchaseOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let outcome = inner
            .scripted_outcomes
            .get(product_id)
            .cloned()
            .unwrap_or(PurchaseOutcome::Unknown);
        // A successful purchase lands in the open set until finished.
        if let PurchaseOutcome::Success(Verification::Verified(txn)) = &outcome {
            inner.unfinished.push(Verification::Verified(txn.clone()));
        }
        Ok(outcome)
    }

    fn current_entitlements(&self) -> TransactionStream {
        Self::snapshot_stream(self.inner.lock().unwrap().entitlements.clone())
    }

    fn all_transactions(&self) -> TransactionStream {
        Self::snapshot_stream(self.inner.lock().unwrap().history.clone())
    }

    fn unfinished_transactions(&self) -> TransactionStream {
        Self::snapshot_stream(self.inner.lock().unwrap().unfinished.clone())
    }

    fn transaction_updates(&self) -> TransactionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().update_senders.push(tx);
        let guard = ActiveGuard::new(self.active_updates.clone());
        UnboundedReceiverStream::new(rx)
            .map(move |item| {
                let _alive = &guard;
                item
            })
            .boxed()
    }

    async fn finish(&self, transaction_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.finish_calls.push(transaction_id.to_owned());
        // Finishing an already-closed transaction is a platform-level no-op.
        inner.unfinished.retain(|entry| match entry {
            Verification::Verified(txn) => txn.id != transaction_id,
            Verification::Unverified { transaction_id: id, .. } => id != transaction_id,
        });
        Ok(())
    }

    async fn subscription_status(&self, transaction_id: &str) -> Option<SubscriptionStatus> {
        self.inner.lock().unwrap().statuses.get(transaction_id).cloned()
    }

    async fn receipt(&self) -> Option<String> {
        self.inner.lock().unwrap().receipt.clone()
    }

    async fn app_transaction(&self) -> Result<RawAppTransaction> {
        self.inner
            .lock()
            .unwrap()
            .app_transaction
            .clone()
            .ok_or_else(|| Error::Store("no app transaction available".into()))
    }

    async fn sync(&self) -> Result<()> {
        self.inner.lock().unwrap().synced += 1;
        Ok(())
    }

    async fn manage_subscriptions(&self) -> Result<()> {
        Ok(())
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixture: a verified one-time purchase.
pub fn sample_transaction(id: &str, product_id: &str) -> StoreTransaction {
    let purchased = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
    StoreTransaction {
        id: id.to_owned(),
        product_id: product_id.to_owned(),
        product_kind: StoreProductKind::NonConsumable,
        ownership: StoreOwnership::Purchased,
        purchase_date: purchased,
        original_purchase_date: purchased,
        expiration_date: None,
        environment: Some("Production".to_owned()),
        app_account_token: None,
        jws_representation: None,
    }
}

/// Fixture: a verified auto-renewable subscription transaction.
pub fn sample_subscription(
    id: &str,
    product_id: &str,
    expiration: DateTime<Utc>,
) -> StoreTransaction {
    StoreTransaction {
        expiration_date: Some(expiration),
        product_kind: StoreProductKind::AutoRenewable,
        ..sample_transaction(id, product_id)
    }
}
