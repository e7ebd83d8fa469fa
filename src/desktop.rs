use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tauri::{plugin::PluginApi, AppHandle, Runtime};

use crate::store::{
    PurchaseOptions, PurchaseOutcome, RawAppTransaction, StoreBridge, SubscriptionStatus,
    TransactionStream,
};
use crate::{Error, Result};

pub fn init<R: Runtime, C: DeserializeOwned>(
    _app: &AppHandle<R>,
    _api: PluginApi<R, C>,
) -> Result<Arc<dyn StoreBridge>> {
    Ok(Arc::new(UnsupportedStore))
}

/// Store bridge for hosts without a native store client. Billing reports as
/// unsupported, enumerations are empty, and every operation is rejected.
struct UnsupportedStore;

#[async_trait]
impl StoreBridge for UnsupportedStore {
    fn is_supported(&self) -> bool {
        false
    }

    async fn products(&self, _identifiers: &[String]) -> Result<Vec<crate::models::ProductRecord>> {
        Err(Error::Unsupported)
    }

    async fn purchase(
        &self,
        _product_id: &str,
        _options: PurchaseOptions,
    ) -> Result<PurchaseOutcome> {
        Err(Error::Unsupported)
    }

    fn current_entitlements(&self) -> TransactionStream {
        futures::stream::empty().boxed()
    }

    fn all_transactions(&self) -> TransactionStream {
        futures::stream::empty().boxed()
    }

    fn unfinished_transactions(&self) -> TransactionStream {
        futures::stream::empty().boxed()
    }

    fn transaction_updates(&self) -> TransactionStream {
        futures::stream::empty().boxed()
    }

    async fn finish(&self, _transaction_id: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    async fn subscription_status(&self, _transaction_id: &str) -> Option<SubscriptionStatus> {
        None
    }

    async fn receipt(&self) -> Option<String> {
        None
    }

    async fn app_transaction(&self) -> Result<RawAppTransaction> {
        Err(Error::Unsupported)
    }

    async fn sync(&self) -> Result<()> {
        Err(Error::Unsupported)
    }

    async fn manage_subscriptions(&self) -> Result<()> {
        Err(Error::Unsupported)
    }
}
