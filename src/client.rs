//! Platform-independent implementation of the plugin method surface.
//!
//! Holds the store bridge and the update-listener handle; every command
//! delegates here. The purchase path threads a single [`FinishPolicy`]
//! through one outcome handler so the automatic and deferred finishing
//! behaviors cannot drift apart.

use std::sync::Arc;

use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::listener::{UpdateEvents, UpdateListener};
use crate::models::*;
use crate::store::{PurchaseOptions, PurchaseOutcome, StoreBridge, Verification};
use crate::transaction;
use crate::{Error, Result};

/// When a successful purchase or update gets finished (acknowledged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishPolicy {
    /// Finish before returning the result to the caller.
    Automatic,
    /// Return the normalized record and leave the transaction open.
    Deferred,
}

pub struct PurchasesClient {
    store: Arc<dyn StoreBridge>,
    listener: UpdateListener,
}

impl PurchasesClient {
    pub fn new(store: Arc<dyn StoreBridge>) -> Self {
        Self {
            store,
            listener: UpdateListener::new(),
        }
    }

    pub fn start_listener(&self, events: Arc<dyn UpdateEvents>) {
        self.listener.start(self.store.clone(), events);
    }

    pub fn stop_listener(&self) {
        self.listener.stop();
    }

    pub fn plugin_version(&self) -> PluginVersionResponse {
        PluginVersionResponse {
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    pub fn is_billing_supported(&self) -> BillingSupportResponse {
        BillingSupportResponse {
            is_billing_supported: self.store.is_supported(),
        }
    }

    pub async fn get_products(&self, identifiers: Vec<String>) -> Result<GetProductsResponse> {
        let products = self.store.products(&identifiers).await?;
        Ok(GetProductsResponse { products })
    }

    pub async fn get_product(&self, identifier: String) -> Result<GetProductResponse> {
        if identifier.is_empty() {
            return Err(Error::EmptyProductIdentifier);
        }
        let products = self.store.products(std::slice::from_ref(&identifier)).await?;
        let product = products
            .into_iter()
            .find(|p| p.product_identifier == identifier)
            .ok_or(Error::ProductNotFound(identifier))?;
        Ok(GetProductResponse { product })
    }

    pub async fn purchase_product(&self, request: PurchaseProductRequest) -> Result<PurchaseRecord> {
        if request.product_identifier.is_empty() {
            return Err(Error::EmptyProductIdentifier);
        }
        let app_account_token = parse_account_token(request.app_account_token.as_deref())?;

        let identifier = request.product_identifier;
        let products = self.store.products(std::slice::from_ref(&identifier)).await?;
        if !products.iter().any(|p| p.product_identifier == identifier) {
            return Err(Error::ProductNotFound(identifier));
        }

        let options = PurchaseOptions {
            quantity: request.quantity,
            app_account_token,
        };
        let outcome = self.store.purchase(&identifier, options).await?;
        debug!(product = %identifier, "purchase outcome: {outcome:?}");

        let policy = if request.auto_acknowledge_purchases {
            FinishPolicy::Automatic
        } else {
            FinishPolicy::Deferred
        };
        self.handle_purchase_outcome(outcome, policy).await
    }

    async fn handle_purchase_outcome(
        &self,
        outcome: PurchaseOutcome,
        policy: FinishPolicy,
    ) -> Result<PurchaseRecord> {
        match outcome {
            PurchaseOutcome::Success(Verification::Verified(txn)) => {
                let record = transaction::normalize(self.store.as_ref(), &txn, false).await;
                if policy == FinishPolicy::Automatic {
                    self.store.finish(&txn.id).await?;
                }
                Ok(record)
            }
            PurchaseOutcome::Success(Verification::Unverified { error, .. }) => {
                Err(Error::Verification(error))
            }
            PurchaseOutcome::Pending => Err(Error::Pending),
            PurchaseOutcome::UserCancelled => Err(Error::Cancelled),
            PurchaseOutcome::Unknown => Err(Error::Unknown),
        }
    }

    /// Sync with the store, then sweep the open queue so stale transactions
    /// stop blocking new purchases.
    pub async fn restore_purchases(&self) -> Result<()> {
        self.store.sync().await?;
        let mut unfinished = self.store.unfinished_transactions();
        while let Some(entry) = unfinished.next().await {
            let id = match entry {
                Verification::Verified(txn) => txn.id,
                Verification::Unverified { transaction_id, .. } => transaction_id,
            };
            self.store.finish(&id).await?;
        }
        Ok(())
    }

    pub async fn get_purchases(&self, request: GetPurchasesRequest) -> Result<GetPurchasesResponse> {
        // Any provided token is a filter, the empty string included; only an
        // absent token means "no filter".
        let filter = request.app_account_token.as_deref();
        let purchases = transaction::collect_purchases(self.store.as_ref(), filter).await;
        Ok(GetPurchasesResponse { purchases })
    }

    pub async fn manage_subscriptions(&self) -> Result<()> {
        self.store.manage_subscriptions().await
    }

    /// Finish the open transaction named by `purchase_token`. The open set
    /// is the platform's and persists across restarts, so this works for
    /// purchases deferred in an earlier process.
    pub async fn acknowledge_purchase(&self, purchase_token: String) -> Result<()> {
        let mut unfinished = self.store.unfinished_transactions();
        while let Some(entry) = unfinished.next().await {
            if let Verification::Verified(txn) = entry {
                if txn.id == purchase_token {
                    drop(unfinished);
                    self.store.finish(&txn.id).await?;
                    return Ok(());
                }
            }
        }
        Err(Error::TransactionNotFound(purchase_token))
    }

    pub async fn get_app_transaction(&self) -> Result<AppTransactionResponse> {
        let raw = self.store.app_transaction().await?;
        Ok(AppTransactionResponse {
            app_transaction: AppTransactionRecord {
                original_app_version: raw.original_app_version,
                original_purchase_date: raw.original_purchase_date,
                bundle_id: raw.bundle_id,
                app_version: raw.app_version,
                environment: raw
                    .environment
                    .as_deref()
                    .map(|env| StoreEnvironment::parse(Some(env))),
                jws_representation: raw.jws_representation,
            },
        })
    }

    pub async fn is_entitled_to_old_business_model(
        &self,
        target_build_number: u64,
    ) -> Result<EntitlementCheckResponse> {
        let raw = self.store.app_transaction().await?;
        let is_older_version = leading_build_number(&raw.original_app_version)
            .map_or(false, |build| build < target_build_number);
        Ok(EntitlementCheckResponse {
            is_older_version,
            original_app_version: raw.original_app_version,
        })
    }
}

fn parse_account_token(token: Option<&str>) -> Result<Option<Uuid>> {
    match token {
        None | Some("") => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| Error::InvalidAccountToken(raw.to_owned())),
    }
}

/// iOS reports the build number as the first component of
/// `originalAppVersion`. Unparsable versions count as not older.
fn leading_build_number(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{sample_transaction, MemoryStore};
    use crate::store::RawAppTransaction;
    use chrono::{TimeZone, Utc};

    fn product(identifier: &str) -> ProductRecord {
        ProductRecord {
            product_identifier: identifier.to_owned(),
            title: "Premium".to_owned(),
            description: "Unlocks everything".to_owned(),
            price: 4.99,
            display_price: "$4.99".to_owned(),
            currency_code: "USD".to_owned(),
            product_type: ProductType::OneTime,
        }
    }

    fn client_with(store: &MemoryStore) -> PurchasesClient {
        PurchasesClient::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn verified_purchase_is_normalized_and_finished() {
        let store = MemoryStore::new();
        store.add_product(product("premium_upgrade"));
        store.script_purchase(
            "premium_upgrade",
            PurchaseOutcome::Success(Verification::Verified(sample_transaction(
                "t1",
                "premium_upgrade",
            ))),
        );

        let client = client_with(&store);
        let record = client
            .purchase_product(PurchaseProductRequest {
                product_identifier: "premium_upgrade".into(),
                quantity: 1,
                app_account_token: None,
                auto_acknowledge_purchases: true,
            })
            .await
            .unwrap();

        assert_eq!(record.product_identifier, "premium_upgrade");
        assert_eq!(record.product_type, ProductType::OneTime);
        // Finished: gone from the open set.
        assert!(store.open_transaction_ids().is_empty());
        assert_eq!(store.finish_calls(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn deferred_purchase_stays_open() {
        let store = MemoryStore::new();
        store.add_product(product("premium_upgrade"));
        store.script_purchase(
            "premium_upgrade",
            PurchaseOutcome::Success(Verification::Verified(sample_transaction(
                "t1",
                "premium_upgrade",
            ))),
        );

        let client = client_with(&store);
        let record = client
            .purchase_product(PurchaseProductRequest {
                product_identifier: "premium_upgrade".into(),
                quantity: 1,
                app_account_token: None,
                auto_acknowledge_purchases: false,
            })
            .await
            .unwrap();

        assert_eq!(record.transaction_id, "t1");
        assert_eq!(store.open_transaction_ids(), vec!["t1".to_string()]);
        assert!(store.finish_calls().is_empty());
    }

    #[tokio::test]
    async fn empty_product_identifier_is_rejected_before_store_contact() {
        let store = MemoryStore::new();
        let client = client_with(&store);
        let err = client
            .purchase_product(PurchaseProductRequest {
                product_identifier: String::new(),
                quantity: 1,
                app_account_token: None,
                auto_acknowledge_purchases: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyProductIdentifier));
    }

    #[tokio::test]
    async fn unknown_product_is_rejected_by_name() {
        let store = MemoryStore::new();
        let client = client_with(&store);
        let err = client
            .purchase_product(PurchaseProductRequest {
                product_identifier: "ghost".into(),
                quantity: 1,
                app_account_token: None,
                auto_acknowledge_purchases: true,
            })
            .await
            .unwrap_err();
        match err {
            Error::ProductNotFound(id) => assert_eq!(id, "ghost"),
            other => panic!("expected ProductNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_account_token_is_rejected() {
        let store = MemoryStore::new();
        store.add_product(product("premium_upgrade"));
        let client = client_with(&store);
        let err = client
            .purchase_product(PurchaseProductRequest {
                product_identifier: "premium_upgrade".into(),
                quantity: 1,
                app_account_token: Some("not-a-uuid".into()),
                auto_acknowledge_purchases: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAccountToken(_)));
    }

    #[tokio::test]
    async fn non_verified_outcomes_map_to_terminal_errors() {
        let store = MemoryStore::new();
        store.add_product(product("premium_upgrade"));
        let client = client_with(&store);

        let request = || PurchaseProductRequest {
            product_identifier: "premium_upgrade".into(),
            quantity: 1,
            app_account_token: None,
            auto_acknowledge_purchases: true,
        };

        store.script_purchase("premium_upgrade", PurchaseOutcome::Pending);
        assert!(matches!(
            client.purchase_product(request()).await.unwrap_err(),
            Error::Pending
        ));

        store.script_purchase("premium_upgrade", PurchaseOutcome::UserCancelled);
        assert!(matches!(
            client.purchase_product(request()).await.unwrap_err(),
            Error::Cancelled
        ));

        store.script_purchase(
            "premium_upgrade",
            PurchaseOutcome::Success(Verification::Unverified {
                transaction_id: "t1".into(),
                error: "broken chain".into(),
            }),
        );
        match client.purchase_product(request()).await.unwrap_err() {
            Error::Verification(message) => assert_eq!(message, "broken chain"),
            other => panic!("expected Verification, got {other:?}"),
        }

        store.script_purchase("premium_upgrade", PurchaseOutcome::Unknown);
        assert!(matches!(
            client.purchase_product(request()).await.unwrap_err(),
            Error::Unknown
        ));
    }

    #[tokio::test]
    async fn acknowledge_finishes_open_token_once() {
        let store = MemoryStore::new();
        store.add_unfinished(Verification::Verified(sample_transaction("123", "premium")));
        let client = client_with(&store);

        client.acknowledge_purchase("123".into()).await.unwrap();
        assert!(store.open_transaction_ids().is_empty());

        // Second identical call: already finished, so not found.
        let err = client.acknowledge_purchase("123".into()).await.unwrap_err();
        assert!(matches!(err, Error::TransactionNotFound(ref t) if t == "123"));
    }

    #[tokio::test]
    async fn acknowledge_unknown_or_unverified_token_fails_not_found() {
        let store = MemoryStore::new();
        store.add_unfinished(Verification::Unverified {
            transaction_id: "bad".into(),
            error: "invalid signature".into(),
        });
        let client = client_with(&store);

        let err = client.acknowledge_purchase("bad".into()).await.unwrap_err();
        assert!(matches!(err, Error::TransactionNotFound(ref t) if t == "bad"));

        let err = client.acknowledge_purchase("nope".into()).await.unwrap_err();
        assert!(matches!(err, Error::TransactionNotFound(ref t) if t == "nope"));
    }

    #[tokio::test]
    async fn get_purchases_with_unmatched_token_is_empty() {
        let store = MemoryStore::new();
        store.add_transaction(Verification::Verified(sample_transaction("1", "premium")));
        let client = client_with(&store);

        let response = client
            .get_purchases(GetPurchasesRequest {
                app_account_token: Some("abc-123".into()),
            })
            .await
            .unwrap();
        assert!(response.purchases.is_empty());
    }

    #[tokio::test]
    async fn get_purchases_with_empty_token_filter_matches_nothing() {
        let store = MemoryStore::new();
        store.add_transaction(Verification::Verified(sample_transaction("1", "premium")));
        let client = client_with(&store);

        // An empty string is still a provided filter, so no record matches.
        let response = client
            .get_purchases(GetPurchasesRequest {
                app_account_token: Some(String::new()),
            })
            .await
            .unwrap();
        assert!(response.purchases.is_empty());

        // An absent token means no filter at all.
        let response = client
            .get_purchases(GetPurchasesRequest {
                app_account_token: None,
            })
            .await
            .unwrap();
        assert_eq!(response.purchases.len(), 1);
    }

    #[tokio::test]
    async fn restore_syncs_and_sweeps_open_queue() {
        let store = MemoryStore::new();
        store.add_unfinished(Verification::Verified(sample_transaction("1", "premium")));
        store.add_unfinished(Verification::Unverified {
            transaction_id: "2".into(),
            error: "invalid".into(),
        });
        let client = client_with(&store);

        client.restore_purchases().await.unwrap();
        assert_eq!(store.sync_count(), 1);
        assert!(store.open_transaction_ids().is_empty());
    }

    #[tokio::test]
    async fn get_product_reports_missing_identifier() {
        let store = MemoryStore::new();
        store.add_product(product("premium_upgrade"));
        let client = client_with(&store);

        let found = client.get_product("premium_upgrade".into()).await.unwrap();
        assert_eq!(found.product.product_identifier, "premium_upgrade");

        let err = client.get_product("ghost".into()).await.unwrap_err();
        assert!(matches!(err, Error::ProductNotFound(ref id) if id == "ghost"));

        let err = client.get_product(String::new()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyProductIdentifier));
    }

    #[tokio::test]
    async fn legacy_entitlement_compares_leading_build_number() {
        let store = MemoryStore::new();
        store.set_app_transaction(RawAppTransaction {
            original_app_version: "40".into(),
            original_purchase_date: Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap(),
            bundle_id: "com.example.app".into(),
            app_version: "7.13.0".into(),
            environment: Some("Production".into()),
            jws_representation: None,
        });
        let client = client_with(&store);

        let check = client.is_entitled_to_old_business_model(50).await.unwrap();
        assert!(check.is_older_version);
        assert_eq!(check.original_app_version, "40");

        store.set_app_transaction(RawAppTransaction {
            original_app_version: "60.1".into(),
            original_purchase_date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            bundle_id: "com.example.app".into(),
            app_version: "7.13.0".into(),
            environment: None,
            jws_representation: None,
        });
        assert!(!client.is_entitled_to_old_business_model(50).await.unwrap().is_older_version);

        store.set_app_transaction(RawAppTransaction {
            original_app_version: "not-a-number".into(),
            original_purchase_date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            bundle_id: "com.example.app".into(),
            app_version: "7.13.0".into(),
            environment: None,
            jws_representation: None,
        });
        assert!(!client.is_entitled_to_old_business_model(50).await.unwrap().is_older_version);
    }

    #[tokio::test]
    async fn app_transaction_environment_uses_fallback_parse() {
        let store = MemoryStore::new();
        store.set_app_transaction(RawAppTransaction {
            original_app_version: "40".into(),
            original_purchase_date: Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap(),
            bundle_id: "com.example.app".into(),
            app_version: "7.13.0".into(),
            environment: Some("Xcode".into()),
            jws_representation: Some("jws".into()),
        });
        let client = client_with(&store);

        let response = client.get_app_transaction().await.unwrap();
        assert_eq!(response.app_transaction.environment, Some(StoreEnvironment::Test));
        assert_eq!(response.app_transaction.jws_representation.as_deref(), Some("jws"));
    }

    #[tokio::test]
    async fn version_and_support_queries() {
        let store = MemoryStore::new();
        let client = client_with(&store);
        assert_eq!(client.plugin_version().version, env!("CARGO_PKG_VERSION"));
        assert!(client.is_billing_supported().is_billing_supported);
    }
}
