use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tauri::{
    plugin::{PluginApi, PluginHandle},
    AppHandle, Runtime,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::models::ProductRecord;
use crate::store::{
    PurchaseOptions, PurchaseOutcome, RawAppTransaction, RenewalInfo, StoreBridge,
    StoreOwnership, StoreProductKind, StoreTransaction, SubscriptionState, SubscriptionStatus,
    TransactionStream, Verification,
};
use crate::Result;

#[cfg(target_os = "android")]
const PLUGIN_IDENTIFIER: &str = "app.tauri.nativepurchases";

#[cfg(target_os = "ios")]
tauri::ios_plugin_binding!(init_plugin_native_purchases);

// initializes the Kotlin or Swift shim exposing the raw store surface
pub fn init<R: Runtime, C: DeserializeOwned>(
    _app: &AppHandle<R>,
    api: PluginApi<R, C>,
) -> Result<Arc<dyn StoreBridge>> {
    #[cfg(target_os = "android")]
    let handle = api.register_android_plugin(PLUGIN_IDENTIFIER, "NativePurchasesPlugin")?;
    #[cfg(target_os = "ios")]
    let handle = api.register_ios_plugin(init_plugin_native_purchases)?;

    Ok(Arc::new(NativeStore(handle)))
}

/// Bridge backed by the registered native plugin shim. The shim only hands
/// over raw records; normalization and finish bookkeeping stay in Rust.
struct NativeStore<R: Runtime>(PluginHandle<R>);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductsRequest<'a> {
    product_identifiers: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductsResponse {
    products: Vec<ProductRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NativePurchaseRequest<'a> {
    product_identifier: &'a str,
    quantity: u32,
    app_account_token: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativePurchaseResponse {
    /// One of `verified`, `unverified`, `pending`, `userCancelled`, `unknown`.
    outcome: String,
    transaction: Option<RawTransaction>,
    #[serde(default)]
    error: Option<String>,
}

/// Raw transaction as serialized by the native shim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    transaction_id: String,
    product_identifier: String,
    product_kind: String,
    ownership_type: String,
    purchase_date: DateTime<Utc>,
    original_purchase_date: DateTime<Utc>,
    expiration_date: Option<DateTime<Utc>>,
    environment: Option<String>,
    app_account_token: Option<Uuid>,
    jws_representation: Option<String>,
    /// Present when the platform could not verify the entry.
    #[serde(default)]
    verification_error: Option<String>,
}

impl From<RawTransaction> for Verification<StoreTransaction> {
    fn from(raw: RawTransaction) -> Self {
        if let Some(error) = raw.verification_error {
            return Verification::Unverified {
                transaction_id: raw.transaction_id,
                error,
            };
        }
        Verification::Verified(StoreTransaction {
            id: raw.transaction_id,
            product_id: raw.product_identifier,
            product_kind: match raw.product_kind.as_str() {
                "autoRenewable" => StoreProductKind::AutoRenewable,
                "nonRenewing" => StoreProductKind::NonRenewing,
                "consumable" => StoreProductKind::Consumable,
                _ => StoreProductKind::NonConsumable,
            },
            ownership: match raw.ownership_type.as_str() {
                "familyShared" => StoreOwnership::FamilyShared,
                _ => StoreOwnership::Purchased,
            },
            purchase_date: raw.purchase_date,
            original_purchase_date: raw.original_purchase_date,
            expiration_date: raw.expiration_date,
            environment: raw.environment,
            app_account_token: raw.app_account_token,
            jws_representation: raw.jws_representation,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionsResponse {
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionIdRequest<'a> {
    transaction_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatusResponse {
    /// `subscribed`, `expired`, `inBillingRetry`, `inGracePeriod`, `revoked`.
    state: Option<String>,
    will_auto_renew: Option<bool>,
    #[serde(default)]
    renewal_verification_error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptResponse {
    receipt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextUpdateResponse {
    transaction: Option<RawTransaction>,
}

impl<R: Runtime> NativeStore<R> {
    fn enumerate(&self, method: &'static str) -> TransactionStream {
        match self.0.run_mobile_plugin::<TransactionsResponse>(method, ()) {
            Ok(response) => futures::stream::iter(
                response
                    .transactions
                    .into_iter()
                    .map(Verification::from)
                    .collect::<Vec<_>>(),
            )
            .boxed(),
            Err(err) => {
                warn!("native {method} enumeration failed: {err}");
                futures::stream::empty().boxed()
            }
        }
    }
}

#[async_trait]
impl<R: Runtime> StoreBridge for NativeStore<R> {
    fn is_supported(&self) -> bool {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Supported {
            is_billing_supported: bool,
        }
        self.0
            .run_mobile_plugin::<Supported>("isBillingSupported", ())
            .map(|s| s.is_billing_supported)
            .unwrap_or(false)
    }

    async fn products(&self, identifiers: &[String]) -> Result<Vec<ProductRecord>> {
        let response = self.0.run_mobile_plugin::<ProductsResponse>(
            "getProducts",
            ProductsRequest {
                product_identifiers: identifiers,
            },
        )?;
        Ok(response.products)
    }

    async fn purchase(
        &self,
        product_id: &str,
        options: PurchaseOptions,
    ) -> Result<PurchaseOutcome> {
        let response = self.0.run_mobile_plugin::<NativePurchaseResponse>(
            "purchaseProduct",
            NativePurchaseRequest {
                product_identifier: product_id,
                quantity: options.quantity,
                app_account_token: options.app_account_token,
            },
        )?;
        let outcome = match response.outcome.as_str() {
            "verified" => match response.transaction {
                Some(raw) => PurchaseOutcome::Success(raw.into()),
                None => PurchaseOutcome::Unknown,
            },
            "unverified" => PurchaseOutcome::Success(Verification::Unverified {
                transaction_id: response
                    .transaction
                    .map(|raw| raw.transaction_id)
                    .unwrap_or_default(),
                error: response.error.unwrap_or_else(|| "unverified".to_owned()),
            }),
            "pending" => PurchaseOutcome::Pending,
            "userCancelled" => PurchaseOutcome::UserCancelled,
            _ => PurchaseOutcome::Unknown,
        };
        Ok(outcome)
    }

    fn current_entitlements(&self) -> TransactionStream {
        self.enumerate("currentEntitlements")
    }

    fn all_transactions(&self) -> TransactionStream {
        self.enumerate("allTransactions")
    }

    fn unfinished_transactions(&self) -> TransactionStream {
        self.enumerate("unfinishedTransactions")
    }

    fn transaction_updates(&self) -> TransactionStream {
        // The shim call is synchronous, so the long poll runs on a blocking
        // task and feeds a channel; awaiting the stream never ties up an
        // async worker thread.
        let handle = self.0.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tauri::async_runtime::spawn_blocking(move || loop {
            match handle.run_mobile_plugin::<NextUpdateResponse>("nextTransactionUpdate", ()) {
                Ok(NextUpdateResponse {
                    transaction: Some(raw),
                }) => {
                    if tx.send(Verification::from(raw)).is_err() {
                        break;
                    }
                }
                // Long poll expired without an event; ask again unless the
                // subscriber is gone.
                Ok(NextUpdateResponse { transaction: None }) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("transaction update feed failed: {err}");
                    break;
                }
            }
        });
        UnboundedReceiverStream::new(rx).boxed()
    }

    async fn finish(&self, transaction_id: &str) -> Result<()> {
        self.0
            .run_mobile_plugin::<()>("finishTransaction", TransactionIdRequest { transaction_id })?;
        Ok(())
    }

    async fn subscription_status(&self, transaction_id: &str) -> Option<SubscriptionStatus> {
        let response = self
            .0
            .run_mobile_plugin::<SubscriptionStatusResponse>(
                "subscriptionStatus",
                TransactionIdRequest { transaction_id },
            )
            .ok()?;
        let state = match response.state.as_deref()? {
            "subscribed" => SubscriptionState::Subscribed,
            "inBillingRetry" => SubscriptionState::InBillingRetry,
            "inGracePeriod" => SubscriptionState::InGracePeriod,
            "revoked" => SubscriptionState::Revoked,
            _ => SubscriptionState::Expired,
        };
        let renewal = match (response.will_auto_renew, response.renewal_verification_error) {
            (Some(will_auto_renew), None) => {
                Verification::Verified(RenewalInfo { will_auto_renew })
            }
            (_, error) => Verification::Unverified {
                transaction_id: transaction_id.to_owned(),
                error: error.unwrap_or_else(|| "unverified renewal info".to_owned()),
            },
        };
        Some(SubscriptionStatus { state, renewal })
    }

    async fn receipt(&self) -> Option<String> {
        self.0
            .run_mobile_plugin::<ReceiptResponse>("getReceipt", ())
            .ok()
            .and_then(|response| response.receipt)
    }

    async fn app_transaction(&self) -> Result<RawAppTransaction> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            original_app_version: String,
            original_purchase_date: DateTime<Utc>,
            bundle_id: String,
            app_version: String,
            environment: Option<String>,
            jws_representation: Option<String>,
        }
        let response = self
            .0
            .run_mobile_plugin::<Response>("getAppTransaction", ())?;
        Ok(RawAppTransaction {
            original_app_version: response.original_app_version,
            original_purchase_date: response.original_purchase_date,
            bundle_id: response.bundle_id,
            app_version: response.app_version,
            environment: response.environment,
            jws_representation: response.jws_representation,
        })
    }

    async fn sync(&self) -> Result<()> {
        self.0.run_mobile_plugin::<()>("sync", ())?;
        Ok(())
    }

    async fn manage_subscriptions(&self) -> Result<()> {
        self.0.run_mobile_plugin::<()>("manageSubscriptions", ())?;
        Ok(())
    }
}
