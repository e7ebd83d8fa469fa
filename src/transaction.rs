//! Transaction normalization and purchase collection.
//!
//! Turns raw store transactions into canonical [`PurchaseRecord`]s and
//! consolidates the store's two enumerable sources (current entitlements,
//! full history) into one deduplicated list.

use chrono::Utc;
use futures::StreamExt;
use uuid::Uuid;

use crate::models::{OwnershipType, ProductType, PurchaseRecord};
use crate::store::{
    StoreBridge, StoreOwnership, StoreProductKind, StoreTransaction, SubscriptionState,
    Verification,
};

/// Build a canonical purchase record from one verified store transaction.
///
/// `always_include_will_cancel` forces the `willCancel` key to be present
/// (as unknown) even when no subscription info is computed, so callers that
/// always display the field never deal with a missing key.
pub async fn normalize(
    store: &dyn StoreBridge,
    txn: &StoreTransaction,
    always_include_will_cancel: bool,
) -> PurchaseRecord {
    let product_type = match txn.product_kind {
        StoreProductKind::AutoRenewable => ProductType::Subscription,
        _ => ProductType::OneTime,
    };
    let ownership_type = match txn.ownership {
        StoreOwnership::FamilyShared => OwnershipType::FamilyShared,
        StoreOwnership::Purchased => OwnershipType::Purchased,
    };

    let mut record = PurchaseRecord {
        transaction_id: txn.id.clone(),
        product_identifier: txn.product_id.clone(),
        purchase_date: txn.purchase_date,
        product_type,
        ownership_type,
        environment: txn.environment(),
        original_purchase_date: None,
        expiration_date: None,
        is_active: None,
        will_cancel: None,
        receipt: store.receipt().await,
        app_account_token: txn.app_account_token.map(|token| token.to_string()),
        jws_representation: txn.jws_representation.clone(),
    };

    if product_type == ProductType::Subscription {
        record.original_purchase_date = Some(txn.original_purchase_date);
        if let Some(expiration) = txn.expiration_date {
            record.expiration_date = Some(expiration);
            record.is_active = Some(expiration > Utc::now());
        }
        record.will_cancel = Some(will_cancel(store, &txn.id).await);
    }

    if always_include_will_cancel && record.will_cancel.is_none() {
        record.will_cancel = Some(None);
    }

    record
}

/// Tri-state renewal outlook: `Some(b)` when the renewal status is verified
/// and the subscription is currently subscribed, `None` ("unknown")
/// otherwise.
async fn will_cancel(store: &dyn StoreBridge, transaction_id: &str) -> Option<bool> {
    let status = store.subscription_status(transaction_id).await?;
    if status.state != SubscriptionState::Subscribed {
        return None;
    }
    match status.renewal {
        Verification::Verified(renewal) => Some(!renewal.will_auto_renew),
        Verification::Unverified { .. } => None,
    }
}

/// Enumerate current entitlements followed by the full transaction history,
/// normalizing each verified entry and deduplicating by transaction id.
///
/// Unverified entries are silently skipped here; they surface through the
/// update listener instead. When `filter` is provided, entries whose
/// account-linking token does not equal it (or that carry no token) are
/// excluded. Result order follows store enumeration order.
pub async fn collect_purchases(
    store: &dyn StoreBridge,
    filter: Option<&str>,
) -> Vec<PurchaseRecord> {
    let mut purchases: Vec<PurchaseRecord> = Vec::new();

    let mut entitlements = store.current_entitlements();
    while let Some(entry) = entitlements.next().await {
        let Some(txn) = entry.verified() else {
            continue;
        };
        if excluded_by_filter(&txn, filter) {
            continue;
        }
        purchases.push(normalize(store, &txn, false).await);
    }

    let mut history = store.all_transactions();
    while let Some(entry) = history.next().await {
        let Some(txn) = entry.verified() else {
            continue;
        };
        if excluded_by_filter(&txn, filter) {
            continue;
        }
        if purchases.iter().any(|p| p.transaction_id == txn.id) {
            continue;
        }
        purchases.push(normalize(store, &txn, false).await);
    }

    purchases
}

fn excluded_by_filter(txn: &StoreTransaction, filter: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return false;
    };
    match (txn.app_account_token, Uuid::parse_str(filter)) {
        (Some(token), Ok(wanted)) => token != wanted,
        // No token on the entry, or an unparsable filter: nothing matches.
        _ => true,
    }
}
