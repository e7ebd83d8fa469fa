//! Abstraction over the platform's store client (StoreKit, Play Billing).
//!
//! The platform owns persistence and ordering: transaction enumerations are
//! lazily produced sequences, the unfinished set survives process restarts,
//! and verification is a platform-level cryptographic outcome we only
//! observe. Everything above this trait is plain reconciliation logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::models::{ProductRecord, StoreEnvironment};
use crate::Result;

pub mod memory;

/// Raw transaction as surfaced by the platform, before normalization.
#[derive(Debug, Clone)]
pub struct StoreTransaction {
    pub id: String,
    pub product_id: String,
    pub product_kind: StoreProductKind,
    pub ownership: StoreOwnership,
    pub purchase_date: DateTime<Utc>,
    pub original_purchase_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    /// Raw environment string; `None` on platform surfaces that predate it.
    pub environment: Option<String>,
    pub app_account_token: Option<Uuid>,
    pub jws_representation: Option<String>,
}

impl StoreTransaction {
    pub fn environment(&self) -> StoreEnvironment {
        StoreEnvironment::parse(self.environment.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreProductKind {
    AutoRenewable,
    NonRenewing,
    Consumable,
    NonConsumable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOwnership {
    Purchased,
    FamilyShared,
}

/// Platform verification outcome wrapping an enumerated entry.
#[derive(Debug, Clone)]
pub enum Verification<T> {
    Verified(T),
    Unverified { transaction_id: String, error: String },
}

impl<T> Verification<T> {
    pub fn verified(self) -> Option<T> {
        match self {
            Verification::Verified(value) => Some(value),
            Verification::Unverified { .. } => None,
        }
    }
}

/// Current renewal status of a subscription, when the platform has one.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus {
    pub state: SubscriptionState,
    pub renewal: Verification<RenewalInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Expired,
    InBillingRetry,
    InGracePeriod,
    Revoked,
}

#[derive(Debug, Clone)]
pub struct RenewalInfo {
    pub will_auto_renew: bool,
}

/// Outcome of a purchase initiation, mirroring the platform's result set.
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    Success(Verification<StoreTransaction>),
    Pending,
    UserCancelled,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct PurchaseOptions {
    pub quantity: u32,
    pub app_account_token: Option<Uuid>,
}

/// Raw per-install transaction, before shaping into an
/// [`crate::models::AppTransactionRecord`].
#[derive(Debug, Clone)]
pub struct RawAppTransaction {
    pub original_app_version: String,
    pub original_purchase_date: DateTime<Utc>,
    pub bundle_id: String,
    pub app_version: String,
    pub environment: Option<String>,
    pub jws_representation: Option<String>,
}

pub type TransactionStream = BoxStream<'static, Verification<StoreTransaction>>;

/// Asynchronous surface of the native store client.
///
/// All operations suspend rather than block; availability is gated by the
/// platform version, so unsupported hosts return [`crate::Error::Unsupported`].
#[async_trait]
pub trait StoreBridge: Send + Sync + 'static {
    fn is_supported(&self) -> bool;

    async fn products(&self, identifiers: &[String]) -> Result<Vec<ProductRecord>>;

    async fn purchase(&self, product_id: &str, options: PurchaseOptions)
        -> Result<PurchaseOutcome>;

    /// Currently-active entitlements, lazily produced.
    fn current_entitlements(&self) -> TransactionStream;

    /// Full transaction history, lazily produced.
    fn all_transactions(&self) -> TransactionStream;

    /// Open (unfinished) transactions. Persistent across process restarts.
    fn unfinished_transactions(&self) -> TransactionStream;

    /// Live feed of transaction updates for the lifetime of the subscription.
    fn transaction_updates(&self) -> TransactionStream;

    /// Mark a transaction as fully processed so the platform stops
    /// redelivering it. Idempotent at the platform level.
    async fn finish(&self, transaction_id: &str) -> Result<()>;

    /// Current renewal status for the subscription a transaction belongs to,
    /// or `None` when the platform has no status for it.
    async fn subscription_status(&self, transaction_id: &str) -> Option<SubscriptionStatus>;

    /// Locally cached receipt blob, base64-encoded. Read failures are
    /// swallowed; absence is not an error.
    async fn receipt(&self) -> Option<String>;

    async fn app_transaction(&self) -> Result<RawAppTransaction>;

    /// Force a sync with the store (the restore path).
    async fn sync(&self) -> Result<()>;

    /// Open the platform's subscription-management surface.
    async fn manage_subscriptions(&self) -> Result<()>;
}
