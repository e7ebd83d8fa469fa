use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store environment a transaction was produced in.
///
/// Anything the platform reports that we do not recognize collapses to
/// `Production` (matching the native layer's fallback policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreEnvironment {
    Production,
    Sandbox,
    Test,
}

impl StoreEnvironment {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("sandbox") => StoreEnvironment::Sandbox,
            Some("xcode") | Some("test") => StoreEnvironment::Test,
            _ => StoreEnvironment::Production,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ProductType {
    #[serde(rename = "subs")]
    Subscription,
    #[serde(rename = "inapp")]
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OwnershipType {
    Purchased,
    FamilyShared,
}

/// Canonical purchase record returned from purchase calls, `getPurchases`,
/// and the `transactionUpdated` event.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub transaction_id: String,
    pub product_identifier: String,
    pub purchase_date: DateTime<Utc>,
    pub product_type: ProductType,
    pub ownership_type: OwnershipType,
    pub environment: StoreEnvironment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_purchase_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    /// Tri-state: `Some(Some(b))` is a known value, `Some(None)` serializes
    /// as an explicit `null` ("unknown"), `None` omits the key entirely.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub will_cancel: Option<Option<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_account_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jws_representation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_identifier: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub display_price: String,
    pub currency_code: String,
    pub product_type: ProductType,
}

/// One per install; used for legacy-entitlement comparisons.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTransactionRecord {
    pub original_app_version: String,
    pub original_purchase_date: DateTime<Utc>,
    pub bundle_id: String,
    pub app_version: String,
    pub environment: Option<StoreEnvironment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jws_representation: Option<String>,
}

// Request / response shapes.

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginVersionResponse {
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSupportResponse {
    pub is_billing_supported: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProductsRequest {
    #[serde(default)]
    pub product_identifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProductsResponse {
    pub products: Vec<ProductRecord>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProductRequest {
    pub product_identifier: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProductResponse {
    pub product: ProductRecord,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseProductRequest {
    pub product_identifier: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub app_account_token: Option<String>,
    #[serde(default = "default_auto_acknowledge")]
    pub auto_acknowledge_purchases: bool,
}

fn default_quantity() -> u32 {
    1
}

fn default_auto_acknowledge() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPurchasesRequest {
    #[serde(default)]
    pub app_account_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPurchasesResponse {
    pub purchases: Vec<PurchaseRecord>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgePurchaseRequest {
    pub purchase_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTransactionResponse {
    pub app_transaction: AppTransactionRecord,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementCheckRequest {
    pub target_build_number: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementCheckResponse {
    pub is_older_version: bool,
    pub original_app_version: String,
}

/// Payload of the `transactionVerificationFailed` event.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationFailure {
    pub transaction_id: String,
    pub error: String,
}

/// Serde helper so `Some(None)` becomes a literal `null` while `None`
/// (combined with `skip_serializing_if`) omits the key.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
