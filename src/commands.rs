use tauri::{command, AppHandle, Runtime};

use crate::models::*;
use crate::{NativePurchasesExt, Result};

#[command]
pub(crate) async fn get_plugin_version<R: Runtime>(
    app: AppHandle<R>,
) -> Result<PluginVersionResponse> {
    Ok(app.native_purchases().client().plugin_version())
}

#[command]
pub(crate) async fn is_billing_supported<R: Runtime>(
    app: AppHandle<R>,
) -> Result<BillingSupportResponse> {
    Ok(app.native_purchases().client().is_billing_supported())
}

#[command]
pub(crate) async fn get_products<R: Runtime>(
    app: AppHandle<R>,
    payload: GetProductsRequest,
) -> Result<GetProductsResponse> {
    app.native_purchases()
        .client()
        .get_products(payload.product_identifiers)
        .await
}

#[command]
pub(crate) async fn get_product<R: Runtime>(
    app: AppHandle<R>,
    payload: GetProductRequest,
) -> Result<GetProductResponse> {
    app.native_purchases()
        .client()
        .get_product(payload.product_identifier)
        .await
}

#[command]
pub(crate) async fn purchase_product<R: Runtime>(
    app: AppHandle<R>,
    payload: PurchaseProductRequest,
) -> Result<PurchaseRecord> {
    app.native_purchases().client().purchase_product(payload).await
}

#[command]
pub(crate) async fn restore_purchases<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.native_purchases().client().restore_purchases().await
}

#[command]
pub(crate) async fn get_purchases<R: Runtime>(
    app: AppHandle<R>,
    payload: Option<GetPurchasesRequest>,
) -> Result<GetPurchasesResponse> {
    app.native_purchases()
        .client()
        .get_purchases(payload.unwrap_or_default())
        .await
}

#[command]
pub(crate) async fn manage_subscriptions<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.native_purchases().client().manage_subscriptions().await
}

#[command]
pub(crate) async fn acknowledge_purchase<R: Runtime>(
    app: AppHandle<R>,
    payload: AcknowledgePurchaseRequest,
) -> Result<()> {
    app.native_purchases()
        .client()
        .acknowledge_purchase(payload.purchase_token)
        .await
}

#[command]
pub(crate) async fn get_app_transaction<R: Runtime>(
    app: AppHandle<R>,
) -> Result<AppTransactionResponse> {
    app.native_purchases().client().get_app_transaction().await
}

#[command]
pub(crate) async fn is_entitled_to_old_business_model<R: Runtime>(
    app: AppHandle<R>,
    payload: EntitlementCheckRequest,
) -> Result<EntitlementCheckResponse> {
    app.native_purchases()
        .client()
        .is_entitled_to_old_business_model(payload.target_build_number)
        .await
}
