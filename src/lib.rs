use std::sync::Arc;

use tauri::{
  plugin::{Builder, TauriPlugin},
  AppHandle, Emitter, Manager, Runtime,
};
use tracing::warn;

pub use models::*;

#[cfg(not(any(target_os = "android", target_os = "ios")))]
mod desktop;
#[cfg(any(target_os = "android", target_os = "ios"))]
mod mobile;

mod client;
mod commands;
mod error;
mod listener;
mod models;
pub mod store;
mod transaction;

pub use client::{FinishPolicy, PurchasesClient};
pub use error::{Error, Result};
pub use listener::{UpdateEvents, UpdateListener, UPDATE_NOTIFY_DELAY};
pub use transaction::{collect_purchases, normalize};

/// Event names emitted to the webview, fire-and-forget.
pub const TRANSACTION_UPDATED_EVENT: &str = "transactionUpdated";
pub const TRANSACTION_VERIFICATION_FAILED_EVENT: &str = "transactionVerificationFailed";

/// Access to the native-purchases APIs.
pub struct NativePurchases<R: Runtime> {
  app: AppHandle<R>,
  client: PurchasesClient,
}

impl<R: Runtime> NativePurchases<R> {
  pub fn client(&self) -> &PurchasesClient {
    &self.client
  }

  /// Subscribe to store transaction updates, cancelling any existing
  /// subscription first.
  pub fn start_listener(&self) {
    self
      .client
      .start_listener(Arc::new(EventForwarder(self.app.clone())));
  }

  pub fn stop_listener(&self) {
    self.client.stop_listener();
  }
}

/// Forwards listener notifications to the webview as Tauri events.
struct EventForwarder<R: Runtime>(AppHandle<R>);

impl<R: Runtime> UpdateEvents for EventForwarder<R> {
  fn transaction_updated(&self, record: &PurchaseRecord) {
    if let Err(err) = self.0.emit(TRANSACTION_UPDATED_EVENT, record.clone()) {
      warn!("failed to emit {TRANSACTION_UPDATED_EVENT}: {err}");
    }
  }

  fn transaction_verification_failed(&self, failure: &VerificationFailure) {
    if let Err(err) = self
      .0
      .emit(TRANSACTION_VERIFICATION_FAILED_EVENT, failure.clone())
    {
      warn!("failed to emit {TRANSACTION_VERIFICATION_FAILED_EVENT}: {err}");
    }
  }
}

/// Extensions to [`tauri::App`], [`tauri::AppHandle`] and [`tauri::Window`]
/// to access the native-purchases APIs.
pub trait NativePurchasesExt<R: Runtime> {
  fn native_purchases(&self) -> &NativePurchases<R>;
}

impl<R: Runtime, T: Manager<R>> crate::NativePurchasesExt<R> for T {
  fn native_purchases(&self) -> &NativePurchases<R> {
    self.state::<NativePurchases<R>>().inner()
  }
}

/// Initializes the plugin.
pub fn init<R: Runtime>() -> TauriPlugin<R> {
  Builder::new("native-purchases")
    .invoke_handler(tauri::generate_handler![
      commands::get_plugin_version,
      commands::is_billing_supported,
      commands::get_products,
      commands::get_product,
      commands::purchase_product,
      commands::restore_purchases,
      commands::get_purchases,
      commands::manage_subscriptions,
      commands::acknowledge_purchase,
      commands::get_app_transaction,
      commands::is_entitled_to_old_business_model,
    ])
    .setup(|app, api| {
      #[cfg(not(any(target_os = "android", target_os = "ios")))]
      let store = desktop::init(app, api)?;
      #[cfg(any(target_os = "android", target_os = "ios"))]
      let store = mobile::init(app, api)?;

      let purchases = NativePurchases {
        app: app.clone(),
        client: PurchasesClient::new(store),
      };
      // Start listening to store transaction updates as early as possible.
      purchases.start_listener();
      app.manage(purchases);
      Ok(())
    })
    .on_event(|app, event| {
      if let tauri::RunEvent::Exit = event {
        app.native_purchases().stop_listener();
      }
    })
    .build()
}
