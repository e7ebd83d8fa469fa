const COMMANDS: &[&str] = &[
  "get_plugin_version",
  "is_billing_supported",
  "get_products",
  "get_product",
  "purchase_product",
  "restore_purchases",
  "get_purchases",
  "manage_subscriptions",
  "acknowledge_purchase",
  "get_app_transaction",
  "is_entitled_to_old_business_model",
];

fn main() {
  tauri_plugin::Builder::new(COMMANDS).build();
}
