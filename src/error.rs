use serde::{ser::Serializer, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[cfg(any(target_os = "android", target_os = "ios"))]
  #[error(transparent)]
  PluginInvoke(#[from] tauri::plugin::mobile::PluginInvokeError),
  #[error("productIdentifier is empty, give an id")]
  EmptyProductIdentifier,
  #[error("appAccountToken is not a valid UUID: {0}")]
  InvalidAccountToken(String),
  #[error("cannot find product for id {0}")]
  ProductNotFound(String),
  #[error("no unfinished transaction found for token {0}")]
  TransactionNotFound(String),
  #[error("transaction pending")]
  Pending,
  #[error("user cancelled")]
  Cancelled,
  #[error("transaction verification failed: {0}")]
  Verification(String),
  #[error("in-app purchases require iOS 15 / Android 5 or later and are not supported on this platform")]
  Unsupported,
  #[error("{0}")]
  Store(String),
  #[error("unknown purchase error")]
  Unknown,
}

impl Serialize for Error {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.to_string().as_ref())
  }
}
