use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The external store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A compare-and-set lost against a concurrent writer.
    #[error("Write contended on key '{0}'")]
    Contended(String),

    #[error("Trade not found: {0}")]
    TradeNotFound(String),

    #[error("A trade is already open for {0}")]
    TradeAlreadyOpen(String),

    /// A write would break a data-model invariant and was refused.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Alert delivery failed: {0}")]
    Alert(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Infrastructure failures leave shared state untouched; the caller's
    /// scheduler retries on its next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Contended(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
