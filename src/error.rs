use miette::Diagnostic;
use thiserror::Error;

/// Errors reported by the external payment rail.
///
/// `NotFound` is the sentinel the workflow branches on: a lookup miss leads to
/// creation, every other variant is terminal for the payout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("resource not found")]
    NotFound,
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Errors raised while delivering a batch completion notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to encode notification payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("client returned status code {0}")]
    Status(u16),
}

#[derive(Error, Diagnostic, Debug)]
pub enum PayoutError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(bulkpay::validation))]
    Validation(String),
    #[error("Not found: {0}")]
    #[diagnostic(code(bulkpay::not_found))]
    NotFound(String),
    #[error("Gateway error: {0}")]
    #[diagnostic(code(bulkpay::gateway))]
    Gateway(#[from] GatewayError),
    #[error("Storage error: {0}")]
    #[diagnostic(code(bulkpay::storage))]
    Storage(String),
    #[error("CSV error: {0}")]
    #[diagnostic(code(bulkpay::csv))]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    #[diagnostic(code(bulkpay::io))]
    Io(#[from] std::io::Error),
}

impl PayoutError {
    pub fn storage(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{}: {}", context, err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PayoutError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PayoutError>;
