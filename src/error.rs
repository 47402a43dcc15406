//! Error types for the transaction engine.

use crate::types::{TransactionId, TransactionStatus};
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    #[error("Invalid transaction id: {0}")]
    InvalidId(String),

    #[error("No processor registered for type: {0}")]
    UnknownType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Transaction {id} is not cancellable (status {status})")]
    NotCancellable {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Transaction {id} is already terminal (status {status})")]
    TerminalConflict {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid journal format: {0}")]
    InvalidFormat(String),

    #[error("Journal is locked by another process")]
    Locked,

    #[error("Subscription dropped")]
    SubscriptionDropped,

    #[error("Manager is shutting down")]
    ShuttingDown,
}

impl TxError {
    /// Machine-checkable error kind, used in HTTP error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            TxError::Io(_) => "io",
            TxError::NotFound(_) => "not_found",
            TxError::InvalidId(_) => "invalid_id",
            TxError::UnknownType(_) => "unknown_type",
            TxError::InvalidPayload(_) => "invalid_payload",
            TxError::NotCancellable { .. } => "not_cancellable",
            TxError::TerminalConflict { .. } => "terminal_conflict",
            TxError::Serialization(_) => "serialization",
            TxError::Deserialization(_) => "deserialization",
            TxError::Corruption(_) => "corruption",
            TxError::InvalidFormat(_) => "invalid_format",
            TxError::Locked => "locked",
            TxError::SubscriptionDropped => "subscription_dropped",
            TxError::ShuttingDown => "shutting_down",
        }
    }

    /// Validation errors are surfaced immediately and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TxError::InvalidId(_) | TxError::UnknownType(_) | TxError::InvalidPayload(_)
        )
    }
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for TxError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TxError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TxError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TxError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, TxError>;
