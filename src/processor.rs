//! Processor contract: the pluggable executor bound to a transaction type.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a processor attempt.
///
/// `Retryable` failures count against `max_retries`; `Fatal` failures
/// route the transaction straight to `failed`.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),
}

impl ProcessorError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        ProcessorError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ProcessorError::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::Retryable(_))
    }
}

/// A unit-of-work executor. Bound to a transaction type at manager
/// construction; may block on external I/O.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Check a payload before it is accepted into the queue.
    /// The default accepts everything.
    fn validate(&self, _payload: &serde_json::Value) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Execute one attempt against the payload.
    async fn execute(
        &self,
        payload: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ProcessorError>;
}

/// Maps transaction types to their processors.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a processor to a transaction type. Later bindings for the same
    /// type replace earlier ones.
    pub fn register(&mut self, tx_type: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.insert(tx_type.into(), processor);
    }

    pub fn get(&self, tx_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(tx_type).cloned()
    }

    pub fn contains(&self, tx_type: &str) -> bool {
        self.processors.contains_key(tx_type)
    }

    /// Registered transaction types.
    pub fn types(&self) -> Vec<&str> {
        self.processors.keys().map(String::as_str).collect()
    }
}
