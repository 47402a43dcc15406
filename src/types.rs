//! Core types for the transaction engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Prefix every transaction id carries.
pub const ID_PREFIX: &str = "tx_";

/// Minimum total length of a well-formed transaction id.
pub const MIN_ID_LEN: usize = 12;

/// Unique identifier for a transaction.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a fresh id: `tx_` + UUIDv4 hex.
    pub fn generate() -> Self {
        TransactionId(format!("{}{}", ID_PREFIX, Uuid::new_v4().simple()))
    }

    /// Parse an externally supplied id, enforcing the prefix + minimum-length
    /// convention before any store lookup happens.
    pub fn parse(s: &str) -> Option<Self> {
        if Self::is_valid(s) {
            Some(TransactionId(s.to_string()))
        } else {
            None
        }
    }

    /// Check id format: prefix, minimum length, alphanumeric suffix.
    pub fn is_valid(s: &str) -> bool {
        s.len() >= MIN_ID_LEN
            && s.starts_with(ID_PREFIX)
            && s[ID_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    /// This timestamp shifted forward by a duration.
    pub fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(d.as_micros() as i64))
    }

    /// Time remaining until this timestamp, or `None` if it has passed.
    pub fn duration_until(self) -> Option<Duration> {
        let now = Timestamp::now();
        if self.0 <= now.0 {
            None
        } else {
            Some(Duration::from_micros((self.0 - now.0) as u64))
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Scheduling weight for queued transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Life-cycle status of a transaction.
///
/// Transitions are monotonic toward a terminal state:
/// `queued → processing → {completed | failed | cancelled}`.
/// Retry re-entry stays inside `processing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// Terminal states admit no further writes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    /// Coarse status-derived progress percentage for UI feedback.
    /// Not stored; always computed from the status bucket.
    pub fn progress(self) -> u8 {
        match self {
            TransactionStatus::Queued => 10,
            TransactionStatus::Processing => 50,
            TransactionStatus::Completed => 100,
            TransactionStatus::Failed | TransactionStatus::Cancelled => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Queued => "queued",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single persisted transaction record.
///
/// The lifecycle manager is the only writer; everything else reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique identifier (assigned at enqueue, immutable).
    pub id: TransactionId,

    /// Application-defined type; selects the bound processor.
    pub tx_type: String,

    /// Opaque payload handed to the processor.
    pub payload: serde_json::Value,

    /// Caller-supplied metadata, not interpreted by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Scheduling weight.
    pub priority: Priority,

    /// Current life-cycle status.
    pub status: TransactionStatus,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Set exactly once, on the transition into `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,

    /// Set exactly once, on the transition into `cancelled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<Timestamp>,

    /// Processor result; success only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Most recent processor error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Failed attempts so far; monotonic non-decreasing.
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<Timestamp>,

    /// When the next attempt is due. Cleared once the attempt starts
    /// or the record reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<Timestamp>,
}

impl TransactionRecord {
    /// Create a fresh `queued` record from an input.
    pub fn new(id: TransactionId, input: TransactionInput) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            tx_type: input.tx_type,
            payload: input.payload,
            metadata: input.metadata,
            priority: input.priority,
            status: TransactionStatus::Queued,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            result: None,
            last_error: None,
            retry_count: 0,
            last_retry_at: None,
            next_retry_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Input for enqueueing a transaction (before an id is assigned).
#[derive(Clone, Debug)]
pub struct TransactionInput {
    pub tx_type: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub priority: Priority,
}

impl TransactionInput {
    pub fn new(tx_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tx_type: tx_type.into(),
            payload,
            metadata: None,
            priority: Priority::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A broadcast status transition, derived from a persisted record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    /// Status-derived progress percentage.
    pub progress: u8,
    pub timestamp: Timestamp,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl From<&TransactionRecord> for NotificationEvent {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            transaction_id: record.id.clone(),
            status: record.status,
            progress: record.status.progress(),
            timestamp: record.updated_at,
            retry_count: record.retry_count,
            error: record.last_error.clone(),
            result: record.result.clone(),
        }
    }
}
