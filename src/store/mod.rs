//! Persisted transaction store implementations.

mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{TransactionId, TransactionRecord};

/// Durable per-id record holder with hash-map semantics.
///
/// The lifecycle manager is the single writer; the gateway and client layers
/// only read through it. Implementations must make `update` atomic: the
/// mutator runs against a copy of the current record, and the stored record
/// is replaced only if the mutator returns `Ok` and the write commits. A
/// failed update leaves the previously persisted state intact.
pub trait TransactionStore: Send + Sync {
    /// Read the record for an id, if present.
    fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>>;

    /// Persist a fresh record. Overwrites any existing record for the id.
    fn insert(&self, record: TransactionRecord) -> Result<()>;

    /// Atomically read-modify-write the record for an id.
    ///
    /// Returns the updated record, `NotFound` if the id is absent, or the
    /// mutator's error with the stored record unchanged.
    fn update(
        &self,
        id: &TransactionId,
        mutate: &mut dyn FnMut(&mut TransactionRecord) -> Result<()>,
    ) -> Result<TransactionRecord>;

    /// Ids whose string form starts with `prefix`, in unspecified order.
    fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<TransactionId>>;
}
