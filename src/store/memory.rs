//! In-memory transaction store.

use super::TransactionStore;
use crate::error::{Result, TxError};
use crate::types::{TransactionId, TransactionRecord};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Hash-map backed store. The default for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<TransactionId, TransactionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TransactionStore for MemoryStore {
    fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn insert(&self, record: TransactionRecord) -> Result<()> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    fn update(
        &self,
        id: &TransactionId,
        mutate: &mut dyn FnMut(&mut TransactionRecord) -> Result<()>,
    ) -> Result<TransactionRecord> {
        let mut records = self.records.write();
        let current = records
            .get(id)
            .ok_or_else(|| TxError::NotFound(id.clone()))?;

        let mut next = current.clone();
        mutate(&mut next)?;
        records.insert(id.clone(), next.clone());
        Ok(next)
    }

    fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<TransactionId>> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|id| id.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }
}
