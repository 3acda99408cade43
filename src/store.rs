//! Transaction store and the feature resolver used by `explain`

use crate::features::FeatureVector;
use crate::types::TransactionRecord;
use std::collections::VecDeque;
use std::sync::RwLock;

/// Looks up the raw features of a previously scored transaction.
pub trait FeatureResolver: Send + Sync {
    fn resolve(&self, transaction_id: &str) -> Option<FeatureVector>;
}

/// Bounded store of the most recent transactions. The oldest record is
/// evicted once `capacity` is reached.
#[derive(Debug)]
pub struct InMemoryTransactionStore {
    records: RwLock<VecDeque<TransactionRecord>>,
    capacity: usize,
}

impl InMemoryTransactionStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a record; an existing record with the same id is replaced.
    pub fn insert(&self, record: TransactionRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|r| r.transaction_id != record.transaction_id);
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn get(&self, transaction_id: &str) -> Option<TransactionRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .find(|r| r.transaction_id == transaction_id)
            .cloned()
    }

    /// Most recent first
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeatureResolver for InMemoryTransactionStore {
    fn resolve(&self, transaction_id: &str) -> Option<FeatureVector> {
        self.get(transaction_id).map(|r| r.features)
    }
}
