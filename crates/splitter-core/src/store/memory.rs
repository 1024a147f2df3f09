use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::OperationStore;
use crate::error::StoreError;
use crate::lock::LockGenerator;
use crate::operation::{Counters, Operation};

/// Single-process store: a map behind a mutex. Used in tests and for
/// throwaway local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    operations: Mutex<HashMap<String, Operation>>,
    counters: Mutex<Counters>,
    locks: LockGenerator,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locks(locks: LockGenerator) -> Self {
        Self {
            locks,
            ..Self::default()
        }
    }

    /// Number of stored operations.
    pub fn len(&self) -> usize {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn save(&self, op: &mut Operation) -> Result<(), StoreError> {
        let mut operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        match operations.get(&op.id) {
            None if op.lock.is_empty() => {}
            None => return Err(StoreError::NotFound { id: op.id.clone() }),
            Some(existing) if !op.lock.is_empty() && existing.lock == op.lock => {}
            Some(existing) => {
                *op = existing.clone();
                return Err(StoreError::LockConflict { id: op.id.clone() });
            }
        }
        op.lock = self.locks.next_lock();
        operations.insert(op.id.clone(), op.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Operation>, StoreError> {
        Ok(self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn increment_counters(&self, deltas: &Counters) -> Result<(), StoreError> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, delta) in deltas.iter() {
            counters.add(name, delta);
        }
        Ok(())
    }

    async fn read_counters(&self) -> Result<Counters, StoreError> {
        Ok(self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn memory_store_honors_contract() {
        contract::run_all(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn locks_come_from_the_injected_generator() {
        let store = MemoryStore::with_locks(LockGenerator::with_prefix("mem"));
        let mut op = Operation::new("a", chrono::Utc::now());
        store.save(&mut op).await.unwrap();
        assert_eq!(op.lock, "mem-1");
        store.save(&mut op).await.unwrap();
        assert_eq!(op.lock, "mem-2");
        assert_eq!(store.len(), 1);
    }
}
