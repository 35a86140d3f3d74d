//! State store seam and the in-memory implementation
//!
//! Everything the scheduler, the health tracker and the repair ledger persist
//! goes through [`StateStore`]. Writes are single short operations so that
//! concurrent workers and repair sessions never hold a store lock across an
//! await point.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::types::*;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Append-only record already written: {0}")]
    Duplicate(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a StateStore
pub type SharedStateStore = Arc<dyn StateStore>;

/// Persistence for task records, the health table, the repair ledger and the
/// rollback log.
///
/// Ledger and rollback methods are append-only: there is no update or delete.
pub trait StateStore: Send + Sync {
    // Tasks
    fn put_task(&self, task: &Task) -> StoreResult<()>;
    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>>;
    fn list_tasks(&self) -> StoreResult<Vec<Task>>;

    // Health table
    fn put_health(&self, record: &ComponentHealthRecord) -> StoreResult<()>;
    fn get_health(&self, component: &str) -> StoreResult<Option<ComponentHealthRecord>>;
    fn list_health(&self) -> StoreResult<Vec<ComponentHealthRecord>>;

    // Repair ledger
    fn append_attempt(&self, attempt: &RepairAttempt) -> StoreResult<()>;
    /// All attempts for a component, oldest first
    fn attempts_for(&self, component: &str) -> StoreResult<Vec<RepairAttempt>>;
    fn all_attempts(&self) -> StoreResult<Vec<RepairAttempt>>;

    // Rollback log
    fn append_rollback(&self, event: &RollbackEvent) -> StoreResult<()>;
    /// All rollbacks for a component, oldest first
    fn rollbacks_for(&self, component: &str) -> StoreResult<Vec<RollbackEvent>>;

    /// Attempts for a component at or after `since`, oldest first
    fn attempts_since(
        &self,
        component: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<RepairAttempt>> {
        Ok(self
            .attempts_for(component)?
            .into_iter()
            .filter(|a| a.timestamp >= since)
            .collect())
    }
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<TaskId, Task>,
    health: BTreeMap<String, ComponentHealthRecord>,
    attempts: Vec<RepairAttempt>,
    rollbacks: Vec<RollbackEvent>,
}

/// In-process store. Independent instances never share state, which keeps
/// tests isolated.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }
}

impl StateStore for MemoryStore {
    fn put_task(&self, task: &Task) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.tasks.get(task_id).cloned())
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    fn put_health(&self, record: &ComponentHealthRecord) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state
            .health
            .insert(record.component_name.clone(), record.clone());
        Ok(())
    }

    fn get_health(&self, component: &str) -> StoreResult<Option<ComponentHealthRecord>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.health.get(component).cloned())
    }

    fn list_health(&self) -> StoreResult<Vec<ComponentHealthRecord>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.health.values().cloned().collect())
    }

    fn append_attempt(&self, attempt: &RepairAttempt) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        if state.attempts.iter().any(|a| a.id == attempt.id) {
            return Err(StoreError::Duplicate(attempt.id.clone()));
        }
        state.attempts.push(attempt.clone());
        Ok(())
    }

    fn attempts_for(&self, component: &str) -> StoreResult<Vec<RepairAttempt>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state
            .attempts
            .iter()
            .filter(|a| a.component_name == component)
            .cloned()
            .collect())
    }

    fn all_attempts(&self) -> StoreResult<Vec<RepairAttempt>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.attempts.clone())
    }

    fn append_rollback(&self, event: &RollbackEvent) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.rollbacks.push(event.clone());
        Ok(())
    }

    fn rollbacks_for(&self, component: &str) -> StoreResult<Vec<RollbackEvent>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state
            .rollbacks
            .iter()
            .filter(|r| r.component_name == component)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_task_crud() {
        let store = MemoryStore::new();
        let task = Task::new("echo", serde_json::json!({"msg": "hi"}), 0);
        let task_id = task.id.clone();

        store.put_task(&task).unwrap();
        let retrieved = store.get_task(&task_id).unwrap().unwrap();
        assert_eq!(retrieved.task_type, "echo");
        assert!(store.get_task("missing").unwrap().is_none());
        assert_eq!(store.list_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_health_upsert() {
        let store = MemoryStore::new();
        let mut record = ComponentHealthRecord::new("db");
        store.put_health(&record).unwrap();

        record.status = HealthStatus::Failing;
        record.consecutive_failures = 1;
        store.put_health(&record).unwrap();

        let retrieved = store.get_health("db").unwrap().unwrap();
        assert_eq!(retrieved.status, HealthStatus::Failing);
        assert_eq!(store.list_health().unwrap().len(), 1);
    }

    #[test]
    fn test_attempts_are_append_only() {
        let store = MemoryStore::new();
        let attempt = RepairAttempt::new("db", "down", "connectivity", RepairTier::Restart);

        store.append_attempt(&attempt).unwrap();
        let err = store.append_attempt(&attempt).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.attempts_for("db").unwrap().len(), 1);
        assert!(store.attempts_for("other").unwrap().is_empty());
    }

    #[test]
    fn test_attempts_since_filters_window() {
        let store = MemoryStore::new();
        let mut old = RepairAttempt::new("db", "down", "connectivity", RepairTier::Restart);
        old.timestamp = Utc::now() - Duration::hours(2);
        let recent = RepairAttempt::new("db", "down", "connectivity", RepairTier::Restart);

        store.append_attempt(&old).unwrap();
        store.append_attempt(&recent).unwrap();

        let since = Utc::now() - Duration::hours(1);
        let window = store.attempts_since("db", since).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, recent.id);
    }

    #[test]
    fn test_rollbacks_filtered_by_component() {
        let store = MemoryStore::new();
        store
            .append_rollback(&RollbackEvent {
                component_name: "db".into(),
                snapshot_id: "snap-1".into(),
                reason: "validation_failure".into(),
                timestamp: Utc::now(),
                success: true,
                error_message: None,
            })
            .unwrap();

        assert_eq!(store.rollbacks_for("db").unwrap().len(), 1);
        assert!(store.rollbacks_for("cache").unwrap().is_empty());
    }
}
