//! RocksDB-backed state store
//!
//! Provides persistent storage with column families for logical data separation.
//! Values are stored as JSON: task payloads are arbitrary `serde_json::Value`s,
//! which self-describing encodings round-trip and compact binary ones do not.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, ALL_CFS};
use super::store::{SharedStateStore, StateStore, StoreError, StoreResult};
use super::types::*;

/// RocksDB-backed persistent state store
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a state store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;

        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Write once: refuses to overwrite an existing key
    fn append<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        if db.get_cf(&cf, key.as_bytes())?.is_some() {
            return Err(StoreError::Duplicate(key.to_string()));
        }

        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Values under a key prefix, in key order
    fn scan_prefix<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        let iter = db.prefix_iterator_cf(&cf, prefix.as_bytes());

        for result in iter {
            let (key, value) = result?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            let decoded = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            values.push(decoded);
        }

        Ok(values)
    }
}

fn timestamp_nanos(ts: &chrono::DateTime<chrono::Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(0)
}

impl StateStore for RocksStore {
    fn put_task(&self, task: &Task) -> StoreResult<()> {
        self.put(schema::CF_TASKS, &schema::keys::task(&task.id), task)
    }

    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.get(schema::CF_TASKS, &schema::keys::task(task_id))
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.scan_prefix(schema::CF_TASKS, "task:")?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    fn put_health(&self, record: &ComponentHealthRecord) -> StoreResult<()> {
        let key = schema::keys::health(&record.component_name);
        self.put(schema::CF_HEALTH, &key, record)
    }

    fn get_health(&self, component: &str) -> StoreResult<Option<ComponentHealthRecord>> {
        self.get(schema::CF_HEALTH, &schema::keys::health(component))
    }

    fn list_health(&self) -> StoreResult<Vec<ComponentHealthRecord>> {
        self.scan_prefix(schema::CF_HEALTH, "health:")
    }

    fn append_attempt(&self, attempt: &RepairAttempt) -> StoreResult<()> {
        let key = schema::keys::attempt(
            &attempt.component_name,
            timestamp_nanos(&attempt.timestamp),
            &attempt.id,
        );
        self.append(schema::CF_ATTEMPTS, &key, attempt)
    }

    fn attempts_for(&self, component: &str) -> StoreResult<Vec<RepairAttempt>> {
        let prefix = schema::keys::attempt_prefix(component);
        let attempts: Vec<RepairAttempt> = self.scan_prefix(schema::CF_ATTEMPTS, &prefix)?;
        // Component names containing ':' can share a prefix with another component.
        Ok(attempts
            .into_iter()
            .filter(|a| a.component_name == component)
            .collect())
    }

    fn all_attempts(&self) -> StoreResult<Vec<RepairAttempt>> {
        let mut attempts: Vec<RepairAttempt> = self.scan_prefix(schema::CF_ATTEMPTS, "att:")?;
        attempts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(attempts)
    }

    fn append_rollback(&self, event: &RollbackEvent) -> StoreResult<()> {
        let key = schema::keys::rollback(
            &event.component_name,
            timestamp_nanos(&event.timestamp),
            &event.snapshot_id,
        );
        self.append(schema::CF_ROLLBACKS, &key, event)
    }

    fn rollbacks_for(&self, component: &str) -> StoreResult<Vec<RollbackEvent>> {
        let prefix = schema::keys::rollback_prefix(component);
        let events: Vec<RollbackEvent> = self.scan_prefix(schema::CF_ROLLBACKS, &prefix)?;
        Ok(events
            .into_iter()
            .filter(|e| e.component_name == component)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (RocksStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_task_roundtrip_with_json_payload() {
        let (store, _dir) = test_store();
        let task = Task::new("echo", serde_json::json!({"msg": "hi", "n": [1, 2]}), 5);

        store.put_task(&task).unwrap();
        let retrieved = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(retrieved.payload["msg"], "hi");
        assert_eq!(retrieved.priority, 5);
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let store = RocksStore::open(&path).unwrap();
            let attempt = RepairAttempt::new("db", "down", "connectivity", RepairTier::Restart);
            store.append_attempt(&attempt).unwrap();
        }

        let store = RocksStore::open(&path).unwrap();
        assert_eq!(store.attempts_for("db").unwrap().len(), 1);
    }

    #[test]
    fn test_attempt_written_once() {
        let (store, _dir) = test_store();
        let attempt = RepairAttempt::new("db", "down", "connectivity", RepairTier::Restart);
        store.append_attempt(&attempt).unwrap();
        assert!(matches!(
            store.append_attempt(&attempt),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_prefix_isolation_between_components() {
        let (store, _dir) = test_store();
        store
            .append_attempt(&RepairAttempt::new("a", "x", "other", RepairTier::Restart))
            .unwrap();
        store
            .append_attempt(&RepairAttempt::new("a:b", "x", "other", RepairTier::Restart))
            .unwrap();

        assert_eq!(store.attempts_for("a").unwrap().len(), 1);
        assert_eq!(store.attempts_for("a:b").unwrap().len(), 1);
        assert_eq!(store.all_attempts().unwrap().len(), 2);
    }
}
