//! State persistence for tasks, component health and the repair ledger
//!
//! All shared mutable state lives behind the [`StateStore`] trait:
//!
//! - task records and their lifecycle status
//! - the health table (one mutable row per component)
//! - the append-only repair ledger
//! - the append-only rollback log
//!
//! [`MemoryStore`] is the default backend. With the `heavy-state` feature,
//! [`RocksStore`] persists the same data in RocksDB column families:
//!
//! - `tasks`: Task records
//! - `health`: ComponentHealthRecord rows
//! - `attempts`: RepairAttempt entries, keyed by component then timestamp
//! - `rollbacks`: RollbackEvent entries, keyed by component then timestamp
//!
//! # Usage
//!
//! ```ignore
//! use coordination::state::{MemoryStore, StateStore, Task};
//!
//! let store = MemoryStore::new().shared();
//! let task = Task::new("echo", serde_json::json!({"msg": "hi"}), 0);
//! store.put_task(&task)?;
//! ```

#[cfg(test)]
pub(crate) mod flaky;
#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(feature = "heavy-state")]
pub use rocks::RocksStore;
pub use store::{MemoryStore, SharedStateStore, StateStore, StoreError, StoreResult};
pub use types::{
    ComponentHealthRecord, HealthStatus, RepairAttempt, RepairOutcome, RepairTier, RollbackEvent,
    SnapshotId, Task, TaskId, TaskStatus, DEFAULT_MAX_RETRIES,
};
