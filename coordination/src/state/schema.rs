//! Column family definitions for the RocksDB state store
//!
//! Each column family provides logical separation of data types
//! while sharing the same RocksDB instance.

/// Column family for task records
pub const CF_TASKS: &str = "tasks";

/// Column family for the component health table
pub const CF_HEALTH: &str = "health";

/// Column family for the append-only repair ledger
pub const CF_ATTEMPTS: &str = "attempts";

/// Column family for the append-only rollback log
pub const CF_ROLLBACKS: &str = "rollbacks";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_TASKS, CF_HEALTH, CF_ATTEMPTS, CF_ROLLBACKS];

/// Key prefixes for compound keys
pub mod keys {
    /// Create a task key
    pub fn task(task_id: &str) -> String {
        format!("task:{}", task_id)
    }

    /// Create a health key
    pub fn health(component: &str) -> String {
        format!("health:{}", component)
    }

    /// Prefix shared by all ledger entries of a component
    pub fn attempt_prefix(component: &str) -> String {
        format!("att:{}:", component)
    }

    /// Create a ledger key (timestamp-ordered within a component)
    pub fn attempt(component: &str, timestamp_nanos: i64, attempt_id: &str) -> String {
        format!("att:{}:{:020}:{}", component, timestamp_nanos, attempt_id)
    }

    /// Prefix shared by all rollback entries of a component
    pub fn rollback_prefix(component: &str) -> String {
        format!("rb:{}:", component)
    }

    /// Create a rollback key (timestamp-ordered within a component)
    pub fn rollback(component: &str, timestamp_nanos: i64, snapshot_id: &str) -> String {
        format!("rb:{}:{:020}:{}", component, timestamp_nanos, snapshot_id)
    }
}
