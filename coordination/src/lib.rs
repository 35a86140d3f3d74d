//! Autonomous Task Execution and Progressive Self-Repair
//!
//! This library provides:
//! - A task queue drained by a fixed-size worker pool with per-task retries
//! - Per-component health tracking
//! - A tiered repair engine (restart, dependency repair, generated code) with
//!   pre-repair gating, snapshots, post-repair validation and rollback
//! - An append-only repair ledger with a diagnostic report
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use coordination::escalation::{CommandRestart, CommandSpec, RepairEscalationEngine};
//! use coordination::state::MemoryStore;
//!
//! let store = MemoryStore::new().shared();
//! let engine = RepairEscalationEngine::new(store).with_restart(
//!     "ollama_service",
//!     Arc::new(CommandRestart::new(CommandSpec::new(
//!         vec!["systemctl".into(), "restart".into(), "ollama".into()],
//!         std::time::Duration::from_secs(30),
//!     ))),
//! );
//! let repaired = engine
//!     .handle_component_failure("ollama_service", "connection refused", &serde_json::json!({}))
//!     .await;
//! ```
//!
//! # Features
//!
//! - `heavy-state`: persist tasks, health and the ledger in RocksDB

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod escalation;
pub mod health;
pub mod ledger;
pub mod oracle;
pub mod process;
pub mod queue;
pub mod sandbox;
pub mod snapshot;
pub mod state;

pub use config::CoordinationConfig;
pub use error::{RepairError, RepairErrorKind, RepairResult};
pub use escalation::RepairEscalationEngine;
pub use health::{ComponentHealthTracker, UsageGuard};
pub use ledger::RepairLedger;
pub use oracle::{CodeGenerationOracle, OracleRequest};
pub use queue::{HandlerRegistry, TaskHandler, TaskStore, WorkerPool};
pub use snapshot::{RollbackResult, SafetySnapshotManager};
