//! Repair error taxonomy
//!
//! Every failure the escalation pipeline can produce maps onto one
//! [`RepairError`] variant. Tier-level variants are converted into ledger
//! entries and a `false` return at the engine boundary; they never escape
//! `handle_component_failure`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::StoreError;

/// Result type alias for repair operations
pub type RepairResult<T> = Result<T, RepairError>;

/// Stable, machine-readable error kind. Prefixes the lines it contributes to
/// an attempt's `execution_details` and appears in log output; the ledger
/// `error_type` is the classified input error, not this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairErrorKind {
    ValidationRejected,
    RestartFailure,
    DependencyUnresolved,
    OracleEmptyOrUnparsable,
    OracleExecutionFailure,
    PostRepairUnstable,
    RollbackFailure,
    EngineException,
}

impl std::fmt::Display for RepairErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ValidationRejected => "validation_rejected",
            Self::RestartFailure => "restart_failure",
            Self::DependencyUnresolved => "dependency_unresolved",
            Self::OracleEmptyOrUnparsable => "oracle_empty_or_unparsable",
            Self::OracleExecutionFailure => "oracle_execution_failure",
            Self::PostRepairUnstable => "post_repair_unstable",
            Self::RollbackFailure => "rollback_failure",
            Self::EngineException => "engine_exception",
        };
        write!(f, "{s}")
    }
}

/// Errors that can occur during a repair session
#[derive(Error, Debug)]
pub enum RepairError {
    /// Pre-repair gate refused the attempt
    #[error("Repair rejected by pre-validation: {reason}")]
    ValidationRejected { reason: String },

    /// Tier 1 restart failed or no procedure is registered
    #[error("Restart failed for {component}: {message}")]
    RestartFailure { component: String, message: String },

    /// Tier 2 could not bring dependencies back
    #[error("Dependencies unresolved for {component}: {message}")]
    DependencyUnresolved { component: String, message: String },

    /// Tier 3 oracle gave nothing runnable
    #[error("Oracle reply unusable: {reason}")]
    OracleEmptyOrUnparsable { reason: String },

    /// Tier 3 snippet ran and failed, timed out, or was blocked by policy
    #[error("Generated repair failed: {message}")]
    OracleExecutionFailure {
        message: String,
        exit_code: Option<i32>,
    },

    /// Component still unstable after the tier reported success
    #[error("Post-repair validation failed: {}", failures.join("; "))]
    PostRepairUnstable { failures: Vec<String> },

    /// Restoring the snapshot failed; manual intervention required
    #[error("Rollback to snapshot {snapshot_id} failed: {message}")]
    RollbackFailure {
        snapshot_id: String,
        message: String,
    },

    /// Unexpected fault anywhere in the pipeline
    #[error("Engine exception: {message}")]
    EngineException { message: String },

    /// State store failure
    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

impl RepairError {
    /// Create a restart failure
    pub fn restart(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RestartFailure {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a dependency failure
    pub fn dependency(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DependencyUnresolved {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an oracle parse failure
    pub fn oracle_unusable(reason: impl Into<String>) -> Self {
        Self::OracleEmptyOrUnparsable {
            reason: reason.into(),
        }
    }

    /// Create an engine exception
    pub fn engine(message: impl Into<String>) -> Self {
        Self::EngineException {
            message: message.into(),
        }
    }

    /// Stable kind for ledger records
    pub fn kind(&self) -> RepairErrorKind {
        match self {
            Self::ValidationRejected { .. } => RepairErrorKind::ValidationRejected,
            Self::RestartFailure { .. } => RepairErrorKind::RestartFailure,
            Self::DependencyUnresolved { .. } => RepairErrorKind::DependencyUnresolved,
            Self::OracleEmptyOrUnparsable { .. } => RepairErrorKind::OracleEmptyOrUnparsable,
            Self::OracleExecutionFailure { .. } => RepairErrorKind::OracleExecutionFailure,
            Self::PostRepairUnstable { .. } => RepairErrorKind::PostRepairUnstable,
            Self::RollbackFailure { .. } => RepairErrorKind::RollbackFailure,
            Self::EngineException { .. } | Self::Store(_) => RepairErrorKind::EngineException,
        }
    }

    /// Whether this is an expected tier-level failure (logged and converted
    /// to `false`) rather than a fault that warrants an emergency rollback.
    pub fn is_tier_failure(&self) -> bool {
        matches!(
            self,
            Self::RestartFailure { .. }
                | Self::DependencyUnresolved { .. }
                | Self::OracleEmptyOrUnparsable { .. }
                | Self::OracleExecutionFailure { .. }
        )
    }
}
