//! Core types for task, health and repair state
//!
//! These types are persisted by the [`StateStore`](super::StateStore) and
//! represent the task lifecycle, per-component health, and the append-only
//! repair ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for queued tasks
pub type TaskId = String;

/// Opaque snapshot handle returned by the snapshot manager
pub type SnapshotId = String;

/// Default retry budget for a submitted task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    Pending,
    /// Claimed by a worker
    Running,
    /// Handler returned a result
    Completed,
    /// Retry budget exhausted
    Failed,
    /// Cancelled before a worker picked it up
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work routed to a handler by its `task_type`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Handler routing key
    pub task_type: String,

    /// Opaque handler input
    pub payload: serde_json::Value,

    /// Submission priority. Stored only; dequeue order is FIFO.
    pub priority: i32,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Submission timestamp
    pub created_at: DateTime<Utc>,

    /// When the most recent execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Handler output on success
    pub result: Option<serde_json::Value>,

    /// Last handler error
    pub error: Option<String>,

    /// Re-enqueues performed so far
    pub retry_count: u32,

    /// Maximum re-enqueues before the task is failed
    pub max_retries: u32,
}

impl Task {
    /// Create a pending task with the default retry budget
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Coarse health state of a monitored component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failing,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failing => write!(f, "failing"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One mutable row of the health table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthRecord {
    pub component_name: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    /// Cumulative; never reset
    pub total_failures: u64,
    pub last_check: DateTime<Utc>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ComponentHealthRecord {
    /// Fresh healthy record
    pub fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            total_failures: 0,
            last_check: Utc::now(),
            last_failure_at: None,
        }
    }
}

/// Escalation level of the repair engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTier {
    /// Tier 1: static restart procedure
    Restart,
    /// Tier 2: dependency probes + remediation, then restart
    DependencyRepair,
    /// Tier 3: oracle-generated code executed in the sandbox
    GeneratedCode,
}

impl RepairTier {
    /// Numeric level (1-3)
    pub fn level(self) -> u8 {
        match self {
            Self::Restart => 1,
            Self::DependencyRepair => 2,
            Self::GeneratedCode => 3,
        }
    }

    /// Next tier up, if any
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Restart => Some(Self::DependencyRepair),
            Self::DependencyRepair => Some(Self::GeneratedCode),
            Self::GeneratedCode => None,
        }
    }
}

impl std::fmt::Display for RepairTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restart => write!(f, "tier1_restart"),
            Self::DependencyRepair => write!(f, "tier2_dependency"),
            Self::GeneratedCode => write!(f, "tier3_generated_code"),
        }
    }
}

/// Ledger outcome of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Success,
    Failure,
    Partial,
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// Immutable record of a single `handle_component_failure` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub id: String,
    pub component_name: String,
    pub error_message: String,
    pub error_type: String,
    pub repair_tier: RepairTier,
    pub repair_action: String,
    pub outcome: RepairOutcome,
    pub execution_details: String,
    pub duration_ms: u64,
    pub snapshot_id: Option<SnapshotId>,
    pub timestamp: DateTime<Utc>,
    /// Refused by the pre-repair gate; no tier ran. Excluded from tier budgets.
    #[serde(default)]
    pub rejected: bool,
    /// Operator goal supplied with the failure context
    #[serde(default)]
    pub goal: Option<String>,
}

impl RepairAttempt {
    /// Start a record; the engine fills in outcome and details before appending.
    pub fn new(
        component_name: impl Into<String>,
        error_message: impl Into<String>,
        error_type: impl Into<String>,
        repair_tier: RepairTier,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            component_name: component_name.into(),
            error_message: error_message.into(),
            error_type: error_type.into(),
            repair_tier,
            repair_action: String::new(),
            outcome: RepairOutcome::Failure,
            execution_details: String::new(),
            duration_ms: 0,
            snapshot_id: None,
            timestamp: Utc::now(),
            rejected: false,
            goal: None,
        }
    }

    /// Whether this attempt counts toward tier budgets
    pub fn counts_toward_budget(&self) -> bool {
        !self.rejected
    }
}

/// Immutable record of an executed rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub component_name: String,
    pub snapshot_id: SnapshotId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}
