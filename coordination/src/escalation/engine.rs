//! Repair Escalation Engine: tiered self-repair with validation and rollback
//!
//! One call to [`RepairEscalationEngine::handle_component_failure`] runs:
//!
//! ```text
//! lock(component) → pre-validate ─reject→ Critical
//!                 → snapshot (best-effort)
//!                 → select tier from ledger window
//!                 → execute tier ─fault→ emergency rollback → Critical
//!                 → post-validate ─unstable→ rollback → Critical
//!                                 └stable→ Healthy
//! ```
//!
//! and appends exactly one ledger entry, whatever the branch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::dependency::{scan_and_remediate, DependencyProbe, DependencyRegistry};
use super::generated::extract_code_block;
use super::locks::ComponentLocks;
use super::restart::{RestartAction, RestartRegistry};
use super::state::{select_tier, TierPolicy};
use super::validation::{
    check_stability, PreRepairGate, ResourceProbe, SystemResourceProbe,
};
use crate::config::CoordinationConfig;
use crate::error::{RepairError, RepairResult};
use crate::health::ComponentHealthTracker;
use crate::ledger::{classify_error, RepairLedger};
use crate::oracle::{CodeGenerationOracle, NullOracle, OracleRequest};
use crate::queue::pool::panic_message;
use crate::sandbox::Sandbox;
use crate::snapshot::{NoSnapshots, SafetySnapshotManager};
use crate::state::{
    RepairAttempt, RepairOutcome, RepairTier, RollbackEvent, SharedStateStore, SnapshotId,
};

/// Recognized keys of the `error_context` object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairContext {
    /// Caller-supplied classification; derived from the message when absent
    #[serde(default)]
    pub error_type: Option<String>,
    /// Override the dangerous-pattern guard
    #[serde(default)]
    pub force_repair: bool,
    /// What the component is supposed to achieve, for diagnostics
    #[serde(default)]
    pub goal: Option<String>,
}

impl RepairContext {
    /// Lenient parse: unknown keys and wrong types are ignored
    pub fn from_value(value: &Value) -> Self {
        Self {
            error_type: value
                .get("error_type")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            force_repair: value
                .get("force_repair")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            goal: value.get("goal").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// What a tier reports when it believes it succeeded
#[derive(Debug, Clone)]
struct TierReport {
    details: String,
    /// Succeeded with known unresolved issues
    partial: bool,
}

/// Mutable record of one session, readable even after a panic
#[derive(Debug, Default)]
struct Session {
    tier: Option<RepairTier>,
    action: String,
    details: Vec<String>,
    snapshot_id: Option<SnapshotId>,
    rejected: bool,
    rolled_back: bool,
}

impl Session {
    fn note(&mut self, line: impl Into<String>) {
        self.details.push(line.into());
    }
}

/// Tiered repair orchestrator
pub struct RepairEscalationEngine {
    config: CoordinationConfig,
    ledger: Arc<RepairLedger>,
    health: Arc<ComponentHealthTracker>,
    snapshots: Arc<dyn SafetySnapshotManager>,
    oracle: Arc<dyn CodeGenerationOracle>,
    restarts: RestartRegistry,
    dependencies: DependencyRegistry,
    gate: PreRepairGate,
    sandbox: Sandbox,
    locks: ComponentLocks,
}

impl RepairEscalationEngine {
    /// Engine with default config, no snapshots and no oracle
    pub fn new(store: SharedStateStore) -> Self {
        Self::with_config(store, CoordinationConfig::default())
    }

    /// Create with custom config
    pub fn with_config(store: SharedStateStore, config: CoordinationConfig) -> Self {
        let health = Arc::new(ComponentHealthTracker::new(
            Arc::clone(&store),
            config.health.clone(),
        ));
        Self {
            ledger: Arc::new(RepairLedger::new(store)),
            health,
            snapshots: Arc::new(NoSnapshots),
            oracle: Arc::new(NullOracle),
            restarts: RestartRegistry::new(),
            dependencies: DependencyRegistry::new(),
            gate: PreRepairGate::new(
                config.validation.clone(),
                Arc::new(SystemResourceProbe::default()),
            ),
            sandbox: Sandbox::new(config.sandbox.clone()),
            locks: ComponentLocks::new(),
            config,
        }
    }

    /// Share a health tracker with other parts of the application
    pub fn with_health(mut self, health: Arc<ComponentHealthTracker>) -> Self {
        self.health = health;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SafetySnapshotManager>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn CodeGenerationOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.gate = PreRepairGate::new(self.config.validation.clone(), probe);
        self
    }

    pub fn with_restart(
        mut self,
        component: impl Into<String>,
        action: Arc<dyn RestartAction>,
    ) -> Self {
        self.restarts.register(component, action);
        self
    }

    pub fn with_probe(
        mut self,
        component: impl Into<String>,
        probe: Arc<dyn DependencyProbe>,
    ) -> Self {
        self.dependencies.register(component, probe);
        self
    }

    pub fn ledger(&self) -> &Arc<RepairLedger> {
        &self.ledger
    }

    pub fn health(&self) -> &Arc<ComponentHealthTracker> {
        &self.health
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Attempt to repair `component`. Returns `true` only when a tier ran and
    /// post-repair validation passed.
    ///
    /// Never panics and never returns an error: every failure is recorded in
    /// the ledger and reflected in component health.
    pub async fn handle_component_failure(
        &self,
        component: &str,
        error_message: &str,
        error_context: &Value,
    ) -> bool {
        let _lock = self.locks.acquire(component).await;
        let started = Instant::now();
        let context = RepairContext::from_value(error_context);
        let mut session = Session::default();

        let run = AssertUnwindSafe(self.run_session(component, error_message, &context, &mut session))
            .catch_unwind()
            .await;

        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => self.handle_fault(component, err, &mut session).await,
            Err(panic) => {
                let err = RepairError::engine(panic_message(panic.as_ref()));
                self.handle_fault(component, err, &mut session).await
            }
        };

        let error_type = context
            .error_type
            .clone()
            .unwrap_or_else(|| classify_error(error_message).code().to_string());
        let mut attempt = RepairAttempt::new(
            component,
            error_message,
            error_type,
            session.tier.unwrap_or(RepairTier::Restart),
        );
        attempt.repair_action = if session.action.is_empty() {
            "none".to_string()
        } else {
            session.action.clone()
        };
        attempt.outcome = outcome;
        attempt.execution_details = session.details.join("\n");
        attempt.duration_ms = started.elapsed().as_millis() as u64;
        attempt.snapshot_id = session.snapshot_id.clone();
        attempt.rejected = session.rejected;
        attempt.goal = context.goal.clone();

        if let Err(e) = self.ledger.record_attempt(&attempt) {
            error!(component = %component, error = %e, "Failed to record repair attempt");
        }

        let success = outcome != RepairOutcome::Failure;
        info!(
            component = %component,
            tier = %attempt.repair_tier,
            outcome = %outcome,
            duration_ms = attempt.duration_ms,
            "Repair session finished"
        );
        success
    }

    async fn run_session(
        &self,
        component: &str,
        error_message: &str,
        context: &RepairContext,
        session: &mut Session,
    ) -> RepairResult<RepairOutcome> {
        self.health.record_failure(component)?;

        // 1. Pre-repair validation
        let in_use = self.health.is_in_use(component);
        let _permit = match self
            .gate
            .admit(error_message, in_use, context.force_repair)
        {
            Ok(permit) => permit,
            Err(err) => {
                warn!(component = %component, reason = %err, "Repair rejected");
                session.rejected = true;
                session.action = "pre-validation".to_string();
                session.note(format!("{}: {err}", err.kind()));
                self.health.force_critical(component)?;
                return Ok(RepairOutcome::Failure);
            }
        };

        // 2. Snapshot
        let first_line = error_message.lines().next().unwrap_or_default();
        session.snapshot_id = self
            .snapshots
            .create_snapshot(&format!("before repairing {component}: {first_line}"))
            .await;
        match &session.snapshot_id {
            Some(id) => session.note(format!("snapshot: {id}")),
            None => session.note("snapshot: unavailable"),
        }

        // 3. Tier selection
        let policy = TierPolicy::from(&self.config.escalation);
        let window = self.ledger.attempts_within(component, policy.window)?;
        let decision = select_tier(&window, &policy);
        session.tier = Some(decision.tier);
        info!(
            component = %component,
            tier = %decision.tier,
            reason = %decision.reason,
            "Repair tier selected"
        );

        // 4. Tier execution
        let executed = match decision.tier {
            RepairTier::Restart => self.run_restart(component, session).await,
            RepairTier::DependencyRepair => self.run_dependency_repair(component, session).await,
            RepairTier::GeneratedCode => {
                self.run_generated_code(component, error_message, session)
                    .await
            }
        };

        let report = match executed {
            Ok(report) => report,
            Err(err) if err.is_tier_failure() => {
                warn!(component = %component, tier = %decision.tier, error = %err, "Repair tier failed");
                session.note(format!("{}: {err}", err.kind()));
                if decision.tier >= RepairTier::DependencyRepair {
                    if let Some(snapshot_id) = session.snapshot_id.clone() {
                        self.rollback(component, &snapshot_id, "repair_failure", session)
                            .await;
                    }
                }
                if decision.tier == RepairTier::GeneratedCode || session.rolled_back {
                    self.health.force_critical(component)?;
                }
                return Ok(RepairOutcome::Failure);
            }
            Err(err) => return Err(err),
        };
        if !report.details.trim().is_empty() {
            session.note(report.details.trim().to_string());
        }

        // 5. Post-repair validation
        if self.config.escalation.post_validation_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(
                self.config.escalation.post_validation_delay_ms,
            ))
            .await;
        }
        let dependents = self
            .config
            .validation
            .shared_components
            .get(component)
            .cloned()
            .unwrap_or_default();
        let stability =
            check_stability(&self.dependencies, component, &dependents, decision.tier).await;

        if !stability.stable {
            let err = RepairError::PostRepairUnstable {
                failures: stability.failures(),
            };
            warn!(component = %component, error = %err, "Repair did not stabilize component");
            session.note(format!("{}: {err}", err.kind()));
            if let Some(snapshot_id) = session.snapshot_id.clone() {
                self.rollback(component, &snapshot_id, "validation_failure", session)
                    .await;
            }
            self.health.force_critical(component)?;
            return Ok(RepairOutcome::Failure);
        }
        if let Some(note) = stability.note {
            session.note(format!("post-validation: {note}"));
        } else {
            session.note(format!(
                "post-validation: {} checks passed",
                stability.checks.len()
            ));
        }

        self.health.record_success(component)?;
        Ok(if report.partial {
            RepairOutcome::Partial
        } else {
            RepairOutcome::Success
        })
    }

    /// Engine fault: emergency rollback, force Critical, record as failure
    async fn handle_fault(
        &self,
        component: &str,
        err: RepairError,
        session: &mut Session,
    ) -> RepairOutcome {
        error!(component = %component, error = %err, "Repair engine fault");
        session.note(format!("{}: {err}", err.kind()));
        if !session.rolled_back {
            if let Some(snapshot_id) = session.snapshot_id.clone() {
                self.rollback(component, &snapshot_id, "engine_exception", session)
                    .await;
            }
        }
        if let Err(e) = self.health.force_critical(component) {
            error!(component = %component, error = %e, "Failed to mark component critical");
        }
        RepairOutcome::Failure
    }

    /// Restore a snapshot once; failures are logged, never retried
    async fn rollback(
        &self,
        component: &str,
        snapshot_id: &str,
        reason: &str,
        session: &mut Session,
    ) {
        let result = self
            .snapshots
            .rollback_to_snapshot(snapshot_id, reason)
            .await;
        session.rolled_back = true;

        let event = RollbackEvent {
            component_name: component.to_string(),
            snapshot_id: snapshot_id.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
            success: result.success,
            error_message: result.error_message.clone(),
        };
        if let Err(e) = self.ledger.record_rollback(&event) {
            error!(component = %component, error = %e, "Failed to record rollback");
        }

        if result.success {
            info!(component = %component, snapshot_id = %snapshot_id, reason = %reason, "Rolled back");
            session.note(format!("rollback ({reason}): restored {snapshot_id}"));
        } else {
            let err = RepairError::RollbackFailure {
                snapshot_id: snapshot_id.to_string(),
                message: result
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string()),
            };
            error!(
                component = %component,
                error = %err,
                "Rollback failed; manual intervention required"
            );
            session.note(format!("{}: {err}", err.kind()));
        }
    }

    /// Tier 1
    async fn run_restart(
        &self,
        component: &str,
        session: &mut Session,
    ) -> RepairResult<TierReport> {
        session.action = "restart".to_string();
        let action = self
            .restarts
            .get(component)
            .ok_or_else(|| RepairError::restart(component, "no restart procedure registered"))?;
        session.action = format!("restart: {}", action.describe());

        let output = action
            .restart()
            .await
            .map_err(|e| RepairError::restart(component, format!("{e:#}")))?;
        Ok(TierReport {
            details: output,
            partial: false,
        })
    }

    /// Tier 2
    async fn run_dependency_repair(
        &self,
        component: &str,
        session: &mut Session,
    ) -> RepairResult<TierReport> {
        session.action = "dependency repair".to_string();
        let probes = self.dependencies.probes_for(component);
        let scan = scan_and_remediate(&probes).await;
        session.note(scan.summary());

        let restarted = self.run_restart(component, session).await;
        session.action = format!(
            "dependency repair ({} detected, {} fixed) then {}",
            scan.detected.len(),
            scan.fixed.len(),
            session.action
        );
        let report = restarted.map_err(|e| {
            RepairError::dependency(component, format!("restart after dependency repair: {e}"))
        })?;

        Ok(TierReport {
            details: report.details,
            partial: !scan.unresolved.is_empty(),
        })
    }

    /// Tier 3
    async fn run_generated_code(
        &self,
        component: &str,
        error_message: &str,
        session: &mut Session,
    ) -> RepairResult<TierReport> {
        session.action = "generated code".to_string();
        if self.config.escalation.require_snapshot_for_generated_code
            && session.snapshot_id.is_none()
        {
            return Err(RepairError::OracleExecutionFailure {
                message: "refusing to run generated code without a snapshot".to_string(),
                exit_code: None,
            });
        }

        let request = OracleRequest {
            component: component.to_string(),
            error: error_message.to_string(),
            history: self
                .ledger
                .failed_actions(component, self.config.escalation.history_summary_limit)?,
        };
        let reply = self
            .oracle
            .propose_repair(&request)
            .await
            .map_err(|e| RepairError::oracle_unusable(format!("oracle request failed: {e:#}")))?;

        let snippet = extract_code_block(&reply)
            .ok_or_else(|| RepairError::oracle_unusable("no executable code found"))?;
        let digest = snippet.digest();
        session.action = format!(
            "generated code ({}, blake3 {})",
            snippet.language.interpreter(),
            &digest[..16]
        );

        let output = self.sandbox.run(&snippet).await.map_err(|e| {
            RepairError::OracleExecutionFailure {
                message: e.to_string(),
                exit_code: None,
            }
        })?;
        if !output.success() {
            return Err(RepairError::OracleExecutionFailure {
                message: format!(
                    "snippet exited with {:?}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                exit_code: output.exit_code,
            });
        }
        Ok(TierReport {
            details: output.stdout,
            partial: false,
        })
    }
}
