//! Repair ledger: append-only history of repair attempts and rollbacks
//!
//! The ledger is the source of truth for tier selection and for the
//! diagnostic report. Entries are written once and never updated.

pub mod diagnostics;

use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::state::{RepairAttempt, RepairOutcome, RollbackEvent, SharedStateStore, StoreResult};

pub use diagnostics::{bucket_counts, classify_error, ErrorBucket};

/// Append-only repair history over a [`StateStore`](crate::state::StateStore)
pub struct RepairLedger {
    store: SharedStateStore,
}

impl RepairLedger {
    pub fn new(store: SharedStateStore) -> Self {
        Self { store }
    }

    pub fn record_attempt(&self, attempt: &RepairAttempt) -> StoreResult<()> {
        self.store.append_attempt(attempt)?;
        debug!(
            component = %attempt.component_name,
            tier = %attempt.repair_tier,
            outcome = %attempt.outcome,
            "Repair attempt recorded"
        );
        Ok(())
    }

    pub fn record_rollback(&self, event: &RollbackEvent) -> StoreResult<()> {
        self.store.append_rollback(event)
    }

    /// Every attempt for a component, oldest first
    pub fn history(&self, component: &str) -> StoreResult<Vec<RepairAttempt>> {
        self.store.attempts_for(component)
    }

    /// Attempts within the trailing `window`, oldest first
    pub fn attempts_within(
        &self,
        component: &str,
        window: Duration,
    ) -> StoreResult<Vec<RepairAttempt>> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let since = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        self.store.attempts_since(component, since)
    }

    pub fn rollbacks(&self, component: &str) -> StoreResult<Vec<RollbackEvent>> {
        self.store.rollbacks_for(component)
    }

    pub fn all_attempts(&self) -> StoreResult<Vec<RepairAttempt>> {
        self.store.all_attempts()
    }

    /// Condensed descriptions of the most recent failed actions, oldest first
    pub fn failed_actions(&self, component: &str, limit: usize) -> StoreResult<Vec<String>> {
        let history = self.history(component)?;
        let mut failed: Vec<String> = history
            .iter()
            .rev()
            .filter(|a| a.outcome == RepairOutcome::Failure && !a.rejected)
            .take(limit)
            .map(|a| {
                format!(
                    "{}: {} -> {}",
                    a.repair_tier,
                    a.repair_action,
                    a.execution_details.lines().next().unwrap_or_default()
                )
            })
            .collect();
        failed.reverse();
        Ok(failed)
    }

    /// Markdown document with the fixed diagnostic sections.
    ///
    /// Without an explicit `goal`, the most recent goal recorded on an attempt
    /// is used.
    pub fn diagnostic_report(&self, component: &str, goal: Option<&str>) -> StoreResult<String> {
        let attempts = self.history(component)?;
        let rollbacks = self.rollbacks(component)?;
        let goal = goal.or_else(|| attempts.iter().rev().find_map(|a| a.goal.as_deref()));
        Ok(diagnostics::render_report(
            component, goal, &attempts, &rollbacks,
        ))
    }
}
