//! Component health tracking
//!
//! Healthy →(failure)→ Failing →(consecutive ≥ threshold)→ Critical.
//! Any success resets to Healthy. Rows are created lazily on first report
//! and never deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::state::{
    ComponentHealthRecord, HealthStatus, SharedStateStore, StoreError, StoreResult,
};

type UsageCounts = Arc<Mutex<HashMap<String, usize>>>;

/// Per-component health table plus active-use tracking
pub struct ComponentHealthTracker {
    store: SharedStateStore,
    config: HealthConfig,
    /// Serializes read-modify-write of health rows
    update: Mutex<()>,
    in_use: UsageCounts,
}

impl ComponentHealthTracker {
    pub fn new(store: SharedStateStore, config: HealthConfig) -> Self {
        Self {
            store,
            config,
            update: Mutex::new(()),
            in_use: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn modify<F>(&self, component: &str, f: F) -> StoreResult<ComponentHealthRecord>
    where
        F: FnOnce(&mut ComponentHealthRecord),
    {
        let _guard = self.update.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut record = self
            .store
            .get_health(component)?
            .unwrap_or_else(|| ComponentHealthRecord::new(component));
        f(&mut record);
        record.last_check = Utc::now();
        self.store.put_health(&record)?;
        Ok(record)
    }

    /// Count a failure; escalates to Critical at the configured threshold
    pub fn record_failure(&self, component: &str) -> StoreResult<ComponentHealthRecord> {
        let threshold = self.config.critical_threshold;
        let record = self.modify(component, |r| {
            r.consecutive_failures += 1;
            r.total_failures += 1;
            r.last_failure_at = Some(Utc::now());
            r.status = if r.consecutive_failures >= threshold {
                HealthStatus::Critical
            } else {
                HealthStatus::Failing
            };
        })?;
        if record.status == HealthStatus::Critical {
            warn!(
                component = %component,
                consecutive_failures = record.consecutive_failures,
                "Component is critical"
            );
        }
        Ok(record)
    }

    /// Reset to Healthy
    pub fn record_success(&self, component: &str) -> StoreResult<ComponentHealthRecord> {
        let record = self.modify(component, |r| {
            r.consecutive_failures = 0;
            r.status = HealthStatus::Healthy;
        })?;
        info!(component = %component, "Component healthy");
        Ok(record)
    }

    /// Non-fatal impairment; does not downgrade Failing or Critical
    pub fn record_degraded(&self, component: &str) -> StoreResult<ComponentHealthRecord> {
        self.modify(component, |r| {
            if r.status < HealthStatus::Degraded {
                r.status = HealthStatus::Degraded;
            }
        })
    }

    /// Force Critical regardless of counters
    pub fn force_critical(&self, component: &str) -> StoreResult<ComponentHealthRecord> {
        self.modify(component, |r| r.status = HealthStatus::Critical)
    }

    /// Current status; Healthy when the component was never reported
    pub fn status(&self, component: &str) -> StoreResult<HealthStatus> {
        Ok(self
            .store
            .get_health(component)?
            .map_or(HealthStatus::Healthy, |r| r.status))
    }

    pub fn record(&self, component: &str) -> StoreResult<Option<ComponentHealthRecord>> {
        self.store.get_health(component)
    }

    pub fn all_records(&self) -> StoreResult<Vec<ComponentHealthRecord>> {
        self.store.list_health()
    }

    /// Mark a component as serving live work until the guard drops
    pub fn mark_in_use(&self, component: &str) -> UsageGuard {
        if let Ok(mut counts) = self.in_use.lock() {
            *counts.entry(component.to_string()).or_insert(0) += 1;
        }
        UsageGuard {
            counts: Arc::clone(&self.in_use),
            component: component.to_string(),
        }
    }

    pub fn is_in_use(&self, component: &str) -> bool {
        self.in_use
            .lock()
            .map(|counts| counts.get(component).copied().unwrap_or(0) > 0)
            .unwrap_or(false)
    }
}

/// Active-use marker returned by [`ComponentHealthTracker::mark_in_use`]
pub struct UsageGuard {
    counts: UsageCounts,
    component: String,
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        if let Ok(mut counts) = self.counts.lock() {
            if let Some(count) = counts.get_mut(&self.component) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&self.component);
                }
            }
        }
    }
}
