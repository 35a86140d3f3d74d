//! Pre-repair gate and post-repair stability checks

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use super::dependency::{DependencyRegistry, ProbeResult};
use crate::config::ValidationConfig;
use crate::error::{RepairError, RepairResult};
use crate::state::RepairTier;

/// Point-in-time host resource reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub memory_percent: f64,
    pub free_disk_mb: u64,
}

/// Source of host resource readings
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSnapshot;
}

/// Reads memory and disk usage from the host via `sysinfo`
pub struct SystemResourceProbe {
    disk_path: PathBuf,
}

impl SystemResourceProbe {
    /// Disk space is measured on the filesystem holding `disk_path`
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
        }
    }
}

impl Default for SystemResourceProbe {
    fn default() -> Self {
        Self::new("/")
    }
}

impl ResourceProbe for SystemResourceProbe {
    fn sample(&self) -> ResourceSnapshot {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(sys.available_memory())) as f64 / total as f64 * 100.0
        };

        // Longest mount point that contains the path
        let disks = Disks::new_with_refreshed_list();
        let free_disk_mb = disks
            .list()
            .iter()
            .filter(|d| self.disk_path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map_or(u64::MAX, |d| d.available_space() / (1024 * 1024));

        ResourceSnapshot {
            memory_percent,
            free_disk_mb,
        }
    }
}

/// Fixed reading, for hosts where the gate should not consult the system
pub struct FixedResources(pub ResourceSnapshot);

impl Default for FixedResources {
    fn default() -> Self {
        Self(ResourceSnapshot {
            memory_percent: 0.0,
            free_disk_mb: u64::MAX,
        })
    }
}

impl ResourceProbe for FixedResources {
    fn sample(&self) -> ResourceSnapshot {
        self.0
    }
}

/// Held for the duration of an admitted repair session
#[derive(Debug)]
pub struct InFlightPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Admission control run before any snapshot or tier
pub struct PreRepairGate {
    config: ValidationConfig,
    probe: Arc<dyn ResourceProbe>,
    dangerous: Vec<Regex>,
    in_flight: Arc<AtomicUsize>,
    recent: Mutex<VecDeque<Instant>>,
}

impl PreRepairGate {
    /// Invalid dangerous patterns are skipped; `ValidationConfig` is validated
    /// on load, so this only drops patterns set programmatically.
    pub fn new(config: ValidationConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        let dangerous = config
            .dangerous_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "Ignoring invalid dangerous pattern");
                    None
                }
            })
            .collect();
        Self {
            config,
            probe,
            dangerous,
            in_flight: Arc::new(AtomicUsize::new(0)),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Repair sessions currently admitted
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn reject(reason: String) -> RepairError {
        RepairError::ValidationRejected { reason }
    }

    /// Admit a session or explain why it is refused
    pub fn admit(
        &self,
        error_message: &str,
        in_use: bool,
        force_repair: bool,
    ) -> RepairResult<InFlightPermit> {
        let resources = self.probe.sample();
        if resources.memory_percent >= self.config.max_memory_percent {
            return Err(Self::reject(format!(
                "memory usage {:.1}% at or above limit {:.1}%",
                resources.memory_percent, self.config.max_memory_percent
            )));
        }
        if resources.free_disk_mb < self.config.min_free_disk_mb {
            return Err(Self::reject(format!(
                "free disk {} MB below minimum {} MB",
                resources.free_disk_mb, self.config.min_free_disk_mb
            )));
        }

        if in_use && !force_repair {
            if let Some(pattern) = self.dangerous.iter().find(|p| p.is_match(error_message)) {
                return Err(Self::reject(format!(
                    "error matches dangerous pattern `{}` while component is in use",
                    pattern.as_str()
                )));
            }
        }

        let mut recent = self
            .recent
            .lock()
            .map_err(|_| RepairError::engine("repair gate lock poisoned"))?;

        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight >= self.config.max_concurrent_repairs {
            return Err(Self::reject(format!(
                "{in_flight} repairs already in flight (limit {})",
                self.config.max_concurrent_repairs
            )));
        }

        let now = Instant::now();
        let window = Duration::from_secs(self.config.burst_window_secs);
        while recent
            .front()
            .is_some_and(|started| now.duration_since(*started) > window)
        {
            recent.pop_front();
        }
        if recent.len() >= self.config.max_attempts_per_burst {
            return Err(Self::reject(format!(
                "{} repairs started in the last {}s (limit {})",
                recent.len(),
                self.config.burst_window_secs,
                self.config.max_attempts_per_burst
            )));
        }

        recent.push_back(now);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(InFlightPermit {
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// Result of post-repair validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityReport {
    pub stable: bool,
    pub checks: Vec<ProbeResult>,
    pub note: Option<String>,
}

impl StabilityReport {
    pub fn failures(&self) -> Vec<String> {
        let mut failures: Vec<String> = self
            .checks
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| format!("{}: {}", c.probe, c.detail))
            .collect();
        if !self.stable && failures.is_empty() {
            failures.extend(self.note.clone());
        }
        failures
    }
}

/// Run the probes of `component` and of its dependents.
///
/// With no probes at all, restart and dependency tiers are trusted, but
/// generated code never is.
pub async fn check_stability(
    registry: &DependencyRegistry,
    component: &str,
    dependents: &[String],
    tier: RepairTier,
) -> StabilityReport {
    let mut checks = Vec::new();
    for name in std::iter::once(component).chain(dependents.iter().map(String::as_str)) {
        for probe in registry.probes_for(name) {
            let mut result = probe.check().await;
            if name != component {
                result.probe = format!("{name}/{}", result.probe);
            }
            checks.push(result);
        }
    }

    if checks.is_empty() {
        let stable = tier != RepairTier::GeneratedCode;
        let note = if stable {
            "no probes registered; assuming stable"
        } else {
            "no probes registered; generated code requires verification"
        };
        return StabilityReport {
            stable,
            checks,
            note: Some(note.to_string()),
        };
    }

    StabilityReport {
        stable: checks.iter().all(|c| c.healthy),
        checks,
        note: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::dependency::{DependencyProbe, EnvProbe};

    fn gate(config: ValidationConfig, memory: f64, disk: u64) -> PreRepairGate {
        PreRepairGate::new(
            config,
            Arc::new(FixedResources(ResourceSnapshot {
                memory_percent: memory,
                free_disk_mb: disk,
            })),
        )
    }

    #[test]
    fn test_resource_limits() {
        let memory = gate(ValidationConfig::default(), 96.0, 10_000);
        let err = memory.admit("down", false, false).unwrap_err();
        assert!(err.to_string().contains("memory usage"));

        let disk = gate(ValidationConfig::default(), 10.0, 100);
        let err = disk.admit("down", false, false).unwrap_err();
        assert!(err.to_string().contains("free disk"));

        let ok = gate(ValidationConfig::default(), 10.0, 10_000);
        assert!(ok.admit("down", false, false).is_ok());
    }

    #[test]
    fn test_concurrency_limit_released_on_drop() {
        let config = ValidationConfig {
            max_concurrent_repairs: 1,
            ..ValidationConfig::default()
        };
        let gate = gate(config, 10.0, 10_000);
        let permit = gate.admit("down", false, false).unwrap();
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.admit("down", false, false).is_err());
        drop(permit);
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.admit("down", false, false).is_ok());
    }

    #[test]
    fn test_burst_limit() {
        let config = ValidationConfig {
            max_attempts_per_burst: 2,
            ..ValidationConfig::default()
        };
        let gate = gate(config, 10.0, 10_000);
        drop(gate.admit("a", false, false).unwrap());
        drop(gate.admit("b", false, false).unwrap());
        let err = gate.admit("c", false, false).unwrap_err();
        assert!(err.to_string().contains("repairs started"));
    }

    #[test]
    fn test_dangerous_pattern_only_when_in_use() {
        let gate = gate(ValidationConfig::default(), 10.0, 10_000);
        let message = "possible data corruption in table users";
        assert!(gate.admit(message, true, false).is_err());
        assert!(gate.admit(message, false, false).is_ok());
        assert!(gate.admit(message, true, true).is_ok());
    }

    #[test]
    fn test_system_probe_reads_host() {
        let sample = SystemResourceProbe::default().sample();
        assert!((0.0..=100.0).contains(&sample.memory_percent));
    }

    #[tokio::test]
    async fn test_stability_without_probes() {
        let registry = DependencyRegistry::new();
        let report = check_stability(&registry, "db", &[], RepairTier::Restart).await;
        assert!(report.stable);
        let report = check_stability(&registry, "db", &[], RepairTier::GeneratedCode).await;
        assert!(!report.stable);
        assert_eq!(report.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_stability_includes_dependents() {
        let mut registry = DependencyRegistry::new();
        let failing: Arc<dyn DependencyProbe> =
            Arc::new(EnvProbe::new(vec!["REPAIR_STABILITY_UNSET_VAR".into()]));
        registry.register("api", failing);

        let alone = check_stability(&registry, "postgres", &[], RepairTier::Restart).await;
        assert!(alone.stable);

        let shared =
            check_stability(&registry, "postgres", &["api".into()], RepairTier::Restart).await;
        assert!(!shared.stable);
        assert!(shared.failures()[0].starts_with("api/env:"));
    }
}
