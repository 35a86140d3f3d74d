//! Tier 2: dependency probes and remediation
//!
//! Probes are also what post-repair validation runs, so every tier is judged
//! by the same checks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use super::restart::CommandSpec;

/// Result of one probe run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: String,
    pub healthy: bool,
    pub detail: String,
}

impl ProbeResult {
    pub fn healthy(probe: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy(probe: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// A check of something a component depends on
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    fn name(&self) -> String;

    async fn check(&self) -> ProbeResult;

    /// Try to fix a failing dependency
    async fn remediate(&self) -> anyhow::Result<String> {
        anyhow::bail!("no remediation available for {}", self.name())
    }
}

/// TCP connectivity to `host:port`
pub struct TcpProbe {
    address: String,
    timeout: Duration,
    remediation: Option<CommandSpec>,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, spec: CommandSpec) -> Self {
        self.remediation = Some(spec);
        self
    }
}

#[async_trait]
impl DependencyProbe for TcpProbe {
    fn name(&self) -> String {
        format!("tcp:{}", self.address)
    }

    async fn check(&self) -> ProbeResult {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => ProbeResult::healthy(self.name(), "connected"),
            Ok(Err(e)) => ProbeResult::unhealthy(self.name(), format!("unreachable: {e}")),
            Err(_) => ProbeResult::unhealthy(
                self.name(),
                format!("connect timed out after {}ms", self.timeout.as_millis()),
            ),
        }
    }

    async fn remediate(&self) -> anyhow::Result<String> {
        match &self.remediation {
            Some(spec) => spec.run().await,
            None => anyhow::bail!("no remediation available for {}", self.name()),
        }
    }
}

/// Required environment variables are set and non-empty
pub struct EnvProbe {
    vars: Vec<String>,
}

impl EnvProbe {
    pub fn new(vars: Vec<String>) -> Self {
        Self { vars }
    }
}

#[async_trait]
impl DependencyProbe for EnvProbe {
    fn name(&self) -> String {
        format!("env:{}", self.vars.join(","))
    }

    async fn check(&self) -> ProbeResult {
        let missing: Vec<&str> = self
            .vars
            .iter()
            .filter(|v| std::env::var(v).map_or(true, |value| value.trim().is_empty()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            ProbeResult::healthy(self.name(), "all set")
        } else {
            ProbeResult::unhealthy(self.name(), format!("missing: {}", missing.join(", ")))
        }
    }
}

/// A config file exists and is non-empty
pub struct FileProbe {
    path: PathBuf,
}

impl FileProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DependencyProbe for FileProbe {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn check(&self) -> ProbeResult {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                ProbeResult::healthy(self.name(), format!("{} bytes", meta.len()))
            }
            Ok(meta) if meta.is_file() => ProbeResult::unhealthy(self.name(), "empty file"),
            Ok(_) => ProbeResult::unhealthy(self.name(), "not a regular file"),
            Err(e) => ProbeResult::unhealthy(self.name(), e.to_string()),
        }
    }
}

/// Storage integrity: directory exists and accepts a write.
/// Remediation recreates a missing directory.
pub struct StorageProbe {
    dir: PathBuf,
}

impl StorageProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DependencyProbe for StorageProbe {
    fn name(&self) -> String {
        format!("storage:{}", self.dir.display())
    }

    async fn check(&self) -> ProbeResult {
        let marker = self.dir.join(".repair-probe");
        match tokio::fs::write(&marker, b"ok").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&marker).await;
                ProbeResult::healthy(self.name(), "writable")
            }
            Err(e) => ProbeResult::unhealthy(self.name(), format!("not writable: {e}")),
        }
    }

    async fn remediate(&self) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(format!("created {}", self.dir.display()))
    }
}

/// Component → dependency probes, resolved at startup
#[derive(Default, Clone)]
pub struct DependencyRegistry {
    probes: HashMap<String, Vec<Arc<dyn DependencyProbe>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: impl Into<String>, probe: Arc<dyn DependencyProbe>) {
        self.probes.entry(component.into()).or_default().push(probe);
    }

    pub fn probes_for(&self, component: &str) -> Vec<Arc<dyn DependencyProbe>> {
        self.probes.get(component).cloned().unwrap_or_default()
    }

    pub fn has_probes(&self, component: &str) -> bool {
        self.probes.get(component).is_some_and(|p| !p.is_empty())
    }
}

/// Outcome of the Tier 2 probe-and-remediate pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyScan {
    pub detected: Vec<String>,
    pub fixed: Vec<String>,
    pub unresolved: Vec<String>,
}

impl DependencyScan {
    pub fn summary(&self) -> String {
        format!(
            "dependencies: {} detected, {} fixed, {} unresolved{}",
            self.detected.len(),
            self.fixed.len(),
            self.unresolved.len(),
            if self.unresolved.is_empty() {
                String::new()
            } else {
                format!(" ({})", self.unresolved.join("; "))
            }
        )
    }
}

/// Check every probe, remediate failures, and re-check remediated ones
pub async fn scan_and_remediate(probes: &[Arc<dyn DependencyProbe>]) -> DependencyScan {
    let mut scan = DependencyScan::default();
    for probe in probes {
        let result = probe.check().await;
        if result.healthy {
            continue;
        }
        scan.detected.push(format!("{}: {}", result.probe, result.detail));

        match probe.remediate().await {
            Ok(_) => {
                let recheck = probe.check().await;
                if recheck.healthy {
                    scan.fixed.push(recheck.probe);
                } else {
                    scan.unresolved
                        .push(format!("{}: {}", recheck.probe, recheck.detail));
                }
            }
            Err(e) => scan.unresolved.push(format!("{}: {e:#}", result.probe)),
        }
    }
    scan
}
