//! Agent configuration: the coordination core's sections plus the oracle
//! endpoint, snapshot backend and per-component repair procedures.
//!
//! ```toml
//! state_path = "/var/lib/repair-agent"
//!
//! [pool]
//! workers = 4
//!
//! [oracle]
//! url = "http://localhost:8000/v1"
//! model = "qwen2.5-coder-14b"
//!
//! [snapshots]
//! git_dir = "/srv/app"
//!
//! [components.ollama_service]
//! restart = "systemctl restart ollama"
//! goal = "Serve local inference on :11434"
//!
//! [[components.ollama_service.probes]]
//! kind = "http"
//! url = "http://localhost:11434/api/tags"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use coordination::config::CoordinationConfig;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat completions endpoint used for Tier 3
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL (`.../v1`); `None` disables Tier 3 code generation
    pub url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("REPAIR_ORACLE_URL").ok(),
            model: std::env::var("REPAIR_ORACLE_MODEL")
                .unwrap_or_else(|_| "qwen2.5-coder-14b-instruct".into()),
            api_key: std::env::var("REPAIR_ORACLE_API_KEY").ok(),
            timeout_secs: 120,
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

/// Snapshot backend; without `git_dir` repairs run unsnapshotted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub git_dir: Option<PathBuf>,
    pub commit_prefix: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            git_dir: None,
            commit_prefix: "[repair-snapshot]".into(),
        }
    }
}

/// Dependency check attached to a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// GET must return 2xx
    Http {
        url: String,
        #[serde(default = "default_probe_timeout")]
        timeout_secs: u64,
    },
    /// TCP connect must succeed; `remediate` runs when it does not
    Tcp {
        address: String,
        #[serde(default = "default_probe_timeout")]
        timeout_secs: u64,
        #[serde(default)]
        remediate: Option<String>,
    },
    /// Every variable must be set and non-empty
    Env { vars: Vec<String> },
    /// Path must exist
    File { path: PathBuf },
    /// Directory must exist and be writable; created on remediation
    Storage { dir: PathBuf },
}

fn default_probe_timeout() -> u64 {
    5
}

/// Repair procedures for one component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Restart command line, split shell-style
    pub restart: Option<String>,
    /// Overrides `escalation.restart_timeout_secs`
    pub restart_timeout_secs: Option<u64>,
    pub working_dir: Option<PathBuf>,
    /// What the component is for; shown in diagnostic reports
    pub goal: Option<String>,
    pub probes: Vec<ProbeSpec>,
}

/// Full agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// RocksDB directory (requires the `persistent` feature)
    pub state_path: Option<PathBuf>,
    #[serde(flatten)]
    pub coordination: CoordinationConfig,
    pub oracle: OracleConfig,
    pub snapshots: SnapshotConfig,
    pub components: BTreeMap<String, ComponentConfig>,
}

impl AgentConfig {
    /// Parse a TOML document and validate it. Environment overrides are not
    /// applied here.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse agent config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or defaults when `None`), then apply `REPAIR_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REPAIR_ORACLE_URL`, `REPAIR_ORACLE_MODEL`,
    /// `REPAIR_ORACLE_API_KEY` and `REPAIR_WORKERS` from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("REPAIR_ORACLE_URL") {
            self.oracle.url = Some(url);
        }
        if let Some(model) = lookup("REPAIR_ORACLE_MODEL") {
            self.oracle.model = model;
        }
        if let Some(key) = lookup("REPAIR_ORACLE_API_KEY") {
            self.oracle.api_key = Some(key);
        }
        if let Some(workers) = lookup("REPAIR_WORKERS") {
            self.coordination.pool.workers = workers
                .trim()
                .parse()
                .with_context(|| format!("REPAIR_WORKERS must be a number, got `{workers}`"))?;
        }
        Ok(())
    }

    /// Validate the core sections and every component's commands
    pub fn validate(&self) -> Result<()> {
        self.coordination.validate()?;
        for (name, component) in &self.components {
            if let Some(restart) = &component.restart {
                split_command(restart).with_context(|| format!("components.{name}.restart"))?;
            }
            for probe in &component.probes {
                if let ProbeSpec::Tcp {
                    remediate: Some(cmd),
                    ..
                } = probe
                {
                    split_command(cmd)
                        .with_context(|| format!("components.{name}.probes remediate"))?;
                }
            }
        }
        Ok(())
    }

    /// Timeout for a component's restart command
    pub fn restart_timeout(&self, component: &ComponentConfig) -> Duration {
        Duration::from_secs(
            component
                .restart_timeout_secs
                .unwrap_or(self.coordination.escalation.restart_timeout_secs),
        )
    }

    /// Goal text for diagnostic reports
    pub fn goal_for(&self, component: &str) -> Option<&str> {
        self.components
            .get(component)
            .and_then(|c| c.goal.as_deref())
    }
}

/// Split a command line shell-style; no shell is involved at run time
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let Some(argv) = shlex::split(line) else {
        bail!("unbalanced quotes in `{line}`");
    };
    if argv.is_empty() {
        bail!("empty command");
    }
    Ok(argv)
}
