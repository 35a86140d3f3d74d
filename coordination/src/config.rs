//! Coordination configuration
//!
//! One [`CoordinationConfig`] drives the worker pool, the health tracker and
//! the escalation engine. Every field has a default, so a partial TOML file
//! (or none at all) yields a working setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Top-level configuration for the coordination core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub pool: PoolConfig,
    pub health: HealthConfig,
    pub escalation: EscalationConfig,
    pub validation: ValidationConfig,
    pub sandbox: SandboxConfig,
}

impl CoordinationConfig {
    /// Parse from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid("pool.workers must be at least 1".into()));
        }
        if self.health.critical_threshold == 0 {
            return Err(ConfigError::Invalid(
                "health.critical_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.validation.max_memory_percent) {
            return Err(ConfigError::Invalid(
                "validation.max_memory_percent must be within 0..=100".into(),
            ));
        }
        for pattern in &self.validation.dangerous_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("validation.dangerous_patterns `{pattern}`: {e}"))
            })?;
        }
        if self.sandbox.allowed_interpreters.is_empty() {
            return Err(ConfigError::Invalid(
                "sandbox.allowed_interpreters must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Bounded dequeue wait, so workers observe shutdown promptly
    pub poll_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 250,
        }
    }
}

/// Health tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that move a component to Critical
    pub critical_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 3,
        }
    }
}

/// Tier selection and tier execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Rolling window for tier budgets
    pub window_secs: u64,
    /// Tier 1 attempts allowed in the window before escalating
    pub max_tier1_attempts: usize,
    /// Tier 2 attempts allowed in the window before escalating
    pub max_tier2_attempts: usize,
    /// Default timeout for restart commands
    pub restart_timeout_secs: u64,
    /// Refuse Tier 3 when no snapshot could be taken
    pub require_snapshot_for_generated_code: bool,
    /// Prior failed actions included in the oracle request
    pub history_summary_limit: usize,
    /// Settle time before post-repair probes run
    pub post_validation_delay_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_tier1_attempts: 3,
            max_tier2_attempts: 2,
            restart_timeout_secs: 30,
            require_snapshot_for_generated_code: true,
            history_summary_limit: 5,
            post_validation_delay_ms: 0,
        }
    }
}

/// Pre-repair gate and post-repair validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_memory_percent: f64,
    pub min_free_disk_mb: u64,
    pub max_concurrent_repairs: usize,
    pub burst_window_secs: u64,
    pub max_attempts_per_burst: usize,
    /// Error patterns that must not be repaired while the component is in use
    pub dangerous_patterns: Vec<String>,
    /// Components whose dependents are re-probed after a repair
    pub shared_components: std::collections::BTreeMap<String, Vec<String>>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_memory_percent: 95.0,
            min_free_disk_mb: 512,
            max_concurrent_repairs: 4,
            burst_window_secs: 60,
            max_attempts_per_burst: 10,
            dangerous_patterns: vec![
                r"(?i)data\s+corruption".into(),
                r"(?i)schema\s+migration".into(),
                r"(?i)transaction\s+in\s+progress".into(),
            ],
            shared_components: Default::default(),
        }
    }
}

/// Subprocess sandbox limits for generated repair code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter binaries that may run generated code
    pub allowed_interpreters: Vec<String>,
    pub timeout_secs: u64,
    /// `ulimit -t`
    pub cpu_limit_secs: u64,
    /// `ulimit -v`, in megabytes
    pub memory_limit_mb: u64,
    /// Captured stdout/stderr is truncated to this many bytes
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_interpreters: vec!["python3".into(), "sh".into(), "bash".into()],
            timeout_secs: 60,
            cpu_limit_secs: 30,
            memory_limit_mb: 512,
            max_output_bytes: 16 * 1024,
        }
    }
}
