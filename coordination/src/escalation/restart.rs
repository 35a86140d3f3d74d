//! Tier 1: static restart procedures

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;

use crate::process::{run_with_timeout, truncate_output};

/// Output kept from restart and remediation commands
const MAX_COMMAND_OUTPUT: usize = 4096;

/// A restart procedure for one component
#[async_trait]
pub trait RestartAction: Send + Sync {
    /// Human-readable description recorded as the ledger action
    fn describe(&self) -> String;

    /// Perform the restart; the returned text goes into execution details
    async fn restart(&self) -> anyhow::Result<String>;
}

/// Fixed argv executed directly (no shell) with a timeout
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            timeout,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }

    /// Run to completion; non-zero exit is an error carrying stderr
    pub async fn run(&self) -> anyhow::Result<String> {
        let Some((program, args)) = self.argv.split_first() else {
            bail!("empty command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = run_with_timeout(&mut cmd, self.timeout)
            .await
            .with_context(|| format!("`{}`", self.display()))?;

        let stdout = truncate_output(&output.stdout, MAX_COMMAND_OUTPUT);
        if !output.status.success() {
            let stderr = truncate_output(&output.stderr, MAX_COMMAND_OUTPUT);
            bail!(
                "`{}` exited with {}: {}",
                self.display(),
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            );
        }
        Ok(stdout)
    }
}

/// Restart by running a command
pub struct CommandRestart {
    spec: CommandSpec,
}

impl CommandRestart {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl RestartAction for CommandRestart {
    fn describe(&self) -> String {
        self.spec.display()
    }

    async fn restart(&self) -> anyhow::Result<String> {
        self.spec.run().await
    }
}

/// Component → restart procedure, resolved at startup
#[derive(Default, Clone)]
pub struct RestartRegistry {
    actions: HashMap<String, Arc<dyn RestartAction>>,
}

impl RestartRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: impl Into<String>, action: Arc<dyn RestartAction>) {
        self.actions.insert(component.into(), action);
    }

    pub fn get(&self, component: &str) -> Option<Arc<dyn RestartAction>> {
        self.actions.get(component).cloned()
    }

    pub fn components(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(
            vec!["sh".into(), "-c".into(), script.into()],
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_command_restart_success() {
        let restart = CommandRestart::new(sh("echo restarted"));
        assert_eq!(restart.restart().await.unwrap().trim(), "restarted");
        assert!(restart.describe().starts_with("sh -c"));
    }

    #[tokio::test]
    async fn test_command_restart_failure_carries_stderr() {
        let restart = CommandRestart::new(sh("echo 'unit not found' >&2; exit 5"));
        let err = restart.restart().await.unwrap_err().to_string();
        assert!(err.contains("exited with 5"));
        assert!(err.contains("unit not found"));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let spec = CommandSpec::new(vec![], Duration::from_secs(1));
        assert!(spec.run().await.is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = RestartRegistry::new();
        registry.register("db", Arc::new(CommandRestart::new(sh("true"))));
        assert!(registry.get("db").is_some());
        assert!(registry.get("cache").is_none());
        assert_eq!(registry.components(), vec!["db"]);
    }
}
