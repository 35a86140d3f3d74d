//! repair-agent CLI
//!
//! ```bash
//! # One repair session for a failing component
//! repair-agent --config agent.toml repair ollama_service "connection refused"
//!
//! # Diagnostic report from the ledger (needs a persistent state_path)
//! repair-agent --config agent.toml report ollama_service
//!
//! # Drain a JSON task file through the worker pool
//! repair-agent --config agent.toml run tasks.json
//!
//! RUST_LOG=debug REPAIR_WORKERS=8 repair-agent check-config
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repair_agent::{parse_task_file, AgentConfig, RepairAgent};
use serde_json::{json, Value};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the agent TOML config (defaults + REPAIR_* env when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one repair session for a component
    Repair {
        component: String,
        error_message: String,
        /// Extra error context as a JSON object
        #[arg(long)]
        context: Option<String>,
        /// Bypass the dangerous-error guard
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the diagnostic report for a component
    Report {
        component: String,
        /// Overrides the configured goal
        #[arg(long)]
        goal: Option<String>,
    },
    /// Submit tasks from a JSON file and wait for them to finish
    Run {
        tasks: PathBuf,
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref())?;

    match args.command {
        Command::CheckConfig => {
            let mut shown = config.clone();
            if shown.oracle.api_key.is_some() {
                shown.oracle.api_key = Some("<redacted>".into());
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&shown).context("Failed to render config")?
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Repair {
            component,
            error_message,
            context,
            force,
        } => {
            let mut context: Value = match context {
                Some(raw) => serde_json::from_str(&raw).context("--context must be JSON")?,
                None => json!({}),
            };
            if !(context.is_object() || context.is_null()) {
                anyhow::bail!("--context must be a JSON object");
            }
            if force {
                context["force_repair"] = Value::Bool(true);
            }
            let agent = RepairAgent::build(config)?;
            let repaired = agent.repair(&component, &error_message, context).await;
            let last = agent
                .engine()
                .ledger()
                .history(&component)?
                .pop()
                .map(serde_json::to_value)
                .transpose()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "component": component,
                    "repaired": repaired,
                    "attempt": last,
                }))?
            );
            Ok(if repaired {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Report { component, goal } => {
            let agent = RepairAgent::build(config)?;
            println!("{}", agent.report(&component, goal.as_deref())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            tasks,
            timeout_secs,
        } => {
            let raw = std::fs::read_to_string(&tasks)
                .with_context(|| format!("Failed to read {}", tasks.display()))?;
            let specs = parse_task_file(&raw)?;
            let agent = RepairAgent::build(config)?;
            info!(count = specs.len(), "Running tasks");
            let finished = agent
                .run_tasks(specs, Duration::from_secs(timeout_secs))
                .await?;
            let all_ok = finished
                .iter()
                .all(|t| t.status == coordination::state::TaskStatus::Completed);
            println!("{}", serde_json::to_string_pretty(&finished)?);
            Ok(if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
