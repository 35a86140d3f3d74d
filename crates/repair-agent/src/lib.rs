//! Repair agent: runs the coordination core's escalation engine and worker
//! pool against real services.
//!
//! - [`config`]: TOML + `REPAIR_*` environment configuration
//! - [`oracle`]: OpenAI-compatible HTTP oracle for Tier 3
//! - [`probes`]: HTTP probe and probe construction from config
//! - [`agent`]: startup wiring

pub mod agent;
pub mod config;
pub mod oracle;
pub mod probes;

pub use agent::{parse_task_file, RepairAgent, TaskSpec};
pub use config::AgentConfig;
