//! Repair Escalation: Tiered self-repair for failing components
//!
//! Each failure report climbs a fixed ladder, driven by the repair ledger's
//! rolling window:
//!
//! ```text
//! Tier 1: Restart (static restart procedure per component)
//!     │   3 attempts per hour
//!     ▼
//! Tier 2: Dependency repair (probe + remediate, then restart)
//!     │   2 attempts per hour
//!     ▼
//! Tier 3: Generated code (oracle-proposed script in the sandbox,
//!         only with a snapshot and mandatory post-validation)
//! ```
//!
//! Selection never drops below the highest tier already used in the window.
//! Every session is gated beforehand and validated afterwards; instability
//! rolls the component back to its pre-repair snapshot.

pub mod dependency;
pub mod engine;
pub mod generated;
pub mod locks;
pub mod restart;
pub mod state;
pub mod task;
pub mod validation;

pub use dependency::{
    DependencyProbe, DependencyRegistry, EnvProbe, FileProbe, ProbeResult, StorageProbe, TcpProbe,
};
pub use engine::{RepairContext, RepairEscalationEngine};
pub use generated::extract_code_block;
pub use locks::{ComponentGuard, ComponentLocks};
pub use restart::{CommandRestart, CommandSpec, RestartAction, RestartRegistry};
pub use state::{select_tier, TierDecision, TierPolicy};
pub use task::{RepairTaskHandler, COMPONENT_REPAIR_TASK};
pub use validation::{
    check_stability, FixedResources, InFlightPermit, PreRepairGate, ResourceProbe,
    ResourceSnapshot, StabilityReport, SystemResourceProbe,
};
