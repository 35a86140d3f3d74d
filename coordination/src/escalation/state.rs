//! Escalation State: tier budgets over the rolling ledger window

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EscalationConfig;
use crate::state::{RepairAttempt, RepairTier};

/// Budget limits for tier selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Tier 1 attempts allowed in the window before escalating
    pub max_tier1_attempts: usize,
    /// Tier 2 attempts allowed in the window before escalating
    pub max_tier2_attempts: usize,
    /// Rolling window the budgets apply to
    pub window: Duration,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::from(&EscalationConfig::default())
    }
}

impl From<&EscalationConfig> for TierPolicy {
    fn from(config: &EscalationConfig) -> Self {
        Self {
            max_tier1_attempts: config.max_tier1_attempts,
            max_tier2_attempts: config.max_tier2_attempts,
            window: Duration::from_secs(config.window_secs),
        }
    }
}

/// Outcome of tier selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDecision {
    pub tier: RepairTier,
    pub tier1_attempts: usize,
    pub tier2_attempts: usize,
    pub tier3_attempts: usize,
    /// Highest tier already attempted in the window
    pub floor: Option<RepairTier>,
    pub reason: String,
}

/// Pick the tier for the next attempt from the attempts inside the window.
///
/// Budgets are consumed bottom-up; the result never drops below the highest
/// tier already used in the window. Rejected attempts are not counted.
pub fn select_tier(window_history: &[RepairAttempt], policy: &TierPolicy) -> TierDecision {
    let counted: Vec<&RepairAttempt> = window_history
        .iter()
        .filter(|a| a.counts_toward_budget())
        .collect();
    let count = |tier: RepairTier| counted.iter().filter(|a| a.repair_tier == tier).count();

    let tier1_attempts = count(RepairTier::Restart);
    let tier2_attempts = count(RepairTier::DependencyRepair);
    let tier3_attempts = count(RepairTier::GeneratedCode);
    let floor = counted.iter().map(|a| a.repair_tier).max();

    let (budget_tier, mut reason) = if tier1_attempts < policy.max_tier1_attempts {
        (
            RepairTier::Restart,
            format!(
                "{tier1_attempts}/{} restart attempts used",
                policy.max_tier1_attempts
            ),
        )
    } else if tier2_attempts < policy.max_tier2_attempts {
        (
            RepairTier::DependencyRepair,
            format!(
                "restart budget exhausted; {tier2_attempts}/{} dependency attempts used",
                policy.max_tier2_attempts
            ),
        )
    } else {
        (
            RepairTier::GeneratedCode,
            "restart and dependency budgets exhausted".to_string(),
        )
    };

    let tier = match floor {
        Some(floor) if floor > budget_tier => {
            reason = format!("{reason}; held at {floor} already reached in window");
            floor
        }
        _ => budget_tier,
    };

    TierDecision {
        tier,
        tier1_attempts,
        tier2_attempts,
        tier3_attempts,
        floor,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempts(tiers: &[RepairTier]) -> Vec<RepairAttempt> {
        tiers
            .iter()
            .map(|t| RepairAttempt::new("svc", "down", "connectivity", *t))
            .collect()
    }

    #[test]
    fn test_empty_history_starts_at_restart() {
        let decision = select_tier(&[], &TierPolicy::default());
        assert_eq!(decision.tier, RepairTier::Restart);
        assert_eq!(decision.floor, None);
    }

    #[test]
    fn test_escalates_after_restart_budget() {
        let history = attempts(&[RepairTier::Restart; 3]);
        let decision = select_tier(&history, &TierPolicy::default());
        assert_eq!(decision.tier, RepairTier::DependencyRepair);
        assert_eq!(decision.tier1_attempts, 3);
    }

    #[test]
    fn test_escalates_to_generated_code() {
        let mut tiers = vec![RepairTier::Restart; 3];
        tiers.extend([RepairTier::DependencyRepair; 2]);
        let decision = select_tier(&attempts(&tiers), &TierPolicy::default());
        assert_eq!(decision.tier, RepairTier::GeneratedCode);
    }

    #[test]
    fn test_monotonic_floor() {
        // A Tier 2 attempt in the window keeps selection at Tier 2 even though
        // the restart budget has room.
        let history = attempts(&[RepairTier::DependencyRepair]);
        let decision = select_tier(&history, &TierPolicy::default());
        assert_eq!(decision.tier, RepairTier::DependencyRepair);
        assert!(decision.reason.contains("held at"));
    }

    #[test]
    fn test_rejected_attempts_not_counted() {
        let mut history = attempts(&[RepairTier::Restart; 3]);
        for attempt in &mut history {
            attempt.rejected = true;
        }
        let decision = select_tier(&history, &TierPolicy::default());
        assert_eq!(decision.tier, RepairTier::Restart);
        assert_eq!(decision.tier1_attempts, 0);
    }

    #[test]
    fn test_policy_from_config() {
        let config = EscalationConfig {
            max_tier1_attempts: 1,
            window_secs: 60,
            ..EscalationConfig::default()
        };
        let policy = TierPolicy::from(&config);
        assert_eq!(policy.window, Duration::from_secs(60));
        let decision = select_tier(&attempts(&[RepairTier::Restart]), &policy);
        assert_eq!(decision.tier, RepairTier::DependencyRepair);
    }
}
