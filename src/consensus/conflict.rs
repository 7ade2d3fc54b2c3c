//! Pairwise disagreement detection.

use crate::config::ReliabilityConfig;
use crate::models::{AgentOutput, AgentRole, Conflict};
use std::collections::BTreeMap;
use tracing::info;

/// Detects agents whose risk assessments are too far apart.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    /// Minimum rank difference that counts as a conflict.
    threshold: u8,
    /// Roles taking part in the comparison.
    roles: Vec<AgentRole>,
}

impl ConflictResolver {
    pub fn new(threshold: u8, roles: Vec<AgentRole>) -> Self {
        Self {
            threshold: threshold.max(1),
            roles,
        }
    }

    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self::new(config.conflict_rank_threshold, config.conflict_roles.clone())
    }

    /// Compare every pair of successful outputs from the participating roles.
    ///
    /// The result is sorted by role pair and holds at most one conflict per
    /// unordered pair, so input order never changes it.
    pub fn detect(&self, outputs: &[AgentOutput]) -> Vec<Conflict> {
        let mut participants: Vec<&AgentOutput> = outputs
            .iter()
            .filter(|o| o.success && self.roles.contains(&o.agent) && o.risk.rank().is_some())
            .collect();
        participants.sort_by(|a, b| a.agent.cmp(&b.agent).then_with(|| a.risk.cmp(&b.risk)));

        let mut conflicts: BTreeMap<(AgentRole, AgentRole), Conflict> = BTreeMap::new();
        for (i, a) in participants.iter().enumerate() {
            for b in &participants[i + 1..] {
                if a.agent == b.agent {
                    continue;
                }
                let (Some(ra), Some(rb)) = (a.risk.rank(), b.risk.rank()) else {
                    continue;
                };
                let delta = ra.abs_diff(rb);
                if delta < self.threshold {
                    continue;
                }
                conflicts
                    .entry((a.agent, b.agent))
                    .or_insert_with(|| build_conflict(a, b, delta));
            }
        }

        let conflicts: Vec<Conflict> = conflicts.into_values().collect();
        for conflict in &conflicts {
            info!("Conflict detected: {}", conflict.description);
        }
        conflicts
    }
}

fn build_conflict(first: &AgentOutput, second: &AgentOutput, rank_delta: u8) -> Conflict {
    Conflict {
        first: first.agent,
        second: second.agent,
        rank_delta,
        description: format!(
            "{} agent assessed {} risk ({}) while {} agent assessed {} risk ({})",
            first.agent, first.risk, first.summary, second.agent, second.risk, second.summary
        ),
    }
}
