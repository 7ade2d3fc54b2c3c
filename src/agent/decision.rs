//! Decision agent.
//!
//! Reads the other agents' outputs and the reliability assessment and turns
//! them into a recommendation. It never calls a backend, never touches
//! storage and never acts on its recommendation.

use crate::config::ReliabilityConfig;
use crate::consensus::{self, Assessment};
use crate::models::{AgentOutput, Conflict, Recommendation, RiskLevel};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub recommendation: Recommendation,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct DecisionAgent {
    config: ReliabilityConfig,
}

impl DecisionAgent {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self { config }
    }

    pub fn decide(
        &self,
        outputs: &[AgentOutput],
        conflicts: &[Conflict],
        assessment: &Assessment,
    ) -> Decision {
        let recommendation = if assessment.deferred {
            Recommendation::Defer
        } else {
            match assessment.overall_risk {
                RiskLevel::Critical | RiskLevel::Unknown => Recommendation::ManualReviewRequired,
                RiskLevel::High => Recommendation::ReviewRequired,
                RiskLevel::Medium => Recommendation::ProceedWithCaution,
                RiskLevel::Low | RiskLevel::None => Recommendation::Acceptable,
            }
        };

        let explanation = consensus::explain(outputs, conflicts, assessment, &self.config);
        let mut rationale = format!(
            "Overall risk is {} at {:.0}% confidence; recommendation: {}.",
            assessment.overall_risk,
            assessment.overall_confidence * 100.0,
            recommendation
        );
        if let Some(reason) = &assessment.reason {
            rationale.push_str(&format!(" Deferred because: {}.", reason));
        }
        rationale.push(' ');
        rationale.push_str(&explanation);

        if assessment.deferred {
            info!("Decision deferred: {}", assessment.reason.as_deref().unwrap_or(""));
        } else {
            info!("Decision: {}", recommendation);
        }

        Decision {
            recommendation,
            rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{aggregate, ConflictResolver};
    use crate::models::AgentRole;

    fn decide(outputs: Vec<AgentOutput>) -> Decision {
        let config = ReliabilityConfig::default();
        let conflicts = ConflictResolver::from_config(&config).detect(&outputs);
        let assessment = aggregate(&outputs, &conflicts, &config);
        DecisionAgent::new(config).decide(&outputs, &conflicts, &assessment)
    }

    fn ok(agent: AgentRole, risk: RiskLevel, confidence: f64) -> AgentOutput {
        AgentOutput::succeeded(agent, confidence, risk, vec![], "done")
    }

    #[test]
    fn test_recommendation_follows_risk() {
        let cases = [
            (RiskLevel::None, Recommendation::Acceptable),
            (RiskLevel::Low, Recommendation::Acceptable),
            (RiskLevel::Medium, Recommendation::ProceedWithCaution),
            (RiskLevel::High, Recommendation::ReviewRequired),
            (RiskLevel::Critical, Recommendation::ManualReviewRequired),
        ];
        for (risk, expected) in cases {
            let decision = decide(vec![
                ok(AgentRole::Security, risk, 0.95),
                ok(AgentRole::Quality, RiskLevel::None, 0.9),
            ]);
            assert_eq!(decision.recommendation, expected, "risk {}", risk);
        }
    }

    #[test]
    fn test_deferral_wins_over_risk() {
        let decision = decide(vec![
            ok(AgentRole::Security, RiskLevel::Critical, 0.85),
            ok(AgentRole::Logic, RiskLevel::Low, 0.94),
        ]);
        assert_eq!(decision.recommendation, Recommendation::Defer);
        assert!(decision.rationale.contains("Deferred because"));
        assert!(decision.rationale.contains("disagreement"));
    }

    #[test]
    fn test_rationale_names_failed_critical_agent() {
        let decision = decide(vec![
            AgentOutput::failed(AgentRole::Security, "request timed out"),
            ok(AgentRole::Quality, RiskLevel::Low, 0.9),
        ]);
        assert_eq!(decision.recommendation, Recommendation::Defer);
        assert!(decision
            .rationale
            .contains("no verdict from critical agent: security"));
    }
}
