//! Confidence aggregation and deferral policy.
//!
//! Every threshold that decides whether a run is trusted is applied here,
//! and every function in this module is pure.

use crate::config::ReliabilityConfig;
use crate::models::{
    clamp_unit, AgentOutput, AgentRole, ConfidenceTier, Conflict, HealthStatus,
    ReliabilitySummary, RiskLevel, SystemHealth,
};
use serde::{Deserialize, Serialize};

/// The aggregate verdict over all agent outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub overall_confidence: f64,
    pub overall_risk: RiskLevel,
    pub deferred: bool,
    /// Every triggered deferral condition, joined with "; ".
    pub reason: Option<String>,
    /// Critical roles whose agent failed.
    pub failed_critical: Vec<AgentRole>,
}

/// Combine agent outputs and detected conflicts into one assessment.
pub fn aggregate(
    outputs: &[AgentOutput],
    conflicts: &[Conflict],
    config: &ReliabilityConfig,
) -> Assessment {
    let successful: Vec<&AgentOutput> = outputs.iter().filter(|o| o.success).collect();
    let failed_critical: Vec<&AgentOutput> = outputs
        .iter()
        .filter(|o| !o.success && config.is_critical(o.agent))
        .collect();

    let mut overall_risk = successful
        .iter()
        .map(|o| o.risk)
        .max()
        .unwrap_or(RiskLevel::Unknown);
    if !failed_critical.is_empty() {
        overall_risk = overall_risk.max(RiskLevel::High);
    }

    let mean = if successful.is_empty() {
        0.0
    } else {
        successful.iter().map(|o| clamp_unit(o.confidence)).sum::<f64>() / successful.len() as f64
    };
    let overall_confidence = clamp_unit(mean - conflict_penalty(conflicts.len(), config));

    let mut reasons = Vec::new();
    if successful.is_empty() {
        reasons.push("No successful agent outputs".to_string());
    }
    if !failed_critical.is_empty() {
        let failures: Vec<String> = failed_critical
            .iter()
            .map(|o| match &o.error {
                Some(err) => format!("{} ({})", o.agent, err),
                None => o.agent.to_string(),
            })
            .collect();
        reasons.push(format!("Critical agent failed: {}", failures.join(", ")));
    }
    if !conflicts.is_empty() {
        let pairs: Vec<String> = conflicts
            .iter()
            .map(|c| format!("{} vs {}", c.first, c.second))
            .collect();
        reasons.push(format!(
            "{} conflict(s) between agents: {}",
            conflicts.len(),
            pairs.join(", ")
        ));
    }
    if overall_confidence < config.min_confidence {
        reasons.push(format!(
            "Confidence {:.2} below threshold {:.2}",
            overall_confidence, config.min_confidence
        ));
    }
    if overall_risk == RiskLevel::Critical && overall_confidence < config.automation_min_confidence {
        reasons.push(format!(
            "Critical risk with confidence {:.2} below {:.2}",
            overall_confidence, config.automation_min_confidence
        ));
    }

    Assessment {
        overall_confidence,
        overall_risk,
        deferred: !reasons.is_empty(),
        reason: if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        },
        failed_critical: failed_critical.iter().map(|o| o.agent).collect(),
    }
}

/// Total penalty for `count` distinct conflicts.
pub fn conflict_penalty(count: usize, config: &ReliabilityConfig) -> f64 {
    (config.conflict_penalty * count as f64)
        .min(config.max_conflict_penalty)
        .max(0.0)
}

pub fn tier(confidence: f64, config: &ReliabilityConfig) -> ConfidenceTier {
    if confidence >= config.tier_high {
        ConfidenceTier::High
    } else if confidence >= config.tier_medium {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// Degraded when any agent failed or the successful agents' mean
/// confidence sits below the deferral threshold.
pub fn system_health(outputs: &[AgentOutput], config: &ReliabilityConfig) -> SystemHealth {
    let confidences: Vec<f64> = outputs
        .iter()
        .filter(|o| o.success)
        .map(|o| clamp_unit(o.confidence))
        .collect();
    let successful_agents = confidences.len();
    let failed_agents = outputs.len() - successful_agents;
    let average = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / successful_agents as f64
    };
    SystemHealth {
        total_agents: outputs.len(),
        successful_agents,
        failed_agents,
        status: if failed_agents == 0 && average >= config.min_confidence {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
    }
}

/// Trust signals for the reporting layer.
pub fn summarize(
    assessment: &Assessment,
    conflicts: &[Conflict],
    outputs: &[AgentOutput],
    config: &ReliabilityConfig,
) -> ReliabilitySummary {
    ReliabilitySummary {
        overall_confidence: assessment.overall_confidence,
        tier: tier(assessment.overall_confidence, config),
        disagreement: !conflicts.is_empty(),
        safe_to_automate: assessment.overall_confidence >= config.automation_min_confidence
            && conflicts.is_empty()
            && !assessment.deferred,
        conflict_count: conflicts.len(),
        health: system_health(outputs, config),
    }
}

/// Plain-English account of what shaped the confidence score.
pub fn explain(
    outputs: &[AgentOutput],
    conflicts: &[Conflict],
    assessment: &Assessment,
    config: &ReliabilityConfig,
) -> String {
    let failed = outputs.iter().filter(|o| !o.success).count();

    let mut points = Vec::new();
    if !assessment.failed_critical.is_empty() {
        let roles: Vec<&str> = assessment.failed_critical.iter().map(|r| r.as_str()).collect();
        points.push(format!("no verdict from critical agent: {}", roles.join(", ")));
    }
    if failed > 0 {
        points.push(format!(
            "overall confidence reduced by {} agent failure{}",
            failed,
            if failed == 1 { "" } else { "s" }
        ));
    }
    if !conflicts.is_empty() {
        points.push(format!(
            "confidence penalized by {:.0} points for disagreement between agents",
            conflict_penalty(conflicts.len(), config) * 100.0
        ));
    }
    if assessment.overall_confidence < config.tier_high {
        points.push("analytic certainty is moderate".to_string());
    }

    if points.is_empty() {
        return "High confidence achieved with no agent failures or conflicts.".to_string();
    }

    let text = points.join("; ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConflictResolver;

    fn ok(agent: AgentRole, risk: RiskLevel, confidence: f64) -> AgentOutput {
        AgentOutput::succeeded(agent, confidence, risk, vec![], format!("{} done", agent))
    }

    fn run(outputs: &[AgentOutput]) -> (Vec<Conflict>, Assessment) {
        let config = ReliabilityConfig::default();
        let conflicts = ConflictResolver::from_config(&config).detect(outputs);
        let assessment = aggregate(outputs, &conflicts, &config);
        (conflicts, assessment)
    }

    #[test]
    fn test_scenario_disagreement_defers() {
        let outputs = vec![
            ok(AgentRole::Security, RiskLevel::Critical, 0.85),
            ok(AgentRole::Logic, RiskLevel::Low, 0.94),
            ok(AgentRole::Quality, RiskLevel::Medium, 0.76),
            ok(AgentRole::Feature, RiskLevel::None, 1.0),
        ];
        let (conflicts, assessment) = run(&outputs);

        assert_eq!(conflicts.len(), 1);
        let expected = (0.85 + 0.94 + 0.76 + 1.0) / 4.0 - 0.20;
        assert!((assessment.overall_confidence - expected).abs() < 1e-9);
        assert!(assessment.deferred);
        assert_eq!(assessment.overall_risk, RiskLevel::Critical);
        let reason = assessment.reason.unwrap();
        assert!(reason.contains("conflict"));
        assert!(reason.contains("security vs logic"));
    }

    #[test]
    fn test_scenario_clean_run_proceeds() {
        let outputs = vec![
            ok(AgentRole::Security, RiskLevel::Low, 0.92),
            ok(AgentRole::Logic, RiskLevel::None, 0.95),
            ok(AgentRole::Quality, RiskLevel::Low, 0.9),
            ok(AgentRole::Feature, RiskLevel::None, 1.0),
        ];
        let (conflicts, assessment) = run(&outputs);

        assert!(conflicts.is_empty());
        assert!(!assessment.deferred);
        assert_eq!(assessment.reason, None);
        assert_eq!(assessment.overall_risk, RiskLevel::Low);
    }

    #[test]
    fn test_scenario_critical_agent_failure() {
        let outputs = vec![
            AgentOutput::failed(AgentRole::Security, "request timed out after 120s"),
            ok(AgentRole::Logic, RiskLevel::None, 1.0),
            ok(AgentRole::Quality, RiskLevel::None, 1.0),
            ok(AgentRole::Feature, RiskLevel::None, 1.0),
        ];
        let (conflicts, assessment) = run(&outputs);

        assert!(conflicts.is_empty());
        assert_eq!(assessment.overall_confidence, 1.0);
        assert!(assessment.overall_risk >= RiskLevel::High);
        assert!(assessment.deferred);
        assert_eq!(assessment.failed_critical, vec![AgentRole::Security]);
        assert!(assessment.reason.unwrap().contains("security (request timed out"));
    }

    #[test]
    fn test_low_confidence_defers() {
        let outputs = vec![
            ok(AgentRole::Security, RiskLevel::Low, 0.5),
            ok(AgentRole::Logic, RiskLevel::Low, 0.6),
        ];
        let (_, assessment) = run(&outputs);
        assert!(assessment.deferred);
        assert!(assessment.reason.unwrap().contains("below threshold 0.70"));
    }

    #[test]
    fn test_critical_risk_needs_high_confidence() {
        let outputs = vec![
            ok(AgentRole::Security, RiskLevel::Critical, 0.75),
            ok(AgentRole::Logic, RiskLevel::High, 0.75),
        ];
        let (conflicts, assessment) = run(&outputs);
        assert!(conflicts.is_empty());
        assert!(assessment.deferred);
        assert!(assessment.reason.unwrap().starts_with("Critical risk"));
    }

    #[test]
    fn test_no_successful_outputs() {
        let outputs = vec![
            AgentOutput::failed(AgentRole::Logic, "boom"),
            AgentOutput::failed(AgentRole::Quality, "boom"),
        ];
        let (_, assessment) = run(&outputs);
        assert_eq!(assessment.overall_confidence, 0.0);
        assert_eq!(assessment.overall_risk, RiskLevel::Unknown);
        assert!(assessment
            .reason
            .unwrap()
            .starts_with("No successful agent outputs"));
    }

    #[test]
    fn test_confidence_stays_in_unit_interval_and_penalty_caps() {
        let config = ReliabilityConfig::default();
        assert!((conflict_penalty(1, &config) - 0.2).abs() < 1e-9);
        assert!((conflict_penalty(2, &config) - 0.4).abs() < 1e-9);
        assert!((conflict_penalty(9, &config) - 0.5).abs() < 1e-9);

        let roles = [AgentRole::Security, AgentRole::Logic, AgentRole::Quality];
        let confidences = [0.0, 0.3, 0.7, 1.0, 1.5, -0.4, f64::NAN];
        for conf in confidences {
            for conflict_count in 0..6 {
                let outputs: Vec<AgentOutput> = roles
                    .iter()
                    .map(|r| AgentOutput {
                        confidence: conf,
                        ..ok(*r, RiskLevel::Medium, 0.5)
                    })
                    .collect();
                let conflicts: Vec<Conflict> = (0..conflict_count)
                    .map(|_| Conflict {
                        first: AgentRole::Security,
                        second: AgentRole::Logic,
                        rank_delta: 2,
                        description: String::new(),
                    })
                    .collect();
                let assessment = aggregate(&outputs, &conflicts, &config);
                assert!((0.0..=1.0).contains(&assessment.overall_confidence));
                if conflict_count > 0 {
                    assert!(assessment.deferred);
                }
                if assessment.overall_confidence < config.min_confidence {
                    assert!(assessment.deferred);
                }
            }
        }
    }

    #[test]
    fn test_aggregation_is_pure() {
        let outputs = vec![
            ok(AgentRole::Security, RiskLevel::High, 0.8),
            AgentOutput::failed(AgentRole::Logic, "bad json"),
            ok(AgentRole::Quality, RiskLevel::Low, 0.9),
        ];
        let config = ReliabilityConfig::default();
        let conflicts = ConflictResolver::from_config(&config).detect(&outputs);
        let first = aggregate(&outputs, &conflicts, &config);
        for _ in 0..10 {
            assert_eq!(aggregate(&outputs, &conflicts, &config), first);
        }
    }

    #[test]
    fn test_tiers_and_summary() {
        let config = ReliabilityConfig::default();
        assert_eq!(tier(0.8, &config), ConfidenceTier::High);
        assert_eq!(tier(0.6875, &config), ConfidenceTier::Medium);
        assert_eq!(tier(0.2, &config), ConfidenceTier::Low);

        let outputs = vec![
            ok(AgentRole::Security, RiskLevel::Low, 0.95),
            AgentOutput::failed(AgentRole::Logic, "boom"),
        ];
        let (conflicts, assessment) = run(&outputs);
        let summary = summarize(&assessment, &conflicts, &outputs, &config);
        assert_eq!(summary.health.failed_agents, 1);
        assert_eq!(summary.health.status, HealthStatus::Degraded);
        assert!(!summary.disagreement);
        assert!(summary.safe_to_automate);
    }

    #[test]
    fn test_explanations() {
        let config = ReliabilityConfig::default();
        let clean = vec![ok(AgentRole::Security, RiskLevel::Low, 0.95)];
        let (conflicts, assessment) = run(&clean);
        assert_eq!(
            explain(&clean, &conflicts, &assessment, &config),
            "High confidence achieved with no agent failures or conflicts."
        );

        let messy = vec![
            ok(AgentRole::Security, RiskLevel::Critical, 0.85),
            ok(AgentRole::Logic, RiskLevel::Low, 0.7),
            AgentOutput::failed(AgentRole::Quality, "boom"),
        ];
        let (conflicts, assessment) = run(&messy);
        let text = explain(&messy, &conflicts, &assessment, &config);
        assert!(text.starts_with("Overall confidence reduced by 1 agent failure;"));
        assert!(text.contains("20 points"));
        assert!(text.ends_with("analytic certainty is moderate."));
    }

    #[test]
    fn test_explanation_names_failed_critical_roles() {
        let config = ReliabilityConfig::default();
        let outputs = vec![
            AgentOutput::failed(AgentRole::Security, "timeout"),
            ok(AgentRole::Quality, RiskLevel::Low, 0.9),
        ];
        let (conflicts, assessment) = run(&outputs);
        let text = explain(&outputs, &conflicts, &assessment, &config);
        assert!(text.starts_with("No verdict from critical agent: security;"));
        assert!(text.contains("reduced by 1 agent failure"));
    }

    #[test]
    fn test_health_degrades_on_low_average_confidence() {
        let config = ReliabilityConfig::default();
        let confident = vec![
            ok(AgentRole::Security, RiskLevel::Low, 0.9),
            ok(AgentRole::Logic, RiskLevel::Low, 0.8),
        ];
        let health = system_health(&confident, &config);
        assert_eq!(health.failed_agents, 0);
        assert_eq!(health.status, HealthStatus::Healthy);

        let hesitant = vec![
            ok(AgentRole::Security, RiskLevel::Low, 0.6),
            ok(AgentRole::Logic, RiskLevel::Low, 0.7),
        ];
        let health = system_health(&hesitant, &config);
        assert_eq!(health.failed_agents, 0);
        assert_eq!(health.status, HealthStatus::Degraded);

        assert_eq!(system_health(&[], &config).status, HealthStatus::Degraded);
    }
}
