//! Metric-driven agents. No backend calls, no snippet content.

use crate::config::QualityConfig;
use crate::models::{
    AgentOutput, AgentRole, CuratedInput, Finding, RiskLevel, Severity, SourceLocation,
};
use std::collections::BTreeMap;

/// Codebase size above which the feature agent notes it.
const LARGE_CODEBASE_LINES: usize = 500;

/// Quality issue count above which risk becomes medium.
const MEDIUM_QUALITY_ISSUES: usize = 5;

/// Describes what the snapshot contains.
#[derive(Debug, Clone, Default)]
pub struct FeatureAgent;

impl FeatureAgent {
    pub fn analyze(&self, input: &CuratedInput) -> AgentOutput {
        let metrics = &input.metrics;
        let total_lines = metrics.total_lines.unwrap_or(0);
        let file_count = metrics.file_count.unwrap_or(0);
        let languages: Vec<String> = metrics
            .languages
            .as_ref()
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default();

        let mut findings: Vec<Finding> = languages
            .iter()
            .map(|lang| Finding {
                category: "language_detection".to_string(),
                severity: Severity::Info,
                description: format!("Detected {} source files", lang),
                location: None,
                remediation: None,
            })
            .collect();

        if total_lines > LARGE_CODEBASE_LINES {
            findings.push(Finding {
                category: "codebase_size".to_string(),
                severity: Severity::Info,
                description: format!(
                    "Codebase contains {} lines of active code in {} files",
                    total_lines, file_count
                ),
                location: None,
                remediation: None,
            });
        }

        let summary = format!(
            "{} files, {} lines, {} functions, {} classes ({})",
            file_count,
            total_lines,
            metrics.function_count.unwrap_or(0),
            metrics.class_count.unwrap_or(0),
            if languages.is_empty() {
                "no languages detected".to_string()
            } else {
                languages.join(", ")
            }
        );

        AgentOutput::succeeded(AgentRole::Feature, 1.0, RiskLevel::None, findings, summary)
    }
}

/// Flags maintainability issues from structural metrics.
#[derive(Debug, Clone)]
pub struct QualityAgent {
    long_file_lines: usize,
    high_nesting_depth: usize,
}

impl QualityAgent {
    /// Metrics are exact but the thresholds are judgement calls.
    pub const CONFIDENCE: f64 = 0.9;

    pub fn new(config: &QualityConfig) -> Self {
        Self {
            long_file_lines: config.long_file_lines,
            high_nesting_depth: config.high_nesting_depth,
        }
    }

    pub fn analyze(&self, input: &CuratedInput) -> AgentOutput {
        let metrics = &input.metrics;
        let mut findings = Vec::new();

        for long in metrics.long_files.iter().flatten() {
            findings.push(Finding {
                category: "long_file".to_string(),
                severity: Severity::Low,
                description: format!(
                    "{} has {} lines of code (threshold {})",
                    long.file, long.lines, self.long_file_lines
                ),
                location: Some(SourceLocation {
                    file: long.file.clone(),
                    start_line: 1,
                    end_line: 1,
                }),
                remediation: Some("Split the file into smaller modules".to_string()),
            });
        }

        // One finding per file: (first line, line count, deepest level).
        let mut nesting: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
        for loc in metrics.high_nesting.iter().flatten() {
            let entry = nesting.entry(loc.file.as_str()).or_insert((loc.line, 0, 0));
            entry.0 = entry.0.min(loc.line);
            entry.1 += 1;
            entry.2 = entry.2.max(loc.depth);
        }
        for (file, (first_line, count, depth)) in nesting {
            findings.push(Finding {
                category: "deep_nesting".to_string(),
                severity: Severity::Medium,
                description: format!(
                    "{} line(s) nested deeper than {} levels (max {})",
                    count, self.high_nesting_depth, depth
                ),
                location: Some(SourceLocation {
                    file: file.to_string(),
                    start_line: first_line,
                    end_line: first_line,
                }),
                remediation: Some("Extract nested blocks into functions or return early".to_string()),
            });
        }

        let risk = match findings.len() {
            0 => RiskLevel::None,
            n if n <= MEDIUM_QUALITY_ISSUES => RiskLevel::Low,
            _ => RiskLevel::Medium,
        };

        let summary = if findings.is_empty() {
            format!(
                "No quality issues; max nesting depth {}",
                metrics.max_nesting_depth.unwrap_or(0)
            )
        } else {
            format!(
                "{} quality issue(s); max nesting depth {}",
                findings.len(),
                metrics.max_nesting_depth.unwrap_or(0)
            )
        };

        AgentOutput::succeeded(AgentRole::Quality, Self::CONFIDENCE, risk, findings, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CuratedMetrics, LongFile, NestingLocation, RoutingLimits};
    use std::collections::BTreeSet;

    fn input(role: AgentRole, metrics: CuratedMetrics) -> CuratedInput {
        CuratedInput {
            role,
            snippets: vec![],
            metrics,
            limits: RoutingLimits::default(),
        }
    }

    #[test]
    fn test_feature_agent_is_certain_and_riskless() {
        let metrics = CuratedMetrics {
            total_lines: Some(900),
            file_count: Some(4),
            languages: Some(BTreeSet::from(["python".to_string(), "rust".to_string()])),
            ..Default::default()
        };
        let output = FeatureAgent.analyze(&input(AgentRole::Feature, metrics));
        assert!(output.success);
        assert_eq!(output.confidence, 1.0);
        assert_eq!(output.risk, RiskLevel::None);
        assert_eq!(output.findings.len(), 3);
        assert!(output.summary.contains("python, rust"));
    }

    #[test]
    fn test_quality_agent_clean() {
        let agent = QualityAgent::new(&QualityConfig::default());
        let output = agent.analyze(&input(AgentRole::Quality, CuratedMetrics::default()));
        assert_eq!(output.risk, RiskLevel::None);
        assert_eq!(output.confidence, 0.9);
        assert!(output.findings.is_empty());
    }

    #[test]
    fn test_quality_agent_groups_nesting_by_file() {
        let agent = QualityAgent::new(&QualityConfig::default());
        let metrics = CuratedMetrics {
            long_files: Some(vec![LongFile {
                file: "big.py".into(),
                lines: 420,
            }]),
            high_nesting: Some(vec![
                NestingLocation {
                    file: "deep.py".into(),
                    line: 40,
                    depth: 5,
                },
                NestingLocation {
                    file: "deep.py".into(),
                    line: 12,
                    depth: 7,
                },
            ]),
            max_nesting_depth: Some(7),
            ..Default::default()
        };
        let output = agent.analyze(&input(AgentRole::Quality, metrics));
        assert_eq!(output.findings.len(), 2);
        assert_eq!(output.risk, RiskLevel::Low);
        let nesting = &output.findings[1];
        assert_eq!(nesting.category, "deep_nesting");
        assert_eq!(nesting.location.as_ref().unwrap().start_line, 12);
        assert!(nesting.description.contains("max 7"));
    }

    #[test]
    fn test_quality_risk_grows_with_issue_count() {
        let agent = QualityAgent::new(&QualityConfig::default());
        let metrics = CuratedMetrics {
            long_files: Some(
                (0..6)
                    .map(|i| LongFile {
                        file: format!("f{}.py", i),
                        lines: 300,
                    })
                    .collect(),
            ),
            ..Default::default()
        };
        let output = agent.analyze(&input(AgentRole::Quality, metrics));
        assert_eq!(output.risk, RiskLevel::Medium);
    }
}
