//! Data models for the review pipeline.
//!
//! This module contains the values that flow between stages of a run:
//! the captured snapshot, the structural summary, curated agent inputs,
//! agent outputs, conflicts and the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Risk level reported by an agent.
///
/// Ordering follows severity. `Unknown` is what a failed agent reports and it
/// sorts above `Critical`: an assessment nobody could read is never safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl RiskLevel {
    /// Numeric rank used for conflict deltas. `Unknown` has no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            RiskLevel::None => Some(0),
            RiskLevel::Low => Some(1),
            RiskLevel::Medium => Some(2),
            RiskLevel::High => Some(3),
            RiskLevel::Critical => Some(4),
            RiskLevel::Unknown => None,
        }
    }

    /// Interpret a risk label coming from outside the process.
    ///
    /// Returns the level and whether the label was recognised. Labels that do
    /// not parse are read as `Critical`.
    pub fn from_reported(label: &str) -> (Self, bool) {
        match label.parse::<RiskLevel>() {
            Ok(RiskLevel::Unknown) | Err(_) => (RiskLevel::Critical, false),
            Ok(level) => (level, true),
        }
    }

    /// Returns an emoji representation of the risk level.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::None => "⚪",
            RiskLevel::Low => "🟢",
            RiskLevel::Medium => "🟡",
            RiskLevel::High => "🟠",
            RiskLevel::Critical => "🔴",
            RiskLevel::Unknown => "❔",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
            RiskLevel::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "info" => Ok(RiskLevel::None),
            "low" => Ok(RiskLevel::Low),
            "medium" | "moderate" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            "unknown" => Ok(RiskLevel::Unknown),
            other => Err(format!("unrecognised risk level '{}'", other)),
        }
    }
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action needed
    Info,
    /// Low severity - style issues, minor suggestions
    Low,
    /// Medium severity - code quality issues, potential bugs
    Medium,
    /// High severity - bugs, security concerns
    High,
    /// Critical severity - security vulnerabilities, major bugs
    Critical,
}

impl Severity {
    /// Parse a severity label reported by a backend. Unrecognised labels are
    /// read as `Critical`.
    pub fn from_reported(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "info" | "none" => Severity::Info,
            "low" | "warning" => Severity::Low,
            "medium" | "moderate" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::Critical,
        }
    }

    /// The risk level a finding of this severity implies on its own.
    pub fn as_risk(&self) -> RiskLevel {
        match self {
            Severity::Info => RiskLevel::None,
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Feature,
    Security,
    Logic,
    Quality,
    Decision,
}

impl AgentRole {
    /// Roles that analyze curated input, in execution order.
    pub const ANALYZERS: [AgentRole; 4] = [
        AgentRole::Feature,
        AgentRole::Security,
        AgentRole::Logic,
        AgentRole::Quality,
    ];

    /// Whether this role is allowed to see snippet content.
    pub fn sees_code(&self) -> bool {
        matches!(self, AgentRole::Security | AgentRole::Logic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Feature => "feature",
            AgentRole::Security => "security",
            AgentRole::Logic => "logic",
            AgentRole::Quality => "quality",
            AgentRole::Decision => "decision",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feature" => Ok(AgentRole::Feature),
            "security" => Ok(AgentRole::Security),
            "logic" => Ok(AgentRole::Logic),
            "quality" => Ok(AgentRole::Quality),
            "decision" => Ok(AgentRole::Decision),
            other => Err(format!("unknown agent role '{}'", other)),
        }
    }
}

/// Tag vocabulary attached to snippets by the summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetTag {
    Sql,
    Auth,
    Crypto,
    Exec,
    Deserialize,
    FileAccess,
    Loop,
    Conditional,
    Nesting,
}

impl SnippetTag {
    pub const ALL: [SnippetTag; 9] = [
        SnippetTag::Sql,
        SnippetTag::Auth,
        SnippetTag::Crypto,
        SnippetTag::Exec,
        SnippetTag::Deserialize,
        SnippetTag::FileAccess,
        SnippetTag::Loop,
        SnippetTag::Conditional,
        SnippetTag::Nesting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnippetTag::Sql => "sql",
            SnippetTag::Auth => "auth",
            SnippetTag::Crypto => "crypto",
            SnippetTag::Exec => "exec",
            SnippetTag::Deserialize => "deserialize",
            SnippetTag::FileAccess => "file_access",
            SnippetTag::Loop => "loop",
            SnippetTag::Conditional => "conditional",
            SnippetTag::Nesting => "nesting",
        }
    }
}

impl fmt::Display for SnippetTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable path -> content mapping captured before a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSnapshot {
    files: BTreeMap<String, String>,
}

impl CodeSnapshot {
    /// Capture a snapshot from (path, content) pairs.
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A file + line range inside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end_line > self.start_line {
            write!(f, "{}:{}-{}", self.file, self.start_line, self.end_line)
        } else {
            write!(f, "{}:{}", self.file, self.start_line)
        }
    }
}

/// A place where indentation depth crossed the high-nesting threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestingLocation {
    pub file: String,
    pub line: usize,
    pub depth: usize,
}

/// A file longer than the long-file threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongFile {
    pub file: String,
    pub lines: usize,
}

/// Structural summary of a snapshot. All zero for an empty snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    /// Non-blank lines across all files.
    pub total_lines: usize,
    pub function_count: usize,
    pub class_count: usize,
    pub max_nesting_depth: usize,
    pub languages: BTreeSet<String>,
    pub high_nesting: Vec<NestingLocation>,
    pub file_count: usize,
    pub average_file_size: f64,
    pub long_files: Vec<LongFile>,
}

/// A tagged, bounded excerpt of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub content: String,
    pub location: SourceLocation,
    pub tags: BTreeSet<SnippetTag>,
    /// Relevance in [0, 1].
    pub relevance: f64,
    /// Enclosing function or class, or "global scope".
    pub context: String,
}

impl CodeSnippet {
    pub fn has_any(&self, tags: &BTreeSet<SnippetTag>) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    /// Copy of this snippet with content cut to at most `max_chars` characters.
    pub fn truncated(&self, max_chars: usize) -> Self {
        let mut snippet = self.clone();
        if let Some((idx, _)) = snippet.content.char_indices().nth(max_chars) {
            snippet.content.truncate(idx);
        }
        snippet
    }

    pub fn tag_list(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Quota applied to a curated input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingLimits {
    pub max_snippets: usize,
    pub max_snippet_chars: usize,
}

impl Default for RoutingLimits {
    fn default() -> Self {
        Self {
            max_snippets: 3,
            max_snippet_chars: 500,
        }
    }
}

/// Deterministic metrics projected for one role. Fields a role may not see
/// stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuratedMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_nesting_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_file_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_nesting: Option<Vec<NestingLocation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_files: Option<Vec<LongFile>>,
}

/// Everything one agent role is allowed to see during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedInput {
    pub role: AgentRole,
    pub snippets: Vec<CodeSnippet>,
    pub metrics: CuratedMetrics,
    pub limits: RoutingLimits,
}

/// A snippet that reached a role whose deny-list intersects its tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingViolation {
    pub role: AgentRole,
    pub location: SourceLocation,
    pub offending_tags: Vec<SnippetTag>,
}

impl fmt::Display for RoutingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.offending_tags.iter().map(|t| t.as_str()).collect();
        write!(
            f,
            "snippet {} with denied tags [{}] reached the {} agent",
            self.location,
            tags.join(", "),
            self.role
        )
    }
}

/// A single observation made by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

/// Result of one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent: AgentRole,
    pub success: bool,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub findings: Vec<Finding>,
    /// One-line human summary of the assessment.
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutput {
    /// A completed assessment. Confidence is clamped into [0, 1].
    pub fn succeeded(
        agent: AgentRole,
        confidence: f64,
        risk: RiskLevel,
        findings: Vec<Finding>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            success: true,
            confidence: clamp_unit(confidence),
            risk,
            findings,
            summary: summary.into(),
            error: None,
        }
    }

    /// A failed assessment: zero confidence, unknown risk, error recorded.
    pub fn failed(agent: AgentRole, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            agent,
            success: false,
            confidence: 0.0,
            risk: RiskLevel::Unknown,
            findings: Vec::new(),
            summary: format!("{} agent failed: {}", agent, error),
            error: Some(error),
        }
    }

    pub fn to_summary(&self) -> AgentSummary {
        AgentSummary {
            agent: self.agent,
            success: self.success,
            confidence: self.confidence,
            risk: self.risk,
            finding_count: self.findings.len(),
        }
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Compact per-agent view for incremental display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent: AgentRole,
    pub success: bool,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub finding_count: usize,
}

/// A disagreement between two agents' risk assessments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The lower-ordered role of the pair.
    pub first: AgentRole,
    pub second: AgentRole,
    pub rank_delta: u8,
    pub description: String,
}

/// What the decision agent recommends. Never executed by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Defer,
    ManualReviewRequired,
    ReviewRequired,
    ProceedWithCaution,
    Acceptable,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Recommendation::Defer => "defer to human review",
            Recommendation::ManualReviewRequired => "manual review required",
            Recommendation::ReviewRequired => "review required",
            Recommendation::ProceedWithCaution => "proceed with caution",
            Recommendation::Acceptable => "acceptable",
        };
        f.write_str(label)
    }
}

/// Coarse confidence label for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceTier::High => write!(f, "HIGH"),
            ConfidenceTier::Medium => write!(f, "MEDIUM"),
            ConfidenceTier::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Agent completion counts for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub total_agents: usize,
    pub successful_agents: usize,
    pub failed_agents: usize,
    pub status: HealthStatus,
}

/// Trust signals derived from the final verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilitySummary {
    pub overall_confidence: f64,
    pub tier: ConfidenceTier,
    pub disagreement: bool,
    pub safe_to_automate: bool,
    pub conflict_count: usize,
    pub health: SystemHealth,
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_id: Uuid,
    /// Where the snapshot came from (repository URL or directory).
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub overall_risk: RiskLevel,
    pub overall_confidence: f64,
    pub deferred: bool,
    pub deferral_reason: Option<String>,
    pub recommendation: Recommendation,
    pub conflicts: Vec<Conflict>,
    pub agent_outputs: Vec<AgentOutput>,
    pub rationale: String,
    pub reliability: ReliabilitySummary,
    pub summary: FeatureSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_violations: Vec<RoutingViolation>,
}

impl FinalReport {
    pub fn agent_summaries(&self) -> Vec<AgentSummary> {
        self.agent_outputs.iter().map(AgentOutput::to_summary).collect()
    }

    pub fn total_findings(&self) -> usize {
        self.agent_outputs.iter().map(|o| o.findings.len()).sum()
    }
}
