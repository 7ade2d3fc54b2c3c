//! Markdown and JSON report generation.
//!
//! Renders a [`FinalReport`] for humans (Markdown) or machines (JSON). The
//! verdict, reliability signals and every agent's output are included so a
//! reviewer can see why a run was or was not deferred.

use crate::models::{
    AgentOutput, Conflict, FeatureSummary, FinalReport, Finding, ReliabilitySummary,
    RoutingViolation, Severity,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &FinalReport) -> String {
    let mut output = String::new();

    output.push_str("# Quorum Review Report\n\n");
    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_verdict_section(report));
    output.push_str(&generate_reliability_section(&report.reliability));
    output.push_str(&generate_agents_section(&report.agent_outputs));
    output.push_str(&generate_conflicts_section(&report.conflicts));
    output.push_str(&generate_findings_section(&report.agent_outputs));
    output.push_str(&generate_codebase_section(&report.summary));
    output.push_str(&generate_violations_section(&report.routing_violations));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(report: &FinalReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Source:** {}\n", report.source));
    section.push_str(&format!("- **Run ID:** `{}`\n", report.run_id));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Files Analyzed:** {}\n",
        report.summary.file_count
    ));
    section.push_str(&format!("- **Total Findings:** {}\n", report.total_findings()));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n\n",
        report.duration_seconds
    ));

    section
}

fn generate_verdict_section(report: &FinalReport) -> String {
    let mut section = String::new();

    section.push_str("## Verdict\n\n");
    if report.deferred {
        section.push_str("> ⚠️ **Deferred to human review.**");
        if let Some(ref reason) = report.deferral_reason {
            section.push_str(&format!(" {}", reason));
        }
        section.push_str("\n\n");
    }

    section.push_str("| Risk | Confidence | Tier | Recommendation |\n");
    section.push_str("|:---:|:---:|:---:|:---|\n");
    section.push_str(&format!(
        "| {} {} | {:.2} | {} | {} |\n\n",
        report.overall_risk.emoji(),
        report.overall_risk,
        report.overall_confidence,
        report.reliability.tier,
        report.recommendation
    ));

    if !report.rationale.is_empty() {
        section.push_str("### Rationale\n\n");
        section.push_str(&report.rationale);
        section.push_str("\n\n");
    }

    section
}

fn generate_reliability_section(reliability: &ReliabilitySummary) -> String {
    let mut section = String::new();

    section.push_str("## Reliability\n\n");
    section.push_str(&format!(
        "- **Agents:** {} of {} succeeded ({:?})\n",
        reliability.health.successful_agents,
        reliability.health.total_agents,
        reliability.health.status
    ));
    section.push_str(&format!(
        "- **Disagreement:** {}\n",
        yes_no(reliability.disagreement)
    ));
    section.push_str(&format!(
        "- **Safe to automate:** {}\n\n",
        yes_no(reliability.safe_to_automate)
    ));

    section
}

fn generate_agents_section(outputs: &[AgentOutput]) -> String {
    let mut section = String::new();

    section.push_str("## Agents\n\n");
    section.push_str("| Agent | Status | Risk | Confidence | Findings | Summary |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---|\n");

    for output in outputs {
        let status = if output.success { "✅" } else { "❌" };
        let summary = match (&output.error, output.summary.is_empty()) {
            (Some(err), _) => format!("*{}*", escape_cell(err)),
            (None, false) => escape_cell(&output.summary),
            (None, true) => String::new(),
        };
        section.push_str(&format!(
            "| {} | {} | {} {} | {:.2} | {} | {} |\n",
            output.agent,
            status,
            output.risk.emoji(),
            output.risk,
            output.confidence,
            output.findings.len(),
            summary
        ));
    }
    section.push('\n');

    section
}

fn generate_conflicts_section(conflicts: &[Conflict]) -> String {
    if conflicts.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Conflicts\n\n");
    for conflict in conflicts {
        section.push_str(&format!(
            "- **{} vs {}** (Δ{}): {}\n",
            conflict.first, conflict.second, conflict.rank_delta, conflict.description
        ));
    }
    section.push('\n');

    section
}

fn generate_findings_section(outputs: &[AgentOutput]) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");

    let reporting: Vec<&AgentOutput> = outputs.iter().filter(|o| !o.findings.is_empty()).collect();
    if reporting.is_empty() {
        section.push_str("No agent reported findings.\n\n");
        return section;
    }

    for output in reporting {
        section.push_str(&format!("### {}\n\n", output.agent));

        // Most severe first, then by location
        let mut findings = output.findings.clone();
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.location.cmp(&b.location))
        });

        for finding in &findings {
            section.push_str(&generate_finding_block(finding));
        }
    }

    section
}

fn generate_finding_block(finding: &Finding) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### {} {}\n\n",
        severity_badge(finding.severity),
        finding.category
    ));
    if let Some(ref location) = finding.location {
        block.push_str(&format!("**Location:** `{}`\n\n", location));
    }
    if !finding.description.is_empty() {
        block.push_str(&format!("**Description:** {}\n\n", finding.description));
    }
    if let Some(ref remediation) = finding.remediation {
        block.push_str(&format!("> 💡 **Remediation:** {}\n\n", remediation));
    }
    block.push_str("---\n\n");

    block
}

fn generate_codebase_section(summary: &FeatureSummary) -> String {
    let mut section = String::new();

    section.push_str("## Codebase Summary\n\n");
    section.push_str("| Files | Lines | Functions | Classes | Max Nesting |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        summary.file_count,
        summary.total_lines,
        summary.function_count,
        summary.class_count,
        summary.max_nesting_depth
    ));

    if !summary.languages.is_empty() {
        let languages: Vec<&str> = summary.languages.iter().map(String::as_str).collect();
        section.push_str(&format!("**Languages:** {}\n\n", languages.join(", ")));
    }

    if !summary.long_files.is_empty() {
        section.push_str("### Long Files\n\n");
        section.push_str("| File | Lines |\n");
        section.push_str("|:---|:---:|\n");
        for long in &summary.long_files {
            section.push_str(&format!("| `{}` | {} |\n", long.file, long.lines));
        }
        section.push('\n');
    }

    section
}

fn generate_violations_section(violations: &[RoutingViolation]) -> String {
    if violations.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Routing Violations\n\n");
    section.push_str("These snippets were withheld from the agents listed below.\n\n");
    for violation in violations {
        section.push_str(&format!("- {}\n", violation));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by Quorum. Recommendations are advisory and never applied automatically.*\n"
        .to_string()
}

fn severity_badge(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴 **CRITICAL**",
        Severity::High => "🟠 **HIGH**",
        Severity::Medium => "🟡 **MEDIUM**",
        Severity::Low => "🟢 **LOW**",
        Severity::Info => "⚪ **INFO**",
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &FinalReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render `content` to `path`.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
