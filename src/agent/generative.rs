//! Backend-driven agents (security, logic).
//!
//! Build a prompt from the curated snippets, call the reasoning backend
//! through the retry wrapper, and parse the JSON reply into findings. Any
//! failure along the way becomes a failed [`AgentOutput`].

use crate::backend::{BackendError, ReasoningBackend, RetryPolicy, ROLE_MARKER, SNIPPET_MARKER};
use crate::models::{
    AgentOutput, AgentRole, CuratedInput, Finding, RiskLevel, Severity, SourceLocation,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SECURITY_SYSTEM_PROMPT: &str = r#"You are a security reviewer. You only see the code excerpts you are given.
Look for injection, unsafe execution, unsafe deserialization, credential handling, weak cryptography and unsafe file access.
Reply with a single JSON object and nothing else."#;

const LOGIC_SYSTEM_PROMPT: &str = r#"You are a logic reviewer. You only see the code excerpts you are given.
Look for infinite loops, contradictory conditions, unreachable code, off-by-one errors and unhandled edge cases.
Do not comment on security. Reply with a single JSON object and nothing else."#;

const REPLY_SCHEMA: &str = r#"{"summary": "one sentence", "risk": "none|low|medium|high|critical", "confidence": 0.0-1.0, "findings": [{"category": "short_label", "severity": "info|low|medium|high|critical", "description": "what is wrong", "file": "path", "line": 42, "remediation": "how to fix"}]}"#;

/// Reply shape requested from the backend. Everything is optional so a
/// partial reply still parses; missing parts fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReviewReply {
    summary: Option<String>,
    risk: Option<String>,
    confidence: Option<f64>,
    findings: Vec<ReplyFinding>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplyFinding {
    category: Option<String>,
    severity: Option<String>,
    description: Option<String>,
    file: Option<String>,
    line: Option<usize>,
    remediation: Option<String>,
}

/// An agent that delegates its judgement to a reasoning backend.
pub struct GenerativeAgent {
    role: AgentRole,
    backend: Arc<dyn ReasoningBackend>,
    retry: RetryPolicy,
    default_confidence: f64,
}

impl GenerativeAgent {
    pub fn new(
        role: AgentRole,
        backend: Arc<dyn ReasoningBackend>,
        retry: RetryPolicy,
        default_confidence: f64,
    ) -> Self {
        Self {
            role,
            backend,
            retry,
            default_confidence,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub async fn analyze(&self, input: &CuratedInput, cancel: &CancellationToken) -> AgentOutput {
        if input.snippets.is_empty() {
            return AgentOutput::succeeded(
                self.role,
                self.default_confidence,
                RiskLevel::None,
                Vec::new(),
                format!("No {}-relevant code was routed for review", self.role),
            );
        }

        let system = match self.role {
            AgentRole::Security => SECURITY_SYSTEM_PROMPT,
            AgentRole::Logic => LOGIC_SYSTEM_PROMPT,
            other => {
                return AgentOutput::failed(other, format!("{} is not a generative role", other))
            }
        };
        let prompt = build_prompt(self.role, input);
        debug!(
            "{} agent sending {} snippets to {}",
            self.role,
            input.snippets.len(),
            self.backend.name()
        );

        let backend = &self.backend;
        let reply = self
            .retry
            .run(cancel, |_| backend.complete(system, &prompt))
            .await;

        match reply {
            Ok(text) => match self.interpret(&text) {
                Ok(output) => output,
                Err(err) => {
                    warn!("{} agent failed: {}", self.role, err);
                    AgentOutput::failed(self.role, err.to_string())
                }
            },
            Err(err) => {
                warn!("{} agent failed: {}", self.role, err);
                AgentOutput::failed(self.role, err.to_string())
            }
        }
    }

    fn interpret(&self, text: &str) -> Result<AgentOutput, BackendError> {
        let reply = parse_reply(text)?;

        let findings: Vec<Finding> = reply.findings.into_iter().map(into_finding).collect();

        let confidence = match reply.confidence {
            Some(c) if c.is_finite() => c,
            _ => self.default_confidence,
        };

        let mut summary = reply.summary.unwrap_or_else(|| {
            format!("{} {} finding(s)", findings.len(), self.role)
        });

        let risk = match reply.risk.as_deref() {
            Some(label) => {
                let (risk, recognised) = RiskLevel::from_reported(label);
                if !recognised {
                    warn!(
                        "{} agent reported unrecognised risk '{}', treating as critical",
                        self.role, label
                    );
                    summary.push_str(&format!(" [unrecognised risk '{}' read as critical]", label));
                }
                risk
            }
            None => derive_risk(self.role, &findings),
        };

        Ok(AgentOutput::succeeded(
            self.role, confidence, risk, findings, summary,
        ))
    }
}

fn build_prompt(role: AgentRole, input: &CuratedInput) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("{} {}\n", ROLE_MARKER, role));
    if let Some(lines) = input.metrics.total_lines {
        prompt.push_str(&format!("Codebase size: {} lines\n", lines));
    }
    if let Some(depth) = input.metrics.max_nesting_depth {
        prompt.push_str(&format!("Maximum nesting depth: {}\n", depth));
    }
    prompt.push_str("\nReview only the excerpts below. Respond with JSON in exactly this shape:\n");
    prompt.push_str(REPLY_SCHEMA);
    prompt.push_str("\n\n");

    for (i, snippet) in input.snippets.iter().enumerate() {
        prompt.push_str(&format!(
            "{} {}: {} (tags: {}) context: {}\n```\n{}\n```\n\n",
            SNIPPET_MARKER,
            i + 1,
            snippet.location,
            snippet.tag_list(),
            snippet.context,
            snippet.content
        ));
    }

    prompt
}

/// Pull the outermost JSON object out of a reply that may carry prose or
/// code fences around it.
fn parse_reply(text: &str) -> Result<ReviewReply, BackendError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => {
            return Err(BackendError::InvalidResponse(
                "reply contains no JSON object".to_string(),
            ))
        }
    };
    serde_json::from_str(body)
        .map_err(|e| BackendError::InvalidResponse(format!("unparseable reply: {}", e)))
}

fn into_finding(raw: ReplyFinding) -> Finding {
    let location = raw.file.map(|file| {
        let line = raw.line.unwrap_or(0);
        SourceLocation {
            file,
            start_line: line,
            end_line: line,
        }
    });

    Finding {
        category: raw.category.unwrap_or_else(|| "general".to_string()),
        severity: raw
            .severity
            .as_deref()
            .map(Severity::from_reported)
            .unwrap_or(Severity::Medium),
        description: raw.description.unwrap_or_default(),
        location,
        remediation: raw.remediation.filter(|r| !r.trim().is_empty()),
    }
}

/// Risk implied by findings when the backend did not state one.
fn derive_risk(role: AgentRole, findings: &[Finding]) -> RiskLevel {
    if findings.is_empty() {
        return RiskLevel::None;
    }

    match role {
        AgentRole::Logic => {
            let text: Vec<String> = findings
                .iter()
                .map(|f| format!("{} {}", f.category, f.description).to_lowercase())
                .collect();
            let mentions = |needles: &[&str]| {
                text.iter()
                    .any(|t| needles.iter().any(|n| t.contains(n)))
            };
            if mentions(&["infinite", "contradict"]) {
                RiskLevel::High
            } else if mentions(&["unreachable", "off_by_one", "off-by-one", "off by one"]) {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            }
        }
        _ => findings
            .iter()
            .map(|f| f.severity.as_risk())
            .max()
            .unwrap_or(RiskLevel::None),
    }
}
