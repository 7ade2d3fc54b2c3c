//! Offline pattern-matching backend.
//!
//! Reads the snippet blocks out of an agent prompt, applies a small rule
//! table for the reviewer role named in the prompt, and answers in the same
//! JSON shape a model is asked to produce. Selected explicitly through
//! configuration; never substituted for a failing model.

use super::{BackendError, ReasoningBackend};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

/// Prompt line naming the reviewer role.
pub const ROLE_MARKER: &str = "Reviewer role:";

/// Prompt line opening a snippet block: `### SNIPPET n: file:start-end`.
pub const SNIPPET_MARKER: &str = "### SNIPPET";

struct Rule {
    category: &'static str,
    severity: &'static str,
    regex: Regex,
    description: &'static str,
    remediation: &'static str,
}

impl Rule {
    fn new(
        category: &'static str,
        severity: &'static str,
        pattern: &str,
        description: &'static str,
        remediation: &'static str,
    ) -> Self {
        Self {
            category,
            severity,
            regex: Regex::new(pattern).expect("static heuristic rule"),
            description,
            remediation,
        }
    }
}

pub struct HeuristicBackend {
    security_rules: Vec<Rule>,
    logic_rules: Vec<Rule>,
    header: Regex,
    loop_break: Regex,
}

impl Default for HeuristicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicBackend {
    pub fn new() -> Self {
        let security_rules = vec![
            Rule::new(
                "sql_injection",
                "critical",
                r#"(?i)(\b(select|insert|update|delete)\b.*(\+|format|%s|\$\{))|(f["'][^"']*\b(select|insert|update|delete)\b)"#,
                "SQL statement assembled from string concatenation or formatting",
                "Use parameterized queries",
            ),
            Rule::new(
                "code_execution",
                "critical",
                r"(?i)(\b(eval|exec)\s*\()|(\bos\.system\s*\()|(shell\s*=\s*true)",
                "Dynamic code or shell execution",
                "Avoid eval/exec and shell=True; use explicit argument lists",
            ),
            Rule::new(
                "insecure_deserialization",
                "high",
                r"(?i)(\b(pickle|cpickle|marshal)\.loads?\b)|(\byaml\.load\s*\()",
                "Deserialization of untrusted data",
                "Use a safe format such as JSON or yaml.safe_load",
            ),
            Rule::new(
                "hardcoded_secret",
                "high",
                r#"(?i)\b(password|passwd|secret|api_?key|token)\b\s*[:=]\s*["'][^"']+["']"#,
                "Credential stored in source code",
                "Load secrets from the environment or a secret store",
            ),
            Rule::new(
                "path_traversal",
                "medium",
                r"(?i)\bopen\s*\(.*\+",
                "File path built from concatenated input",
                "Normalize and validate paths against an allowed root",
            ),
            Rule::new(
                "weak_crypto",
                "medium",
                r"(?i)\b(md5|sha1|rc4)\b",
                "Weak cryptographic primitive",
                "Use SHA-256 or a dedicated password hash such as bcrypt or argon2",
            ),
        ];

        let logic_rules = vec![
            Rule::new(
                "infinite_loop",
                "high",
                r"(?i)(\bwhile\s*\(?\s*true\s*\)?\s*[:{])|(^\s*loop\s*\{)",
                "Unbounded loop with no visible exit",
                "Add an explicit exit condition or break",
            ),
            Rule::new(
                "off_by_one",
                "medium",
                r"(?i)(<=\s*len\s*\()|(range\s*\(\s*len\s*\([^)]*\)\s*\+\s*1\s*\))|(<=\s*\w+\.len\(\))",
                "Loop bound may run one past the end",
                "Use an exclusive upper bound",
            ),
            Rule::new(
                "swallowed_exception",
                "low",
                r"(?i)(^\s*except\s*:)|(except\s+\w+\s*:\s*pass)",
                "Exception caught and discarded",
                "Handle or log the error",
            ),
        ];

        Self {
            security_rules,
            logic_rules,
            header: Regex::new(r"^### SNIPPET \d+: (.+):(\d+)(?:-(\d+))?")
                .expect("static header pattern"),
            loop_break: Regex::new(r"(?i)\b(break|return)\b").expect("static break pattern"),
        }
    }

    fn analyze_prompt(&self, prompt: &str) -> Value {
        let role = prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix(ROLE_MARKER))
            .map(|r| r.trim().to_lowercase())
            .unwrap_or_default();

        let rules = match role.as_str() {
            "security" => &self.security_rules,
            "logic" => &self.logic_rules,
            _ => {
                return json!({
                    "summary": format!("No heuristic rules for reviewer role '{}'", role),
                    "confidence": 0.5,
                    "findings": [],
                })
            }
        };

        let mut findings = Vec::new();
        for block in self.snippet_blocks(prompt) {
            let has_exit = block.lines.iter().any(|(_, l)| self.loop_break.is_match(l));
            for (line_no, line) in &block.lines {
                for rule in rules {
                    if !rule.regex.is_match(line) {
                        continue;
                    }
                    if rule.category == "infinite_loop" && has_exit {
                        continue;
                    }
                    findings.push(json!({
                        "category": rule.category,
                        "severity": rule.severity,
                        "description": rule.description,
                        "file": block.file,
                        "line": line_no,
                        "remediation": rule.remediation,
                    }));
                }
            }
        }

        let summary = if findings.is_empty() {
            format!("No {} issues matched in the provided snippets", role)
        } else {
            format!("{} {} issue(s) matched by pattern", findings.len(), role)
        };

        json!({
            "summary": summary,
            "confidence": if findings.is_empty() { 0.7 } else { 0.8 },
            "findings": findings,
        })
    }

    fn snippet_blocks<'a>(&self, prompt: &'a str) -> Vec<SnippetBlock<'a>> {
        let mut blocks: Vec<SnippetBlock<'a>> = Vec::new();
        let mut in_code = false;
        let mut next_line = 0;

        for line in prompt.lines() {
            if let Some(caps) = self.header.captures(line) {
                next_line = caps[2].parse().unwrap_or(1);
                blocks.push(SnippetBlock {
                    file: caps[1].to_string(),
                    lines: Vec::new(),
                });
                in_code = false;
                continue;
            }
            if line.trim_start().starts_with("```") {
                in_code = !in_code;
                continue;
            }
            if in_code {
                if let Some(block) = blocks.last_mut() {
                    block.lines.push((next_line, line));
                    next_line += 1;
                }
            }
        }

        blocks
    }
}

struct SnippetBlock<'a> {
    file: String,
    lines: Vec<(usize, &'a str)>,
}

#[async_trait]
impl ReasoningBackend for HeuristicBackend {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, BackendError> {
        serde_json::to_string(&self.analyze_prompt(prompt))
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}
