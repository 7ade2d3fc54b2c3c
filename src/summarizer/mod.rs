//! Feature summarizer.
//!
//! A deterministic pass over a [`CodeSnapshot`] producing the structural
//! [`FeatureSummary`] and the tagged snippet candidates the routing policy
//! chooses from. No I/O, no external calls.

use crate::config::QualityConfig;
use crate::models::{
    CodeSnapshot, CodeSnippet, FeatureSummary, LongFile, NestingLocation, SnippetTag,
    SourceLocation,
};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// Upper bound on recorded high-nesting locations.
pub const MAX_HIGH_NESTING: usize = 50;

/// Lines searched upwards for an enclosing function or class.
const CONTEXT_LOOKBACK: usize = 20;

/// Spaces per nesting level.
const INDENT_WIDTH: usize = 4;

/// Logic snippets shallower than this are skipped unless they are infinite loops.
const MIN_LOGIC_NESTING: usize = 2;

/// Logic snippets at or beyond this depth get the `nesting` tag.
const NESTING_TAG_DEPTH: usize = 3;

/// Output of one summarizer pass.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSummary {
    pub features: FeatureSummary,
    pub candidates: Vec<CodeSnippet>,
}

/// A line pattern that marks a snippet candidate.
struct SnippetPattern {
    name: &'static str,
    regex: Regex,
    tag: SnippetTag,
    priority: f64,
    /// Kept regardless of nesting depth.
    always_keep: bool,
}

impl SnippetPattern {
    fn new(name: &'static str, pattern: &str, tag: SnippetTag, priority: f64) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("static snippet pattern"),
            tag,
            priority,
            always_keep: false,
        }
    }

    fn always_keep(mut self) -> Self {
        self.always_keep = true;
        self
    }
}

/// Extracts structural metrics and tagged snippet candidates.
pub struct Summarizer {
    security_patterns: Vec<SnippetPattern>,
    logic_patterns: Vec<SnippetPattern>,
    function_def: Regex,
    class_def: Regex,
    long_file_lines: usize,
    high_nesting_depth: usize,
    /// Character budget for one extracted window.
    window_chars: usize,
}

impl Summarizer {
    pub fn new(quality: &QualityConfig, window_chars: usize) -> Self {
        let security_patterns = vec![
            SnippetPattern::new(
                "sql_injection",
                r#"(?i)(\b(select|insert|update|delete)\b.*(\+|format|%s|\$\{))|(f["'][^"']*\b(select|insert|update|delete)\b)"#,
                SnippetTag::Sql,
                1.0,
            ),
            SnippetPattern::new(
                "code_execution",
                r"(?i)(\b(eval|exec)\s*\()|(\bos\.system\s*\()|(subprocess\.\w+\(.*shell\s*=\s*true)",
                SnippetTag::Exec,
                0.9,
            ),
            SnippetPattern::new(
                "insecure_deserialization",
                r"(?i)(\b(pickle|cpickle|marshal)\.loads?\b)|(\byaml\.load\s*\()",
                SnippetTag::Deserialize,
                0.85,
            ),
            SnippetPattern::new(
                "path_traversal",
                r"(?i)\bopen\s*\(.*\+",
                SnippetTag::FileAccess,
                0.8,
            ),
            SnippetPattern::new(
                "credential_handling",
                r"(?i)\b(password|passwd|secret|api_?key|token)\b\s*[:=]",
                SnippetTag::Auth,
                0.75,
            ),
            SnippetPattern::new(
                "weak_crypto",
                r"(?i)(\b(md5|sha1|rc4)\b)|(\bhashlib\.)|(\bcipher\s*\()",
                SnippetTag::Crypto,
                0.7,
            ),
        ];

        let logic_patterns = vec![
            SnippetPattern::new(
                "infinite_loop_risk",
                r"(?i)(\bwhile\s*\(?\s*true\s*\)?\s*[:{])|(^\s*loop\s*\{)",
                SnippetTag::Loop,
                1.0,
            )
            .always_keep(),
            SnippetPattern::new(
                "complex_loop",
                r"(?i)(\bfor\s+\w+\s+in\b)|(\bfor\s*\()",
                SnippetTag::Loop,
                0.6,
            ),
            SnippetPattern::new(
                "nested_conditional",
                r"(?i)\b(if|elif)\b.*[:{]\s*$",
                SnippetTag::Conditional,
                0.5,
            ),
        ];

        Self {
            security_patterns,
            logic_patterns,
            function_def: Regex::new(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:async\s+)?(?:def|fn|function|func)\s+(\w+)",
            )
            .expect("static function pattern"),
            class_def: Regex::new(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:abstract\s+)?(?:class|struct|interface)\s+(\w+)",
            )
            .expect("static class pattern"),
            long_file_lines: quality.long_file_lines,
            high_nesting_depth: quality.high_nesting_depth,
            window_chars: window_chars.max(1),
        }
    }

    /// Summarize a snapshot. An empty snapshot yields all-zero metrics and
    /// no candidates.
    pub fn summarize(&self, snapshot: &CodeSnapshot) -> SnapshotSummary {
        let mut summary = SnapshotSummary::default();
        let mut total_size = 0usize;

        for (path, content) in snapshot.iter() {
            let lines: Vec<&str> = content.lines().collect();
            total_size += content.len();
            self.measure_file(path, &lines, &mut summary.features);
            self.extract_security(path, &lines, &mut summary.candidates);
            self.extract_logic(path, &lines, &mut summary.candidates);
        }

        let features = &mut summary.features;
        features.file_count = snapshot.len();
        if features.file_count > 0 {
            features.average_file_size = total_size as f64 / features.file_count as f64;
        }

        debug!(
            "Summarized {} files: {} lines, {} candidates",
            features.file_count,
            features.total_lines,
            summary.candidates.len()
        );

        summary
    }

    fn measure_file(&self, path: &str, lines: &[&str], features: &mut FeatureSummary) {
        let mut loc = 0;
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            loc += 1;

            let depth = nesting_of(line);
            features.max_nesting_depth = features.max_nesting_depth.max(depth);
            if depth > self.high_nesting_depth && features.high_nesting.len() < MAX_HIGH_NESTING {
                features.high_nesting.push(NestingLocation {
                    file: path.to_string(),
                    line: idx + 1,
                    depth,
                });
            }

            if self.function_def.is_match(line) {
                features.function_count += 1;
            }
            if self.class_def.is_match(line) {
                features.class_count += 1;
            }
        }

        features.total_lines += loc;
        if loc > self.long_file_lines {
            features.long_files.push(LongFile {
                file: path.to_string(),
                lines: loc,
            });
        }
        features.languages.insert(language_of(path).to_string());
    }

    fn extract_security(&self, path: &str, lines: &[&str], out: &mut Vec<CodeSnippet>) {
        for (idx, line) in lines.iter().enumerate() {
            let matched: Vec<&SnippetPattern> = self
                .security_patterns
                .iter()
                .filter(|p| p.regex.is_match(line))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let tags: BTreeSet<SnippetTag> = matched.iter().map(|p| p.tag).collect();
            let relevance = matched.iter().map(|p| p.priority).fold(0.0, f64::max);
            let snippet = self.build_snippet(path, lines, idx, tags, relevance);

            debug!(
                "Security candidate {} ({}) tags [{}]",
                snippet.location,
                matched.iter().map(|p| p.name).collect::<Vec<_>>().join(", "),
                snippet.tag_list()
            );
            out.push(snippet);
        }
    }

    fn extract_logic(&self, path: &str, lines: &[&str], out: &mut Vec<CodeSnippet>) {
        for (idx, line) in lines.iter().enumerate() {
            let nesting = nesting_of(line);
            let matched: Vec<&SnippetPattern> = self
                .logic_patterns
                .iter()
                .filter(|p| p.regex.is_match(line))
                .filter(|p| p.always_keep || nesting >= MIN_LOGIC_NESTING)
                .collect();
            if matched.is_empty() {
                continue;
            }

            let mut tags: BTreeSet<SnippetTag> = matched.iter().map(|p| p.tag).collect();
            if nesting >= NESTING_TAG_DEPTH {
                tags.insert(SnippetTag::Nesting);
            }
            let priority = matched.iter().map(|p| p.priority).fold(0.0, f64::max);
            let relevance = (priority + nesting as f64 * 0.1).min(1.0);
            let mut snippet = self.build_snippet(path, lines, idx, tags, relevance);

            // A window that pulls in security code is marked as such, so the
            // routing policy keeps it away from the logic role.
            let exposed = self.security_tags_in(&snippet.content);
            if !exposed.is_empty() {
                debug!(
                    "Logic candidate {} exposes security code, adding tags",
                    snippet.location
                );
                snippet.tags.extend(exposed);
            }

            debug!(
                "Logic candidate {} ({} at nesting {}) tags [{}]",
                snippet.location,
                matched.iter().map(|p| p.name).collect::<Vec<_>>().join(", "),
                nesting,
                snippet.tag_list()
            );
            out.push(snippet);
        }
    }

    fn security_tags_in(&self, content: &str) -> BTreeSet<SnippetTag> {
        content
            .lines()
            .flat_map(|line| {
                self.security_patterns
                    .iter()
                    .filter(move |p| p.regex.is_match(line))
                    .map(|p| p.tag)
            })
            .collect()
    }

    fn build_snippet(
        &self,
        path: &str,
        lines: &[&str],
        idx: usize,
        tags: BTreeSet<SnippetTag>,
        relevance: f64,
    ) -> CodeSnippet {
        let (content, start_line, end_line) = bounded_window(lines, idx, self.window_chars);
        CodeSnippet {
            content,
            location: SourceLocation {
                file: path.to_string(),
                start_line,
                end_line,
            },
            tags,
            relevance: relevance.clamp(0.0, 1.0),
            context: self.enclosing_context(lines, idx),
        }
    }

    /// Nearest function or class definition above `idx`.
    fn enclosing_context(&self, lines: &[&str], idx: usize) -> String {
        let floor = idx.saturating_sub(CONTEXT_LOOKBACK);
        for line in lines[floor..=idx].iter().rev() {
            if let Some(caps) = self.function_def.captures(line) {
                return format!("function {}", &caps[1]);
            }
            if let Some(caps) = self.class_def.captures(line) {
                return format!("class {}", &caps[1]);
            }
        }
        "global scope".to_string()
    }
}

/// Grow a window around line `idx` without exceeding `max_chars` characters.
///
/// The matched line is always kept (cut to `max_chars` when it alone is too
/// long). Neighbouring lines are only added whole, following lines first, and
/// expansion in a direction stops at the first line that does not fit.
/// Returns the content and the 1-based inclusive range of the kept lines.
fn bounded_window(lines: &[&str], idx: usize, max_chars: usize) -> (String, usize, usize) {
    let mut content = lines[idx].to_string();
    if let Some((cut, _)) = content.char_indices().nth(max_chars) {
        content.truncate(cut);
        return (content, idx + 1, idx + 1);
    }

    let mut chars = content.chars().count();
    let mut start = idx;
    let mut end = idx + 1;
    let mut grow_down = true;
    let mut grow_up = true;

    while grow_down || grow_up {
        if grow_down {
            match lines.get(end) {
                Some(line) if chars + line.chars().count() + 1 <= max_chars => {
                    content.push('\n');
                    content.push_str(line);
                    chars += line.chars().count() + 1;
                    end += 1;
                }
                _ => grow_down = false,
            }
        }
        if grow_up {
            match start.checked_sub(1).map(|i| lines[i]) {
                Some(line) if chars + line.chars().count() + 1 <= max_chars => {
                    content = format!("{}\n{}", line, content);
                    chars += line.chars().count() + 1;
                    start -= 1;
                }
                _ => grow_up = false,
            }
        }
    }

    (content, start + 1, end)
}

/// Indentation depth of a line, tabs counted as one level.
fn nesting_of(line: &str) -> usize {
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += INDENT_WIDTH,
            _ => break,
        }
    }
    width / INDENT_WIDTH
}

/// Language label from a file extension.
fn language_of(path: &str) -> &str {
    let ext = match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => ext,
        _ => return "unknown",
    };
    match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        other => other,
    }
}
