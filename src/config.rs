//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.quorum.toml` files. Every policy threshold used by the reliability
//! engine lives here rather than in code.

use crate::models::{AgentRole, RoutingLimits};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = ".quorum.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Generative backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Per-agent execution limits.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Snippet routing quotas.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Aggregation and deferral policy.
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Quality agent thresholds.
    #[serde(default)]
    pub quality: QualityConfig,

    /// Scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "quorum_report.md".to_string()
}

/// Which reasoning backend the generative agents call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    /// Ollama chat API
    #[default]
    Ollama,
    /// Offline pattern matcher, no network
    Heuristic,
}

/// Generative backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub provider: BackendProvider,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in response.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: BackendProvider::default(),
            model: default_model(),
            url: default_ollama_url(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

/// Agent execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Hard deadline per agent, retries included.
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,

    /// Attempts per backend call, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Confidence used when the backend reports none.
    #[serde(default = "default_security_confidence")]
    pub security_default_confidence: f64,

    #[serde(default = "default_logic_confidence")]
    pub logic_default_confidence: f64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_agent_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            security_default_confidence: default_security_confidence(),
            logic_default_confidence: default_logic_confidence(),
        }
    }
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    8000
}

fn default_security_confidence() -> f64 {
    0.7
}

fn default_logic_confidence() -> f64 {
    0.6
}

/// Snippet routing quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,

    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_snippets: default_max_snippets(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

impl RoutingConfig {
    pub fn limits(&self) -> RoutingLimits {
        RoutingLimits {
            max_snippets: self.max_snippets,
            max_snippet_chars: self.max_snippet_chars,
        }
    }
}

fn default_max_snippets() -> usize {
    3
}

fn default_max_snippet_chars() -> usize {
    500
}

/// Aggregation and deferral policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Below this aggregate confidence the run defers.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Confidence removed per distinct conflict.
    #[serde(default = "default_conflict_penalty")]
    pub conflict_penalty: f64,

    /// Ceiling on the total conflict penalty.
    #[serde(default = "default_max_conflict_penalty")]
    pub max_conflict_penalty: f64,

    /// Minimum rank difference that counts as a conflict.
    #[serde(default = "default_conflict_rank_threshold")]
    pub conflict_rank_threshold: u8,

    /// Roles whose risk assessments are compared pairwise.
    #[serde(default = "default_conflict_roles")]
    pub conflict_roles: Vec<AgentRole>,

    /// Roles whose failure forces at least high risk and deferral.
    #[serde(default = "default_critical_roles")]
    pub critical_roles: Vec<AgentRole>,

    /// Confidence at or above which the tier is HIGH.
    #[serde(default = "default_tier_high")]
    pub tier_high: f64,

    /// Confidence at or above which the tier is MEDIUM.
    #[serde(default = "default_tier_medium")]
    pub tier_medium: f64,

    /// Confidence needed to act on a critical verdict or automate.
    #[serde(default = "default_automation_min_confidence")]
    pub automation_min_confidence: f64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            conflict_penalty: default_conflict_penalty(),
            max_conflict_penalty: default_max_conflict_penalty(),
            conflict_rank_threshold: default_conflict_rank_threshold(),
            conflict_roles: default_conflict_roles(),
            critical_roles: default_critical_roles(),
            tier_high: default_tier_high(),
            tier_medium: default_tier_medium(),
            automation_min_confidence: default_automation_min_confidence(),
        }
    }
}

impl ReliabilityConfig {
    pub fn is_critical(&self, role: AgentRole) -> bool {
        self.critical_roles.contains(&role)
    }
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_conflict_penalty() -> f64 {
    0.20
}

fn default_max_conflict_penalty() -> f64 {
    0.50
}

fn default_conflict_rank_threshold() -> u8 {
    2
}

fn default_conflict_roles() -> Vec<AgentRole> {
    vec![AgentRole::Security, AgentRole::Logic]
}

fn default_critical_roles() -> Vec<AgentRole> {
    vec![AgentRole::Security]
}

fn default_tier_high() -> f64 {
    0.8
}

fn default_tier_medium() -> f64 {
    0.6
}

fn default_automation_min_confidence() -> f64 {
    0.8
}

/// Thresholds for the metric-driven agents and the summarizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Non-blank lines above which a file counts as long.
    #[serde(default = "default_long_file_lines")]
    pub long_file_lines: usize,

    /// Indentation depth above which a line counts as deeply nested.
    #[serde(default = "default_high_nesting_depth")]
    pub high_nesting_depth: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            long_file_lines: default_long_file_lines(),
            high_nesting_depth: default_high_nesting_depth(),
        }
    }
}

fn default_long_file_lines() -> usize {
    200
}

fn default_high_nesting_depth() -> usize {
    4
}

/// File scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Maximum files to capture.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// File extensions to include.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to exclude.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            extensions: default_extensions(),
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_max_files() -> usize {
    500
}

fn default_extensions() -> Vec<String> {
    vec![
        "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb",
        "php", "swift", "kt", "scala",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git",
        "target",
        "node_modules",
        "vendor",
        "dist",
        "build",
        "__pycache__",
        ".venv",
        "venv",
        ".idea",
        ".vscode",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_file_size() -> u64 {
    1024 * 1024 // 1MB
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.backend.model = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.backend.url = url.clone();
        }
        if let Some(provider) = args.backend {
            self.backend.provider = provider;
        }
        if let Some(timeout) = args.timeout {
            self.agents.timeout_seconds = timeout;
        }
        if let Some(max_snippets) = args.max_snippets {
            self.routing.max_snippets = max_snippets;
        }
        if let Some(min_confidence) = args.min_confidence {
            self.reliability.min_confidence = min_confidence;
        }
        if let Some(max_files) = args.max_files {
            self.scanner.max_files = max_files;
        }
        if let Some(ref extensions) = args.extensions {
            self.scanner.extensions = extensions.clone();
        }
        if let Some(ref excludes) = args.exclude {
            self.scanner.excludes = excludes.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
