//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Options left unset fall back to the
//! configuration file, then to built-in defaults.

use crate::config::BackendProvider;
use crate::ingest::Source;
use crate::models::RiskLevel;
use clap::Parser;
use std::path::PathBuf;

/// Quorum - multi-agent code review with confidence-gated verdicts
///
/// Specialized agents review a repository snapshot, each seeing only the
/// code relevant to its role. Disagreements and low confidence are
/// surfaced and the run defers to a human instead of guessing.
///
/// Examples:
///   quorum --repo https://github.com/owner/repo.git
///   quorum --local ./my-project --format json
///   quorum --local ./my-project --backend heuristic --fail-on-defer
///   quorum --local ./my-project --dry-run
///   quorum --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Git repository URL to review
    #[arg(
        short,
        long,
        value_name = "URL",
        required_unless_present_any = ["init_config", "local"],
        conflicts_with = "local"
    )]
    pub repo: Option<String>,

    /// Local directory to review instead of cloning
    #[arg(long, value_name = "DIR")]
    pub local: Option<PathBuf>,

    /// Specific branch to review
    ///
    /// If not specified, uses the default branch
    #[arg(short, long, value_name = "BRANCH", requires = "repo")]
    pub branch: Option<String>,

    /// Reasoning backend for the security and logic agents
    #[arg(long, value_name = "BACKEND", env = "QUORUM_BACKEND")]
    pub backend: Option<BackendProvider>,

    /// Ollama model to use for the generative agents
    #[arg(short, long, env = "QUORUM_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Per-agent timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum snippets handed to each agent
    #[arg(long, value_name = "COUNT")]
    pub max_snippets: Option<usize>,

    /// Confidence below which the run defers to a human
    #[arg(long, value_name = "0.0-1.0")]
    pub min_confidence: Option<f64>,

    /// Maximum number of files to capture
    #[arg(long, value_name = "COUNT")]
    pub max_files: Option<usize>,

    /// File extensions to include (comma-separated)
    ///
    /// Example: --extensions rs,py,js
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Directory or file names to exclude (comma-separated)
    ///
    /// Example: --exclude "vendor,dist"
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Output file path for the report
    ///
    /// Defaults to the `general.output` setting.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .quorum.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 if the overall risk is at or above this level
    ///
    /// Values: low, medium, high, critical
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Exit with code 2 if the run defers to human review
    #[arg(long)]
    pub fail_on_defer: bool,

    /// Review an empty snapshot instead of failing
    #[arg(long)]
    pub allow_empty: bool,

    /// Dry run: capture, summarize and route without running agents
    ///
    /// Shows what each agent would receive and exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .quorum.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Risk threshold for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl FailOnLevel {
    pub fn as_risk(&self) -> RiskLevel {
        match self {
            FailOnLevel::Low => RiskLevel::Low,
            FailOnLevel::Medium => RiskLevel::Medium,
            FailOnLevel::High => RiskLevel::High,
            FailOnLevel::Critical => RiskLevel::Critical,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Where the snapshot comes from. `None` only with --init-config.
    pub fn source(&self) -> Option<Source> {
        if let Some(ref local) = self.local {
            return Some(Source::Local(local.clone()));
        }
        self.repo.as_ref().map(|url| Source::Remote {
            url: url.clone(),
            branch: self.branch.clone(),
        })
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref repo) = self.repo {
            if !repo.starts_with("https://")
                && !repo.starts_with("http://")
                && !repo.starts_with("git@")
                && !repo.starts_with("file://")
            {
                return Err(
                    "Repository URL must start with 'https://', 'http://', 'git@' or 'file://'"
                        .to_string(),
                );
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(min_confidence) = self.min_confidence {
            if !(0.0..=1.0).contains(&min_confidence) {
                return Err("Minimum confidence must be between 0.0 and 1.0".to_string());
            }
        }

        if self.max_snippets == Some(0) {
            return Err("Max snippets must be at least 1".to_string());
        }

        if self.max_files == Some(0) {
            return Err("Max files must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate local directory if provided
        if let Some(ref local_path) = self.local {
            if !local_path.exists() {
                return Err(format!(
                    "Local directory does not exist: {}",
                    local_path.display()
                ));
            }
            if !local_path.is_dir() {
                return Err(format!(
                    "Local path is not a directory: {}",
                    local_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
