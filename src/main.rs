//! Quorum - multi-agent code review
//!
//! Captures a repository snapshot, routes curated context to specialized
//! agents, detects disagreement between them and produces a report whose
//! verdict defers to a human whenever confidence is not earned.
//!
//! Exit codes:
//!   0   - Run completed (and no --fail-on / --fail-on-defer threshold hit)
//!   1   - Runtime error (config, clone failure, unreadable directory, etc.)
//!   2   - Overall risk at or above --fail-on, or deferred with --fail-on-defer
//!   130 - Cancelled by the user; no report is written

mod agent;
mod backend;
mod cli;
mod config;
mod consensus;
mod ingest;
mod models;
mod orchestrator;
mod report;
mod routing;
mod summarizer;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use models::{AgentSummary, FinalReport};
use orchestrator::{Orchestrator, RunError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const EXIT_THRESHOLD: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Quorum v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_review(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Review failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .quorum.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to tune routing quotas, reliability thresholds and the backend.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete review workflow. Returns the process exit code.
async fn run_review(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let source = args
        .source()
        .context("either --repo or --local is required")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let backend = backend::from_config(
        &config.backend,
        Duration::from_secs(config.agents.timeout_seconds),
    )?;

    if args.dry_run {
        return handle_dry_run(&args, &config, &source, backend);
    }

    if !args.quiet {
        println!("📥 Capturing snapshot: {}", source.label());
        println!("🤖 Backend: {} ({})", backend.name(), config.backend.model);
        println!(
            "   Agent timeout: {}s, max attempts: {}\n",
            config.agents.timeout_seconds, config.agents.max_attempts
        );
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx, args.quiet));

    let orchestrator = Orchestrator::new(config.clone(), backend).with_progress(tx);
    let result = orchestrator
        .run_source(&source, args.allow_empty, !args.quiet, &cancel)
        .await;

    // Closing the sender lets the printer drain and finish
    drop(orchestrator);
    if let Err(e) = printer.await {
        warn!("Progress printer stopped: {}", e);
    }

    let report = match result {
        Ok(report) => report,
        Err(RunError::Cancelled) => {
            eprintln!("\n⛔ Review cancelled. No report was written.");
            return Ok(EXIT_CANCELLED);
        }
        Err(e) => return Err(e.into()),
    };

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.output));
    let rendered = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    report::write_report(&rendered, &output_path)?;

    if !args.quiet {
        print_verdict(&report);
        println!("\n✅ Review complete! Report saved to: {}", output_path.display());
    }

    Ok(exit_code(&args, &report))
}

/// Cancel the run on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}

/// Print each agent's summary as soon as it settles.
async fn print_progress(mut rx: mpsc::UnboundedReceiver<AgentSummary>, quiet: bool) {
    while let Some(summary) = rx.recv().await {
        if quiet {
            continue;
        }
        if summary.success {
            println!(
                "   ✔ {:<8} risk {} {:<8} confidence {:.2} ({} findings)",
                summary.agent.as_str(),
                summary.risk.emoji(),
                summary.risk,
                summary.confidence,
                summary.finding_count
            );
        } else {
            println!("   ✘ {:<8} failed", summary.agent.as_str());
        }
    }
}

fn print_verdict(report: &FinalReport) {
    println!("\n📊 Review Summary:");
    println!(
        "   Risk: {} {} | Confidence: {:.2} ({})",
        report.overall_risk.emoji(),
        report.overall_risk,
        report.overall_confidence,
        report.reliability.tier
    );
    println!("   Recommendation: {}", report.recommendation);
    if let Some(ref reason) = report.deferral_reason {
        println!("   ⚠️  Deferred: {}", reason);
    }
    if !report.routing_violations.is_empty() {
        println!(
            "   Routing violations blocked: {}",
            report.routing_violations.len()
        );
    }
    println!("   Findings: {}", report.total_findings());
    println!("   Duration: {:.1}s", report.duration_seconds);
}

/// Apply --fail-on and --fail-on-defer.
fn exit_code(args: &Args, report: &FinalReport) -> i32 {
    if let Some(level) = args.fail_on {
        if report.overall_risk >= level.as_risk() {
            eprintln!(
                "\n⛔ Overall risk {} is at or above {:?}. Failing (exit code {}).",
                report.overall_risk, level, EXIT_THRESHOLD
            );
            return EXIT_THRESHOLD;
        }
    }
    if args.fail_on_defer && report.deferred {
        eprintln!(
            "\n⛔ Run deferred to human review. Failing (exit code {}).",
            EXIT_THRESHOLD
        );
        return EXIT_THRESHOLD;
    }
    0
}

/// Handle --dry-run: capture, summarize and route, print what each agent
/// would receive, exit.
fn handle_dry_run(
    args: &Args,
    config: &Config,
    source: &ingest::Source,
    backend: std::sync::Arc<dyn backend::ReasoningBackend>,
) -> Result<i32> {
    println!("\n🔍 Dry run: routing only (no agent runs)...\n");

    let snapshot = ingest::capture(source, &config.scanner, args.allow_empty, !args.quiet)?;
    let orchestrator = Orchestrator::new(config.clone(), backend);
    let plan = orchestrator.plan(&snapshot);

    println!(
        "   Captured {} files, {} lines, {} candidate snippets.\n",
        plan.summary.features.file_count,
        plan.summary.features.total_lines,
        plan.summary.candidates.len()
    );

    for input in &plan.inputs {
        println!("   {} agent:", input.role);
        if input.snippets.is_empty() {
            println!("     (metrics only)");
        }
        for snippet in &input.snippets {
            println!(
                "     📄 {} [{}] relevance {:.2}",
                snippet.location,
                snippet.tag_list(),
                snippet.relevance
            );
        }
    }

    if !plan.violations.is_empty() {
        println!("\n   ⚠️  {} routing violation(s) blocked.", plan.violations.len());
    }

    println!("\n✅ Dry run complete. No agents were run.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeuristicBackend;
    use crate::models::RiskLevel;
    use clap::Parser;
    use std::sync::Arc;

    async fn sample_report() -> FinalReport {
        let snapshot = models::CodeSnapshot::from_files([(
            "db.py",
            "def find(uid):\n    return run(\"SELECT * FROM t WHERE id=\" + uid)\n",
        )]);
        Orchestrator::new(Config::default(), Arc::new(HeuristicBackend::new()))
            .run(snapshot, "test", &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_exit_code_thresholds() {
        let report = sample_report().await;
        assert!(report.overall_risk >= RiskLevel::High);

        let args = Args::try_parse_from(["quorum", "--local", ".", "--fail-on", "medium"]).unwrap();
        assert_eq!(exit_code(&args, &report), EXIT_THRESHOLD);

        let args = Args::try_parse_from(["quorum", "--local", "."]).unwrap();
        assert_eq!(exit_code(&args, &report), 0);
    }

    #[tokio::test]
    async fn test_exit_code_on_deferral() {
        let mut report = sample_report().await;
        report.deferred = true;
        let args = Args::try_parse_from(["quorum", "--local", ".", "--fail-on-defer"]).unwrap();
        assert_eq!(exit_code(&args, &report), EXIT_THRESHOLD);

        report.deferred = false;
        assert_eq!(exit_code(&args, &report), 0);
    }
}
