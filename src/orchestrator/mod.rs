//! Run orchestration.
//!
//! Drives one analysis run through its stages:
//! `INIT → SUMMARIZE → ROUTE → EXECUTE_AGENTS → RESOLVE_CONFLICTS → AGGREGATE → DECIDE → DONE`,
//! with `FAILED` reachable when ingestion fails or the run is cancelled.
//! Agents run concurrently, each under its own timeout; the orchestrator
//! waits for all of them before anything is aggregated.

use crate::agent::{build_agents, Agent, DecisionAgent};
use crate::backend::ReasoningBackend;
use crate::config::Config;
use crate::consensus::{self, ConflictResolver};
use crate::ingest::{self, IngestionError, Source};
use crate::models::{
    AgentOutput, AgentRole, AgentSummary, CodeSnapshot, CuratedInput, FinalReport,
    RoutingViolation,
};
use crate::routing::{PolicyError, RoleTagPolicy, RoutingPolicy};
use crate::summarizer::{SnapshotSummary, Summarizer};
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Run-level failures. Agent failures never show up here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid routing policy: {0}")]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    Summarize,
    Route,
    ExecuteAgents,
    ResolveConflicts,
    Aggregate,
    Decide,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStage::Init => "INIT",
            RunStage::Summarize => "SUMMARIZE",
            RunStage::Route => "ROUTE",
            RunStage::ExecuteAgents => "EXECUTE_AGENTS",
            RunStage::ResolveConflicts => "RESOLVE_CONFLICTS",
            RunStage::Aggregate => "AGGREGATE",
            RunStage::Decide => "DECIDE",
            RunStage::Done => "DONE",
            RunStage::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

impl RunStage {
    fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Init => Some(RunStage::Summarize),
            RunStage::Summarize => Some(RunStage::Route),
            RunStage::Route => Some(RunStage::ExecuteAgents),
            RunStage::ExecuteAgents => Some(RunStage::ResolveConflicts),
            RunStage::ResolveConflicts => Some(RunStage::Aggregate),
            RunStage::Aggregate => Some(RunStage::Decide),
            RunStage::Decide => Some(RunStage::Done),
            RunStage::Done | RunStage::Failed => None,
        }
    }
}

/// Per-run state threaded through every stage.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub source: String,
    stage: RunStage,
    started: Instant,
    pub violations: Vec<RoutingViolation>,
}

impl RunContext {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source: source.into(),
            stage: RunStage::Init,
            started: Instant::now(),
            violations: Vec::new(),
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Move to the next stage. Stages are never skipped.
    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            debug!("Run {}: {} -> {}", self.run_id, self.stage, next);
            self.stage = next;
        }
    }

    fn fail(&mut self, reason: &str) {
        warn!("Run {} failed in {}: {}", self.run_id, self.stage, reason);
        self.stage = RunStage::Failed;
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Curated inputs and routing results for a snapshot, before any agent runs.
#[derive(Debug, Clone)]
pub struct RoutingPlan {
    pub summary: SnapshotSummary,
    pub inputs: Vec<CuratedInput>,
    pub violations: Vec<RoutingViolation>,
}

pub struct Orchestrator {
    config: Config,
    summarizer: Summarizer,
    policy: RoutingPolicy,
    agents: Vec<Agent>,
    conflicts: ConflictResolver,
    decision: DecisionAgent,
    agent_timeout: Duration,
    progress: Option<UnboundedSender<AgentSummary>>,
}

impl Orchestrator {
    pub fn new(config: Config, backend: Arc<dyn ReasoningBackend>) -> Self {
        let agents = build_agents(&config, backend);
        Self::with_agents(config, agents)
    }

    /// Build with an explicit agent set.
    pub fn with_agents(config: Config, agents: Vec<Agent>) -> Self {
        Self {
            summarizer: Summarizer::new(&config.quality, config.routing.max_snippet_chars),
            policy: RoutingPolicy::default(),
            conflicts: ConflictResolver::from_config(&config.reliability),
            decision: DecisionAgent::new(config.reliability.clone()),
            agent_timeout: Duration::from_secs(config.agents.timeout_seconds),
            agents,
            config,
            progress: None,
        }
    }

    /// Replace the routing tables. Tables that break tag exclusivity are
    /// rejected before any run starts.
    pub fn with_routing_tables(
        mut self,
        tables: BTreeMap<AgentRole, RoleTagPolicy>,
    ) -> Result<Self, RunError> {
        self.policy = RoutingPolicy::new(tables)?;
        Ok(self)
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Publish each agent's summary as soon as that agent settles.
    pub fn with_progress(mut self, tx: UnboundedSender<AgentSummary>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Summarize and route a snapshot without running any agent.
    pub fn plan(&self, snapshot: &CodeSnapshot) -> RoutingPlan {
        let summary = self.summarizer.summarize(snapshot);
        let mut violations = Vec::new();
        let inputs = self
            .policy
            .route(
                &summary.candidates,
                &summary.features,
                self.config.routing.limits(),
            )
            .into_iter()
            .map(|input| {
                let (checked, mut found) = self.policy.enforce(input);
                violations.append(&mut found);
                checked
            })
            .collect();

        RoutingPlan {
            summary,
            inputs,
            violations,
        }
    }

    /// Ingest `source` and run the analysis over it.
    pub async fn run_source(
        &self,
        source: &Source,
        allow_empty: bool,
        show_progress: bool,
        cancel: &CancellationToken,
    ) -> Result<FinalReport, RunError> {
        let mut ctx = RunContext::new(source.label());

        let scanner = self.config.scanner.clone();
        let owned = source.clone();
        let capture = tokio::task::spawn_blocking(move || {
            ingest::capture(&owned, &scanner, allow_empty, show_progress)
        });

        let snapshot = tokio::select! {
            _ = cancel.cancelled() => {
                ctx.fail("cancelled during ingestion");
                return Err(RunError::Cancelled);
            }
            joined = capture => match settle_capture(joined) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    ctx.fail(&err.to_string());
                    return Err(RunError::Ingestion(err));
                }
            },
        };

        self.execute(ctx, snapshot, cancel).await
    }

    /// Run the analysis over an already captured snapshot.
    pub async fn run(
        &self,
        snapshot: CodeSnapshot,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<FinalReport, RunError> {
        self.execute(RunContext::new(source), snapshot, cancel).await
    }

    async fn execute(
        &self,
        mut ctx: RunContext,
        snapshot: CodeSnapshot,
        cancel: &CancellationToken,
    ) -> Result<FinalReport, RunError> {
        info!("Starting run {} over {}", ctx.run_id, ctx.source);

        ctx.advance(); // SUMMARIZE
        let summary = self.summarizer.summarize(&snapshot);

        ctx.advance(); // ROUTE
        let inputs = self.policy.route(
            &summary.candidates,
            &summary.features,
            self.config.routing.limits(),
        );

        ctx.advance(); // EXECUTE_AGENTS
        let mut checked_inputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let (checked, mut violations) = self.policy.enforce(input);
            ctx.violations.append(&mut violations);
            checked_inputs.push(checked);
        }

        let outputs = tokio::select! {
            _ = cancel.cancelled() => None,
            outputs = self.execute_agents(&checked_inputs, cancel) => Some(outputs),
        };
        let outputs = match outputs {
            Some(outputs) if !cancel.is_cancelled() => outputs,
            _ => {
                ctx.fail("cancelled while agents were running");
                return Err(RunError::Cancelled);
            }
        };

        ctx.advance(); // RESOLVE_CONFLICTS
        let conflicts = self.conflicts.detect(&outputs);

        ctx.advance(); // AGGREGATE
        let reliability = &self.config.reliability;
        let assessment = consensus::aggregate(&outputs, &conflicts, reliability);

        ctx.advance(); // DECIDE
        let decision = self.decision.decide(&outputs, &conflicts, &assessment);
        let reliability_summary =
            consensus::summarize(&assessment, &conflicts, &outputs, reliability);

        ctx.advance(); // DONE
        info!(
            "Run {} finished: risk {}, confidence {:.2}, deferred {}",
            ctx.run_id, assessment.overall_risk, assessment.overall_confidence, assessment.deferred
        );

        Ok(FinalReport {
            run_id: ctx.run_id,
            source: ctx.source.clone(),
            generated_at: Utc::now(),
            duration_seconds: ctx.elapsed().as_secs_f64(),
            overall_risk: assessment.overall_risk,
            overall_confidence: assessment.overall_confidence,
            deferred: assessment.deferred,
            deferral_reason: assessment.reason.clone(),
            recommendation: decision.recommendation,
            conflicts,
            agent_outputs: outputs,
            rationale: decision.rationale,
            reliability: reliability_summary,
            summary: summary.features,
            routing_violations: ctx.violations,
        })
    }

    /// Run every agent concurrently and wait for all of them.
    async fn execute_agents(
        &self,
        inputs: &[CuratedInput],
        cancel: &CancellationToken,
    ) -> Vec<AgentOutput> {
        let tasks = self.agents.iter().map(|agent| {
            let role = agent.role();
            let input = inputs.iter().find(|i| i.role == role);
            let token = cancel.child_token();
            async move {
                let output = match input {
                    None => AgentOutput::failed(role, "no curated input for this role"),
                    Some(input) => {
                        match tokio::time::timeout(self.agent_timeout, agent.analyze(input, &token))
                            .await
                        {
                            Ok(output) => output,
                            Err(_) => {
                                token.cancel();
                                warn!(
                                    "{} agent timed out after {}s",
                                    role,
                                    self.agent_timeout.as_secs_f64()
                                );
                                AgentOutput::failed(
                                    role,
                                    format!(
                                        "timed out after {}s",
                                        self.agent_timeout.as_secs_f64()
                                    ),
                                )
                            }
                        }
                    }
                };

                if let Some(tx) = &self.progress {
                    let _ = tx.send(output.to_summary());
                }
                output
            }
        });

        join_all(tasks).await
    }
}

/// Flatten the blocking capture task's result. A task that died without
/// returning is an ingestion failure, never a cancellation.
fn settle_capture(
    joined: Result<Result<CodeSnapshot, IngestionError>, JoinError>,
) -> Result<CodeSnapshot, IngestionError> {
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(IngestionError::Aborted(join_err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, HeuristicBackend, ROLE_MARKER};
    use crate::models::{Recommendation, RiskLevel, SnippetTag};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Answers per reviewer role, or hangs for roles listed in `hang`.
    struct RoleScripted {
        security: &'static str,
        logic: &'static str,
        hang: Vec<AgentRole>,
    }

    #[async_trait]
    impl ReasoningBackend for RoleScripted {
        fn name(&self) -> &str {
            "role-scripted"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, BackendError> {
            let role = if prompt.contains(&format!("{} security", ROLE_MARKER)) {
                AgentRole::Security
            } else {
                AgentRole::Logic
            };
            if self.hang.contains(&role) {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            Ok(match role {
                AgentRole::Security => self.security.to_string(),
                _ => self.logic.to_string(),
            })
        }
    }

    fn snapshot() -> CodeSnapshot {
        CodeSnapshot::from_files([
            (
                "app/db.py",
                "def find(uid):\n    q = \"SELECT * FROM users WHERE id=\" + uid\n    return run(q)\n",
            ),
            ("app/worker.py", "def spin():\n    while True:\n        poll()\n"),
        ])
    }

    fn orchestrator(backend: RoleScripted) -> Orchestrator {
        Orchestrator::new(Config::default(), Arc::new(backend))
    }

    #[tokio::test]
    async fn test_disagreeing_agents_defer() {
        let orch = orchestrator(RoleScripted {
            security: r#"{"summary": "SQL injection", "risk": "critical", "confidence": 0.85, "findings": [{"category": "sql_injection", "severity": "critical", "description": "concat"}]}"#,
            logic: r#"{"summary": "loop looks fine", "risk": "low", "confidence": 0.94, "findings": []}"#,
            hang: vec![],
        });
        let report = orch
            .run(snapshot(), "test", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.agent_outputs.len(), 4);
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.deferred);
        assert_eq!(report.recommendation, Recommendation::Defer);
        assert_eq!(report.overall_risk, RiskLevel::Critical);
        assert!(report.routing_violations.is_empty());
        assert!(report.reliability.disagreement);
        assert!(!report.reliability.safe_to_automate);
        assert!((0.0..=1.0).contains(&report.overall_confidence));
    }

    #[tokio::test]
    async fn test_agreeing_agents_proceed() {
        let orch = orchestrator(RoleScripted {
            security: r#"{"summary": "minor", "risk": "low", "confidence": 0.95, "findings": []}"#,
            logic: r#"{"summary": "ok", "risk": "none", "confidence": 0.95, "findings": []}"#,
            hang: vec![],
        });
        let report = orch
            .run(snapshot(), "test", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.conflicts.is_empty());
        assert!(!report.deferred);
        assert_eq!(report.deferral_reason, None);
        assert!(report.overall_risk <= RiskLevel::Low);
        assert_eq!(report.recommendation, Recommendation::Acceptable);
    }

    #[tokio::test]
    async fn test_security_timeout_forces_high_risk_and_deferral() {
        let orch = orchestrator(RoleScripted {
            security: "{}",
            logic: r#"{"risk": "none", "confidence": 1.0, "findings": []}"#,
            hang: vec![AgentRole::Security],
        })
        .with_agent_timeout(Duration::from_millis(100));

        let report = orch
            .run(snapshot(), "test", &CancellationToken::new())
            .await
            .unwrap();

        let security = report
            .agent_outputs
            .iter()
            .find(|o| o.agent == AgentRole::Security)
            .unwrap();
        assert!(!security.success);
        assert_eq!(security.confidence, 0.0);
        assert_eq!(security.risk, RiskLevel::Unknown);
        assert!(report.overall_risk >= RiskLevel::High);
        assert!(report.deferred);
        assert!(report
            .deferral_reason
            .unwrap()
            .contains("Critical agent failed: security"));
        assert_eq!(report.reliability.health.failed_agents, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_yields_no_report() {
        let orch = orchestrator(RoleScripted {
            security: "{}",
            logic: "{}",
            hang: vec![AgentRole::Security, AgentRole::Logic],
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = orch.run(snapshot(), "test", &cancel).await;
        assert!(matches!(result, Err(RunError::Cancelled)));
    }

    #[tokio::test]
    async fn test_progress_is_published_per_agent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orch = Orchestrator::new(Config::default(), Arc::new(HeuristicBackend::new()))
            .with_progress(tx);

        let report = orch
            .run(snapshot(), "test", &CancellationToken::new())
            .await
            .unwrap();
        drop(orch);

        let mut seen = Vec::new();
        while let Some(summary) = rx.recv().await {
            seen.push(summary.agent);
        }
        seen.sort();
        assert_eq!(seen, AgentRole::ANALYZERS.to_vec());
        assert_eq!(report.agent_summaries().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_snapshot_still_reports() {
        let orch = Orchestrator::new(Config::default(), Arc::new(HeuristicBackend::new()));
        let report = orch
            .run(CodeSnapshot::default(), "empty", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summary.total_lines, 0);
        assert!(report.agent_outputs.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn test_ingestion_failure_is_fatal() {
        let orch = Orchestrator::new(Config::default(), Arc::new(HeuristicBackend::new()));
        let source = Source::Local("/no/such/dir/for/quorum".into());
        let result = orch
            .run_source(&source, false, false, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RunError::Ingestion(_))));
    }

    #[tokio::test]
    async fn test_crashed_capture_is_an_ingestion_failure() {
        let joined = tokio::task::spawn_blocking(|| -> Result<CodeSnapshot, IngestionError> {
            panic!("scanner crashed")
        })
        .await;
        let err = settle_capture(joined).unwrap_err();
        assert!(matches!(err, IngestionError::Aborted(_)));

        let run_err = RunError::from(err);
        assert!(matches!(run_err, RunError::Ingestion(IngestionError::Aborted(_))));
        assert!(!matches!(run_err, RunError::Cancelled));
    }

    #[test]
    fn test_plan_routes_without_agents() {
        let orch = Orchestrator::new(Config::default(), Arc::new(HeuristicBackend::new()));
        let plan = orch.plan(&snapshot());
        assert_eq!(plan.inputs.len(), 4);
        assert!(plan.violations.is_empty());

        let security = plan
            .inputs
            .iter()
            .find(|i| i.role == AgentRole::Security)
            .unwrap();
        assert!(!security.snippets.is_empty());
        let logic = plan.inputs.iter().find(|i| i.role == AgentRole::Logic).unwrap();
        assert!(logic
            .snippets
            .iter()
            .all(|s| !s.content.contains("SELECT")));
    }

    #[test]
    fn test_leaky_routing_tables_are_rejected() {
        let orch = Orchestrator::new(Config::default(), Arc::new(HeuristicBackend::new()));
        let mut tables = BTreeMap::new();
        tables.insert(AgentRole::Feature, RoleTagPolicy::metrics_only());
        tables.insert(AgentRole::Quality, RoleTagPolicy::metrics_only());
        tables.insert(AgentRole::Decision, RoleTagPolicy::metrics_only());
        tables.insert(
            AgentRole::Security,
            RoleTagPolicy::new(
                [SnippetTag::Sql, SnippetTag::Loop],
                SnippetTag::ALL
                    .into_iter()
                    .filter(|t| *t != SnippetTag::Sql && *t != SnippetTag::Loop),
            ),
        );
        tables.insert(
            AgentRole::Logic,
            RoleTagPolicy::new(
                [SnippetTag::Loop],
                SnippetTag::ALL.into_iter().filter(|t| *t != SnippetTag::Loop),
            ),
        );

        let result = orch.with_routing_tables(tables);
        assert!(matches!(result, Err(RunError::Policy(_))));
    }

    #[test]
    fn test_stage_order() {
        let mut ctx = RunContext::new("x");
        let mut seen = vec![ctx.stage()];
        while ctx.stage() != RunStage::Done {
            ctx.advance();
            seen.push(ctx.stage());
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(seen[3], RunStage::ExecuteAgents);
        ctx.fail("test");
        assert_eq!(ctx.stage(), RunStage::Failed);
    }
}
