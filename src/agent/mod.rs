//! Agents.
//!
//! Every analyzing role is one variant of [`Agent`] and exposes the same
//! capability: turn a [`CuratedInput`] into an [`AgentOutput`] without ever
//! returning an error. The decision agent sits apart because it consumes the
//! other agents' outputs instead of curated input.

mod decision;
mod deterministic;
mod generative;

pub use decision::{Decision, DecisionAgent};
pub use deterministic::{FeatureAgent, QualityAgent};
pub use generative::GenerativeAgent;

use crate::backend::{ReasoningBackend, RetryPolicy};
use crate::config::Config;
use crate::models::{AgentOutput, AgentRole, CuratedInput};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The closed set of analyzing agents.
pub enum Agent {
    Feature(FeatureAgent),
    Quality(QualityAgent),
    Generative(GenerativeAgent),
}

impl Agent {
    pub fn role(&self) -> AgentRole {
        match self {
            Agent::Feature(_) => AgentRole::Feature,
            Agent::Quality(_) => AgentRole::Quality,
            Agent::Generative(agent) => agent.role(),
        }
    }

    /// Analyze a curated input. Failures come back as a failed output.
    pub async fn analyze(&self, input: &CuratedInput, cancel: &CancellationToken) -> AgentOutput {
        if input.role != self.role() {
            return AgentOutput::failed(
                self.role(),
                format!("received input curated for the {} role", input.role),
            );
        }
        match self {
            Agent::Feature(agent) => agent.analyze(input),
            Agent::Quality(agent) => agent.analyze(input),
            Agent::Generative(agent) => agent.analyze(input, cancel).await,
        }
    }
}

/// Build the analyzing agents in execution order.
pub fn build_agents(config: &Config, backend: Arc<dyn ReasoningBackend>) -> Vec<Agent> {
    let retry = RetryPolicy::from_config(&config.agents);
    AgentRole::ANALYZERS
        .iter()
        .filter_map(|role| match role {
            AgentRole::Feature => Some(Agent::Feature(FeatureAgent)),
            AgentRole::Security => Some(Agent::Generative(GenerativeAgent::new(
                AgentRole::Security,
                backend.clone(),
                retry,
                config.agents.security_default_confidence,
            ))),
            AgentRole::Logic => Some(Agent::Generative(GenerativeAgent::new(
                AgentRole::Logic,
                backend.clone(),
                retry,
                config.agents.logic_default_confidence,
            ))),
            AgentRole::Quality => Some(Agent::Quality(QualityAgent::new(&config.quality))),
            AgentRole::Decision => None,
        })
        .collect()
}
