//! Conflict detection and the reliability engine.

mod conflict;
mod reliability;

pub use conflict::ConflictResolver;
pub use reliability::{aggregate, conflict_penalty, explain, summarize, system_health, tier, Assessment};
