//! Routing policy.
//!
//! The only place that decides what each agent role gets to see. Every role
//! carries an allow-list and a deny-list over the snippet tag vocabulary; a
//! snippet reaches a role only when it has an allowed tag and no denied one.
//! Metric-only roles never receive snippet content.

use crate::models::{
    AgentRole, CodeSnippet, CuratedInput, CuratedMetrics, FeatureSummary, RoutingLimits,
    RoutingViolation, SnippetTag,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, error};

/// Invalid routing tables, detected when the policy is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no routing table for the {0} role")]
    MissingRole(AgentRole),

    #[error("{role} allow and deny lists share tags: {tags:?}")]
    Overlap {
        role: AgentRole,
        tags: Vec<SnippetTag>,
    },

    #[error("{role} tables leave tags unclassified: {tags:?}")]
    NotExhaustive {
        role: AgentRole,
        tags: Vec<SnippetTag>,
    },

    #[error("{role} may receive tags reserved for the {other} role: {tags:?}")]
    NotExclusive {
        role: AgentRole,
        other: AgentRole,
        tags: Vec<SnippetTag>,
    },

    #[error("{0} is a metrics-only role and may not allow any tag")]
    MetricsOnly(AgentRole),
}

/// Allow/deny lists for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTagPolicy {
    pub allow: BTreeSet<SnippetTag>,
    pub deny: BTreeSet<SnippetTag>,
}

impl RoleTagPolicy {
    pub fn new(
        allow: impl IntoIterator<Item = SnippetTag>,
        deny: impl IntoIterator<Item = SnippetTag>,
    ) -> Self {
        Self {
            allow: allow.into_iter().collect(),
            deny: deny.into_iter().collect(),
        }
    }

    /// Deny everything. Used by roles that see metrics only.
    pub fn metrics_only() -> Self {
        Self::new([], SnippetTag::ALL)
    }

    pub fn admits(&self, snippet: &CodeSnippet) -> bool {
        snippet.has_any(&self.allow) && !snippet.has_any(&self.deny)
    }

    fn denied_tags(&self, snippet: &CodeSnippet) -> Vec<SnippetTag> {
        snippet
            .tags
            .iter()
            .filter(|t| self.deny.contains(t))
            .copied()
            .collect()
    }
}

const SECURITY_TAGS: [SnippetTag; 6] = [
    SnippetTag::Sql,
    SnippetTag::Auth,
    SnippetTag::Crypto,
    SnippetTag::Exec,
    SnippetTag::Deserialize,
    SnippetTag::FileAccess,
];

const LOGIC_TAGS: [SnippetTag; 3] = [SnippetTag::Loop, SnippetTag::Conditional, SnippetTag::Nesting];

/// Tag routing tables for every role.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    tables: BTreeMap<AgentRole, RoleTagPolicy>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            AgentRole::Security,
            RoleTagPolicy::new(SECURITY_TAGS, LOGIC_TAGS),
        );
        tables.insert(AgentRole::Logic, RoleTagPolicy::new(LOGIC_TAGS, SECURITY_TAGS));
        tables.insert(AgentRole::Feature, RoleTagPolicy::metrics_only());
        tables.insert(AgentRole::Quality, RoleTagPolicy::metrics_only());
        tables.insert(AgentRole::Decision, RoleTagPolicy::metrics_only());
        Self { tables }
    }
}

impl RoutingPolicy {
    /// Build a policy from explicit tables, validating them.
    pub fn new(tables: BTreeMap<AgentRole, RoleTagPolicy>) -> Result<Self, PolicyError> {
        let policy = Self { tables };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        for role in [
            AgentRole::Feature,
            AgentRole::Security,
            AgentRole::Logic,
            AgentRole::Quality,
            AgentRole::Decision,
        ] {
            let table = self.table(role)?;

            let overlap: Vec<SnippetTag> = table.allow.intersection(&table.deny).copied().collect();
            if !overlap.is_empty() {
                return Err(PolicyError::Overlap { role, tags: overlap });
            }

            let missing: Vec<SnippetTag> = SnippetTag::ALL
                .iter()
                .filter(|t| !table.allow.contains(t) && !table.deny.contains(t))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(PolicyError::NotExhaustive { role, tags: missing });
            }

            if !role.sees_code() && !table.allow.is_empty() {
                return Err(PolicyError::MetricsOnly(role));
            }
        }

        // Security and logic must each deny everything the other allows.
        for (role, other) in [
            (AgentRole::Security, AgentRole::Logic),
            (AgentRole::Logic, AgentRole::Security),
        ] {
            let mine = self.table(role)?;
            let theirs = self.table(other)?;
            let leaked: Vec<SnippetTag> = theirs
                .allow
                .iter()
                .filter(|t| !mine.deny.contains(t))
                .copied()
                .collect();
            if !leaked.is_empty() {
                return Err(PolicyError::NotExclusive {
                    role,
                    other,
                    tags: leaked,
                });
            }
        }

        Ok(())
    }

    pub fn table(&self, role: AgentRole) -> Result<&RoleTagPolicy, PolicyError> {
        self.tables.get(&role).ok_or(PolicyError::MissingRole(role))
    }

    /// Curate the input for one role.
    ///
    /// Pure function of its arguments: eligible snippets are ranked by
    /// relevance (then file, then line), cut to the quota and truncated to
    /// the per-snippet character limit.
    pub fn select(
        &self,
        role: AgentRole,
        candidates: &[CodeSnippet],
        features: &FeatureSummary,
        limits: RoutingLimits,
    ) -> CuratedInput {
        let snippets = match self.tables.get(&role) {
            Some(table) if role.sees_code() => {
                let mut eligible: Vec<&CodeSnippet> =
                    candidates.iter().filter(|s| table.admits(s)).collect();
                eligible.sort_by(|a, b| rank_order(a, b));
                eligible
                    .into_iter()
                    .take(limits.max_snippets)
                    .map(|s| {
                        debug!(
                            "Routed {} to {} agent, tags [{}], relevance {:.2}",
                            s.location,
                            role,
                            s.tag_list(),
                            s.relevance
                        );
                        s.truncated(limits.max_snippet_chars)
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        debug!("{} agent receives {} snippets", role, snippets.len());

        CuratedInput {
            role,
            snippets,
            metrics: project_metrics(role, features),
            limits,
        }
    }

    /// Curate inputs for every analyzing role.
    pub fn route(
        &self,
        candidates: &[CodeSnippet],
        features: &FeatureSummary,
        limits: RoutingLimits,
    ) -> Vec<CuratedInput> {
        AgentRole::ANALYZERS
            .iter()
            .map(|role| self.select(*role, candidates, features, limits))
            .collect()
    }

    /// Boundary check run right before an input is handed to its agent.
    ///
    /// Any snippet carrying a tag the role denies, or any snippet at all for a
    /// metrics-only role, is logged, recorded and dropped. Quota overruns are
    /// cut back to the limits.
    pub fn enforce(&self, mut input: CuratedInput) -> (CuratedInput, Vec<RoutingViolation>) {
        let role = input.role;
        let mut violations = Vec::new();

        let table = self.tables.get(&role);
        input.snippets.retain(|snippet| {
            let offending = match table {
                Some(table) if role.sees_code() => table.denied_tags(snippet),
                _ => snippet.tags.iter().copied().collect(),
            };
            let blocked = !role.sees_code() || table.is_none() || !offending.is_empty();
            if blocked {
                let violation = RoutingViolation {
                    role,
                    location: snippet.location.clone(),
                    offending_tags: offending,
                };
                error!("Routing violation: {}", violation);
                violations.push(violation);
            }
            !blocked
        });

        let limits = input.limits;
        input.snippets.truncate(limits.max_snippets);
        for snippet in input.snippets.iter_mut() {
            *snippet = snippet.truncated(limits.max_snippet_chars);
        }

        (input, violations)
    }
}

fn rank_order(a: &CodeSnippet, b: &CodeSnippet) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| a.location.file.cmp(&b.location.file))
        .then_with(|| a.location.start_line.cmp(&b.location.start_line))
}

/// The deterministic metrics a role is allowed to see.
fn project_metrics(role: AgentRole, features: &FeatureSummary) -> CuratedMetrics {
    match role {
        AgentRole::Feature => CuratedMetrics {
            total_lines: Some(features.total_lines),
            file_count: Some(features.file_count),
            function_count: Some(features.function_count),
            class_count: Some(features.class_count),
            average_file_size: Some(features.average_file_size),
            languages: Some(features.languages.clone()),
            ..Default::default()
        },
        AgentRole::Quality => CuratedMetrics {
            total_lines: Some(features.total_lines),
            file_count: Some(features.file_count),
            function_count: Some(features.function_count),
            class_count: Some(features.class_count),
            max_nesting_depth: Some(features.max_nesting_depth),
            average_file_size: Some(features.average_file_size),
            high_nesting: Some(features.high_nesting.clone()),
            long_files: Some(features.long_files.clone()),
            ..Default::default()
        },
        AgentRole::Logic => CuratedMetrics {
            total_lines: Some(features.total_lines),
            function_count: Some(features.function_count),
            class_count: Some(features.class_count),
            max_nesting_depth: Some(features.max_nesting_depth),
            ..Default::default()
        },
        AgentRole::Security => CuratedMetrics {
            total_lines: Some(features.total_lines),
            ..Default::default()
        },
        AgentRole::Decision => CuratedMetrics::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceLocation;

    fn snippet(file: &str, line: usize, tags: &[SnippetTag], relevance: f64) -> CodeSnippet {
        CodeSnippet {
            content: format!("// {} line {}\n{}", file, line, "x".repeat(800)),
            location: SourceLocation {
                file: file.to_string(),
                start_line: line,
                end_line: line + 2,
            },
            tags: tags.iter().copied().collect(),
            relevance,
            context: "global scope".to_string(),
        }
    }

    fn subset(mask: u32) -> Vec<SnippetTag> {
        SnippetTag::ALL
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, t)| *t)
            .collect()
    }

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RoutingPolicy::default();
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_scenario_security_and_logic_pools_stay_apart() {
        let mut pool = Vec::new();
        for i in 0..10 {
            let tags = if i % 2 == 0 {
                vec![SnippetTag::Sql]
            } else {
                vec![SnippetTag::Auth]
            };
            pool.push(snippet("svc/db.py", i * 10 + 1, &tags, 0.5 + i as f64 * 0.05));
        }
        for i in 0..10 {
            pool.push(snippet("svc/loop.py", i * 10 + 1, &[SnippetTag::Loop], 0.6));
        }

        let policy = RoutingPolicy::default();
        let features = FeatureSummary::default();
        let limits = RoutingLimits::default();
        let security = policy.select(AgentRole::Security, &pool, &features, limits);
        let logic = policy.select(AgentRole::Logic, &pool, &features, limits);

        assert_eq!(security.snippets.len(), 3);
        assert_eq!(logic.snippets.len(), 3);

        let security_allowed: BTreeSet<SnippetTag> =
            [SnippetTag::Sql, SnippetTag::Auth, SnippetTag::Crypto].into();
        let logic_allowed: BTreeSet<SnippetTag> = [SnippetTag::Loop, SnippetTag::Conditional].into();

        let security_tags: BTreeSet<SnippetTag> =
            security.snippets.iter().flat_map(|s| s.tags.iter().copied()).collect();
        let logic_tags: BTreeSet<SnippetTag> =
            logic.snippets.iter().flat_map(|s| s.tags.iter().copied()).collect();

        assert!(security_tags.is_subset(&security_allowed));
        assert!(logic_tags.is_subset(&logic_allowed));
        assert!(security_tags.is_disjoint(&logic_tags));
        for s in security.snippets.iter().chain(logic.snippets.iter()) {
            assert!(s.content.chars().count() <= limits.max_snippet_chars);
        }
    }

    #[test]
    fn test_every_tag_subset_respects_deny_lists_and_quota() {
        // One snippet per subset of the tag vocabulary.
        let pool: Vec<CodeSnippet> = (0..(1u32 << SnippetTag::ALL.len()))
            .map(|mask| {
                let relevance = (mask % 11) as f64 / 10.0;
                snippet(&format!("f{:03}.rs", mask), 1, &subset(mask), relevance)
            })
            .collect();

        let policy = RoutingPolicy::default();
        let features = FeatureSummary::default();

        for max_snippets in [0, 1, 3, 7, 600] {
            for max_chars in [0, 10, 500] {
                let limits = RoutingLimits {
                    max_snippets,
                    max_snippet_chars: max_chars,
                };
                for role in AgentRole::ANALYZERS {
                    let table = policy.table(role).unwrap();
                    let input = policy.select(role, &pool, &features, limits);
                    assert!(input.snippets.len() <= max_snippets);
                    for s in &input.snippets {
                        assert!(s.content.chars().count() <= max_chars);
                        assert!(!s.has_any(&table.deny), "{} got {:?}", role, s.tags);
                        assert!(s.has_any(&table.allow));
                    }
                    if !role.sees_code() {
                        assert!(input.snippets.is_empty());
                    }
                    let (checked, violations) = policy.enforce(input.clone());
                    assert!(violations.is_empty());
                    assert_eq!(checked, input);
                }
            }
        }
    }

    #[test]
    fn test_ranking_breaks_ties_by_location() {
        let pool = vec![
            snippet("b.py", 5, &[SnippetTag::Sql], 0.9),
            snippet("a.py", 9, &[SnippetTag::Sql], 0.9),
            snippet("a.py", 2, &[SnippetTag::Sql], 0.9),
            snippet("z.py", 1, &[SnippetTag::Sql], 1.0),
        ];
        let input = RoutingPolicy::default().select(
            AgentRole::Security,
            &pool,
            &FeatureSummary::default(),
            RoutingLimits::default(),
        );
        let order: Vec<String> = input.snippets.iter().map(|s| s.location.to_string()).collect();
        assert_eq!(order, vec!["z.py:1-3", "a.py:2-4", "a.py:9-11"]);
    }

    #[test]
    fn test_metrics_only_roles_get_no_code() {
        let pool = vec![snippet("a.py", 1, &[SnippetTag::Sql, SnippetTag::Loop], 1.0)];
        let features = FeatureSummary {
            total_lines: 120,
            max_nesting_depth: 5,
            ..Default::default()
        };
        let policy = RoutingPolicy::default();

        let quality = policy.select(AgentRole::Quality, &pool, &features, RoutingLimits::default());
        assert!(quality.snippets.is_empty());
        assert_eq!(quality.metrics.max_nesting_depth, Some(5));

        let feature = policy.select(AgentRole::Feature, &pool, &features, RoutingLimits::default());
        assert!(feature.snippets.is_empty());
        assert_eq!(feature.metrics.total_lines, Some(120));
        assert_eq!(feature.metrics.max_nesting_depth, None);

        let security = policy.select(AgentRole::Security, &pool, &features, RoutingLimits::default());
        assert!(security.snippets.is_empty());
        assert_eq!(security.metrics.languages, None);
    }

    #[test]
    fn test_enforce_drops_misrouted_snippets() {
        let policy = RoutingPolicy::default();
        let input = CuratedInput {
            role: AgentRole::Logic,
            snippets: vec![
                snippet("ok.py", 1, &[SnippetTag::Loop], 0.9),
                snippet("bad.py", 7, &[SnippetTag::Loop, SnippetTag::Sql], 0.8),
            ],
            metrics: CuratedMetrics::default(),
            limits: RoutingLimits::default(),
        };

        let (checked, violations) = policy.enforce(input);
        assert_eq!(checked.snippets.len(), 1);
        assert_eq!(checked.snippets[0].location.file, "ok.py");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].role, AgentRole::Logic);
        assert_eq!(violations[0].offending_tags, vec![SnippetTag::Sql]);
        assert_eq!(violations[0].location.file, "bad.py");
    }

    #[test]
    fn test_enforce_blocks_code_for_metrics_only_role() {
        let policy = RoutingPolicy::default();
        let input = CuratedInput {
            role: AgentRole::Quality,
            snippets: vec![snippet("q.py", 3, &[SnippetTag::Conditional], 0.4)],
            metrics: CuratedMetrics::default(),
            limits: RoutingLimits::default(),
        };
        let (checked, violations) = policy.enforce(input);
        assert!(checked.snippets.is_empty());
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_invalid_tables_are_rejected() {
        let mut tables = RoutingPolicy::default().tables;
        tables.insert(
            AgentRole::Logic,
            RoleTagPolicy::new(
                [SnippetTag::Loop, SnippetTag::Conditional, SnippetTag::Nesting, SnippetTag::Sql],
                [
                    SnippetTag::Auth,
                    SnippetTag::Crypto,
                    SnippetTag::Exec,
                    SnippetTag::Deserialize,
                    SnippetTag::FileAccess,
                ],
            ),
        );
        let err = RoutingPolicy::new(tables).unwrap_err();
        assert!(matches!(err, PolicyError::NotExclusive { .. }));

        let mut tables = RoutingPolicy::default().tables;
        tables.insert(AgentRole::Quality, RoleTagPolicy::new([SnippetTag::Loop], []));
        assert!(matches!(
            RoutingPolicy::new(tables).unwrap_err(),
            PolicyError::Overlap { .. } | PolicyError::NotExhaustive { .. }
        ));

        let mut tables = RoutingPolicy::default().tables;
        tables.remove(&AgentRole::Decision);
        assert_eq!(
            RoutingPolicy::new(tables).unwrap_err(),
            PolicyError::MissingRole(AgentRole::Decision)
        );
    }
}
