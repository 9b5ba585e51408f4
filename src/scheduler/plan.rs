//! Static execution-plan previews.
//!
//! The scheduler always runs ready-set phases computed from the live
//! blackboard. A preview shows the shape the registry's dependency graph
//! gives those phases, for logs and tooling.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::knowledge::{Registry, SourceRole};

/// How phases are grouped in a preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One source per phase, dependency order then priority.
    Sequential,
    /// One phase per dependency level.
    Parallel,
    /// Same grouping as `Parallel`.
    #[default]
    Hybrid,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Sequential => "sequential",
            Strategy::Parallel => "parallel",
            Strategy::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedPhase {
    pub index: usize,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub phases: Vec<PlannedPhase>,
    /// Fallback-only sources, which never get a phase of their own.
    pub fallbacks: Vec<String>,
}

impl ExecutionPlan {
    pub fn preview(registry: &Registry, strategy: Strategy) -> Self {
        let is_fallback = |name: &str| {
            registry
                .get(name)
                .map_or(false, |s| s.descriptor().role == SourceRole::Fallback)
        };

        let levels: Vec<Vec<String>> = registry
            .graph()
            .levels()
            .iter()
            .map(|level| level.iter().filter(|n| !is_fallback(n.as_str())).cloned().collect::<Vec<_>>())
            .filter(|level| !level.is_empty())
            .collect();

        let groups: Vec<Vec<String>> = match strategy {
            Strategy::Sequential => levels.into_iter().flatten().map(|name| vec![name]).collect(),
            Strategy::Parallel | Strategy::Hybrid => levels,
        };

        let phases = groups
            .into_iter()
            .enumerate()
            .map(|(i, sources)| PlannedPhase { index: i + 1, sources })
            .collect();

        let mut fallbacks: Vec<String> = registry
            .sources()
            .iter()
            .filter(|s| s.descriptor().role == SourceRole::Fallback)
            .map(|s| s.name().to_string())
            .collect();
        fallbacks.sort();

        Self {
            strategy,
            phases,
            fallbacks,
        }
    }

    pub fn source_count(&self) -> usize {
        self.phases.iter().map(|p| p.sources.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing;

    #[test]
    fn test_hybrid_groups_by_level() {
        let registry = testing::registry(&EngineConfig::default());
        let plan = ExecutionPlan::preview(&registry, Strategy::default());
        assert_eq!(plan.strategy, Strategy::Hybrid);
        assert_eq!(plan.phases[0].sources, vec!["theme_scorer", "progress_notifier"]);
        assert!(plan.phases[1].sources.contains(&"passage_retriever".to_string()));
        assert!(plan.phases[1].sources.contains(&"theme_check".to_string()));
        assert_eq!(plan.fallbacks, vec!["catalog_excerpts", "keyword_scorer"]);
        assert_eq!(plan.source_count(), 6);
    }

    #[test]
    fn test_sequential_runs_one_at_a_time() {
        let registry = testing::registry(&EngineConfig::default());
        let plan = ExecutionPlan::preview(&registry, Strategy::Sequential);
        assert_eq!(plan.phases.len(), 6);
        assert!(plan.phases.iter().all(|p| p.sources.len() == 1));
        assert_eq!(plan.phases[0].sources, vec!["theme_scorer"]);
        assert_eq!(plan.phases[0].index, 1);
    }
}
