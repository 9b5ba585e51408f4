//! Closed registry of knowledge sources, validated once at startup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::blackboard::Field;
use crate::config::EngineConfig;
use crate::error::RegistryError;
use crate::gate::Route;

use super::graph::DependencyGraph;
use super::{KnowledgeSource, SourceRole};

/// Fields written by the engine rather than by a source, with the fields
/// each is derived from.
pub const DERIVED_FIELDS: [(Field, &[Field]); 2] = [
    (Field::ROUTE, &[Field::CONFIDENCE_METRICS, Field::SAFETY_SCAN]),
    (Field::QUALITY_REPORT, &Field::TERMINAL),
];

/// The set of knowledge sources available to every request.
pub struct Registry {
    sources: Vec<Arc<dyn KnowledgeSource>>,
    by_name: HashMap<String, usize>,
    producers: HashMap<Field, Vec<usize>>,
    graph: DependencyGraph,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sources", &self.sources.iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .field("levels", &self.graph.levels())
            .finish()
    }
}

impl Registry {
    /// Validate `sources` against `config` and build the dependency graph.
    ///
    /// Fails when names repeat, a source declares no outputs, an input has
    /// no producer, a field has no primary producer, the field flow has a
    /// cycle, or a timeout is not below the global deadline.
    pub fn new(sources: Vec<Arc<dyn KnowledgeSource>>, config: &EngineConfig) -> Result<Self, RegistryError> {
        if sources.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_name = HashMap::new();
        let mut producers: HashMap<Field, Vec<usize>> = HashMap::new();
        for (idx, source) in sources.iter().enumerate() {
            let d = source.descriptor();
            if by_name.insert(d.name.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateSource(d.name.clone()));
            }
            if d.outputs.is_empty() {
                return Err(RegistryError::NoOutputs(d.name.clone()));
            }
            for field in &d.outputs {
                producers.entry(*field).or_default().push(idx);
            }
        }

        let available: HashSet<Field> = Field::SEEDS
            .iter()
            .copied()
            .chain(DERIVED_FIELDS.iter().map(|(f, _)| *f))
            .chain(producers.keys().copied())
            .collect();
        for source in &sources {
            let d = source.descriptor();
            if let Some(field) = d.inputs.iter().find(|f| !available.contains(*f)) {
                return Err(RegistryError::UnproducedInput {
                    source_name: d.name.clone(),
                    field: field.to_string(),
                });
            }
        }

        let mut fields: Vec<&Field> = producers.keys().collect();
        fields.sort();
        for field in fields {
            let has_primary = producers[field]
                .iter()
                .any(|idx| sources[*idx].descriptor().role == SourceRole::Primary);
            if !has_primary {
                return Err(RegistryError::NoPrimaryProducer(field.to_string()));
            }
        }

        let deadline_ms = config.scheduler.deadline_ms;
        for source in &sources {
            let routes = std::iter::once(None).chain(Route::ALL.iter().map(|r| Some(*r)));
            for route in routes {
                let timeout = config
                    .source_timeout(source.name())
                    .unwrap_or_else(|| source.timeout(route, config));
                let timeout_ms = timeout.as_millis() as u64;
                if timeout_ms == 0 || timeout_ms >= deadline_ms {
                    return Err(RegistryError::TimeoutExceedsDeadline {
                        source_name: source.name().to_string(),
                        timeout_ms,
                        deadline_ms,
                    });
                }
            }
        }

        let descriptors: Vec<_> = sources.iter().map(|s| s.descriptor()).collect();
        let graph = DependencyGraph::build(&descriptors, &DERIVED_FIELDS)?;
        log::debug!("registry: {} sources in {} levels", sources.len(), graph.levels().len());

        Ok(Self {
            sources,
            by_name,
            producers,
            graph,
        })
    }

    pub fn sources(&self) -> &[Arc<dyn KnowledgeSource>] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn KnowledgeSource>> {
        self.by_name.get(name).map(|idx| &self.sources[*idx])
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Every source that declares `field` as an output.
    pub fn producers(&self, field: Field) -> Vec<&Arc<dyn KnowledgeSource>> {
        self.producers
            .get(&field)
            .map(|idxs| idxs.iter().map(|idx| &self.sources[*idx]).collect())
            .unwrap_or_default()
    }

    /// Static level of a source, for ordering.
    pub fn level_of(&self, name: &str) -> usize {
        self.graph.level_of(name).unwrap_or(usize::MAX)
    }

    /// Per-call timeout for `source` under `route`, after configuration
    /// overrides.
    pub fn timeout_for(&self, source: &dyn KnowledgeSource, route: Option<Route>, config: &EngineConfig) -> std::time::Duration {
        config
            .source_timeout(source.name())
            .unwrap_or_else(|| source.timeout(route, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, StubSource};

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_standard_registry_is_valid() {
        let registry = testing::registry(&config());
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.level_of("theme_scorer"), 0);
        assert!(registry.level_of("summary_generator") > registry.level_of("passage_retriever"));
        assert_eq!(registry.producers(Field::SUMMARY).len(), 2);
    }

    #[test]
    fn test_duplicate_and_empty() {
        let a: Arc<dyn KnowledgeSource> = Arc::new(StubSource::new("a", &[Field::USER_INPUT], &[Field::new("x")]));
        let b: Arc<dyn KnowledgeSource> = Arc::new(StubSource::new("a", &[Field::USER_INPUT], &[Field::new("y")]));
        assert!(matches!(
            Registry::new(vec![a, b], &config()),
            Err(RegistryError::DuplicateSource(name)) if name == "a"
        ));
        assert!(matches!(Registry::new(vec![], &config()), Err(RegistryError::Empty)));
    }

    #[test]
    fn test_dangling_input_rejected() {
        let a: Arc<dyn KnowledgeSource> = Arc::new(StubSource::new("a", &[Field::new("nowhere")], &[Field::new("x")]));
        let err = Registry::new(vec![a], &config()).unwrap_err();
        assert!(matches!(err, RegistryError::UnproducedInput { .. }));
    }

    #[test]
    fn test_fallback_only_field_rejected() {
        let mut stub = StubSource::new("a", &[Field::USER_INPUT], &[Field::new("x")]);
        stub.descriptor = stub.descriptor.fallback();
        let a: Arc<dyn KnowledgeSource> = Arc::new(stub);
        assert!(matches!(
            Registry::new(vec![a], &config()),
            Err(RegistryError::NoPrimaryProducer(_))
        ));
    }

    #[test]
    fn test_timeout_must_be_below_deadline() {
        let mut stub = StubSource::new("slow", &[Field::USER_INPUT], &[Field::new("x")]);
        stub.descriptor = stub.descriptor.timeout_ms(60_000);
        let a: Arc<dyn KnowledgeSource> = Arc::new(stub);
        assert!(matches!(
            Registry::new(vec![a], &config()),
            Err(RegistryError::TimeoutExceedsDeadline { timeout_ms: 60_000, .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let x = Field::new("x");
        let y = Field::new("y");
        let a: Arc<dyn KnowledgeSource> = Arc::new(StubSource::new("a", &[x], &[y]));
        let b: Arc<dyn KnowledgeSource> = Arc::new(StubSource::new("b", &[y], &[x]));
        assert!(matches!(
            Registry::new(vec![a, b], &config()),
            Err(RegistryError::CircularDependency(_))
        ));
    }
}
