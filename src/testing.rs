//! Shared test fixtures: a small theme catalog, scripted collaborators and
//! stub knowledge sources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::blackboard::{BlackboardStore, Field, FieldValue};
use crate::config::EngineConfig;
use crate::gate::{ConfidenceMetrics, GateDecision, GateReason, Route};
use crate::knowledge::{
    sources, Contribution, KnowledgeSource, Registry, SourceContext, SourceDescriptor, SourceError,
};
use crate::scheduler;
use crate::services::{
    Budget, Collaborator, GenerationRequest, GenerationResponse, RankingRequest, RankingResponse, ServiceError,
    Services,
};
use crate::themes::{Passage, Theme, ThemeCatalog};

// ---------------------------------------------------------------------------
// Catalog and registry
// ---------------------------------------------------------------------------

fn passage(id: &str, text: &str) -> Passage {
    Passage {
        id: id.to_string(),
        text: text.to_string(),
        source_title: Some("Recovery Stories".to_string()),
    }
}

fn theme(id: &str, label: &str, description: &str, passages: Vec<Passage>) -> Theme {
    Theme {
        id: id.to_string(),
        label: label.to_string(),
        description: description.to_string(),
        passages,
    }
}

/// Four themes with two passages each.
pub fn catalog() -> ThemeCatalog {
    ThemeCatalog::new(vec![
        theme(
            "anxiety",
            "Anxiety",
            "worry panic fear nervous anxious racing thoughts",
            vec![
                passage(
                    "anxiety-1",
                    "Worry narrows the world until every small thing feels dangerous. Naming the fear is the first step.",
                ),
                passage(
                    "anxiety-2",
                    "Panic passes; breathing slowly through it teaches the body that it is safe.",
                ),
            ],
        ),
        theme(
            "grief",
            "Grief",
            "loss mourning death missing someone sadness",
            vec![
                passage("grief-1", "Grief is love with nowhere to go. Let it move at its own pace."),
                passage("grief-2", "Missing someone is a measure of how much they mattered."),
            ],
        ),
        theme(
            "anger",
            "Anger",
            "anger rage resentment furious betrayal",
            vec![
                passage("anger-1", "Anger often guards a wound underneath. Listening to it shows what needs protecting."),
                passage("anger-2", "Resentment loosens once the betrayal has been named out loud."),
            ],
        ),
        theme(
            "shame",
            "Shame",
            "shame guilt embarrassment worthless hiding",
            vec![
                passage("shame-1", "Shame thrives in silence. Speaking it to someone safe loosens its grip."),
                passage("shame-2", "Guilt says I did something bad; shame says I am bad. Only one is true."),
            ],
        ),
    ])
    .unwrap()
}

pub fn catalog_arc() -> Arc<ThemeCatalog> {
    Arc::new(catalog())
}

pub fn local_services(config: &EngineConfig) -> Services {
    Services::local(&catalog(), config.selection.min_theme_score)
}

/// The standard sources over the fixture catalog and local services.
pub fn registry(config: &EngineConfig) -> Registry {
    let sources = sources::standard(catalog_arc(), &local_services(config));
    Registry::new(sources, config).unwrap()
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

/// Write the seed fields for `text` with the default configuration.
pub fn seed(store: &BlackboardStore, text: &str) {
    scheduler::seed(store, text, &catalog_arc(), &EngineConfig::default().safety).unwrap();
}

pub fn seeded(text: &str) -> BlackboardStore {
    let store = BlackboardStore::new();
    seed(&store, text);
    store
}

/// A standard source by name.
pub fn source(name: &str) -> Arc<dyn KnowledgeSource> {
    let config = EngineConfig::default();
    sources::standard(catalog_arc(), &local_services(&config))
        .into_iter()
        .find(|s| s.name() == name)
        .unwrap()
}

pub fn context(store: &BlackboardStore, source: &Arc<dyn KnowledgeSource>) -> SourceContext {
    context_for(store, source.as_ref())
}

pub fn context_for<S: KnowledgeSource + ?Sized>(store: &BlackboardStore, source: &S) -> SourceContext {
    SourceContext::new(
        "test-request",
        store.snapshot(),
        Budget::new(0, Duration::from_secs(5)),
        Arc::new(EngineConfig::default()),
        source.descriptor().outputs.clone(),
    )
}

/// A standard source plus a context over a freshly seeded store.
pub fn source_ctx(name: &str, text: &str) -> (Arc<dyn KnowledgeSource>, SourceContext) {
    let store = seeded(text);
    let source = source(name);
    let ctx = context(&store, &source);
    (source, ctx)
}

/// Run standard sources in order, committing each one's outputs.
pub async fn advance(store: &BlackboardStore, names: &[&str]) {
    for name in names {
        let source = source(name);
        let ctx = context(store, &source);
        source.contribute(&ctx).await.unwrap();
        for (field, value) in ctx.into_staged() {
            store.write(field, value, name).unwrap();
        }
    }
}

pub fn write_route(store: &BlackboardStore, route: Route) {
    let decision = GateDecision {
        route,
        reasons: vec![GateReason::Default],
        metrics: ConfidenceMetrics::default(),
    };
    store.write(Field::ROUTE, FieldValue::Route(decision), "test").unwrap();
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Generation service returning a fixed answer after an optional delay.
pub struct ScriptedGenerator {
    result: Result<String, ServiceError>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn ok(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn err(err: ServiceError) -> Self {
        Self {
            result: Err(err),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Collaborator<GenerationRequest, GenerationResponse> for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted_generator"
    }

    async fn invoke(&self, _input: GenerationRequest, _budget: Budget) -> Result<GenerationResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone().map(|text| GenerationResponse { text })
    }
}

/// Ranking service that always fails.
pub struct FailingRanker;

#[async_trait]
impl Collaborator<RankingRequest, RankingResponse> for FailingRanker {
    fn name(&self) -> &str {
        "failing_ranker"
    }

    async fn invoke(&self, _input: RankingRequest, _budget: Budget) -> Result<RankingResponse, ServiceError> {
        Err(ServiceError::Unavailable("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// Stub knowledge source
// ---------------------------------------------------------------------------

/// Writes its own name into every declared output after `delay`, or fails.
pub struct StubSource {
    pub descriptor: SourceDescriptor,
    pub delay: Duration,
    pub failure: Option<SourceError>,
    pub calls: AtomicUsize,
}

impl StubSource {
    pub fn new(name: &str, inputs: &[Field], outputs: &[Field]) -> Self {
        Self {
            descriptor: SourceDescriptor::new(name)
                .inputs(inputs.iter().copied())
                .outputs(outputs.iter().copied()),
            delay: Duration::ZERO,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, failure: SourceError) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[async_trait]
impl KnowledgeSource for StubSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        for field in &self.descriptor.outputs {
            ctx.write(*field, FieldValue::Text(self.descriptor.name.clone()))?;
        }
        Ok(Contribution::certain())
    }
}
