//! Engine facade: one validated registry and configuration serving every
//! request.
//!
//! ```ignore
//! let engine = Engine::new(EngineConfig::default(), catalog)?;
//! let result = engine.process("I can't stop worrying").await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! ```

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::blackboard::{Field, FieldValue, PhaseRecord};
use crate::config::EngineConfig;
use crate::error::{EngineError, Escalation};
use crate::gate::Route;
use crate::knowledge::{sources, KnowledgeSource, Registry};
use crate::metrics::RequestMetrics;
use crate::model::Citation;
use crate::quality::QualityReport;
use crate::scheduler::{ControlStrategy, ExecutionPlan, RunEvent, RunOutcome, StateTrace, Strategy};
use crate::services::Services;
use crate::streaming::{self, StreamReceiver, StreamSender};
use crate::themes::ThemeCatalog;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A retrieved passage shown under its theme.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Excerpt {
    pub passage_id: String,
    pub text: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeResult {
    pub id: String,
    pub label: String,
    pub score: f64,
    pub is_relevant: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excerpts: Vec<Excerpt>,
}

/// How the result came about.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub trace: StateTrace,
    pub events: Vec<RunEvent>,
    pub phases: Vec<PhaseRecord>,
    pub escalations: Vec<Escalation>,
    pub metrics: RequestMetrics,
    pub quality: QualityReport,
    /// One report per attempt that reached the quality check.
    pub attempts: Vec<QualityReport>,
}

/// The answer to one `process` call. Always well formed: failures show up
/// as `partial`, `quality_below_threshold` and the diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub request_id: String,
    pub themes: Vec<ThemeResult>,
    pub summary: String,
    pub citations: Vec<Citation>,
    pub quality_score: f64,
    pub partial: bool,
    pub route: Option<Route>,
    pub quality_below_threshold: bool,
    pub diagnostics: Diagnostics,
}

impl ProcessResult {
    fn from_outcome(request_id: String, outcome: RunOutcome, config: &EngineConfig) -> Self {
        let snapshot = outcome.store.snapshot();
        let selection = &config.selection;
        let passages = snapshot
            .get(Field::PASSAGES)
            .and_then(FieldValue::as_passages)
            .unwrap_or_default();

        let themes = snapshot
            .get(Field::SELECTED_THEMES)
            .and_then(FieldValue::as_themes)
            .unwrap_or_default()
            .iter()
            .filter(|t| t.score >= selection.min_theme_score)
            .take(selection.max_theme_count)
            .map(|t| ThemeResult {
                id: t.theme_id.clone(),
                label: t.label.clone(),
                score: t.score,
                is_relevant: true,
                excerpts: passages
                    .iter()
                    .filter(|p| p.theme_id == t.theme_id)
                    .map(|p| Excerpt {
                        passage_id: p.passage_id.clone(),
                        text: p.text.clone(),
                        similarity: p.similarity,
                        source_title: p.source_title.clone(),
                    })
                    .collect(),
            })
            .collect();

        let summary = snapshot
            .get(Field::SUMMARY)
            .and_then(FieldValue::as_text)
            .unwrap_or_default()
            .to_string();
        let citations = snapshot
            .get(Field::CITATIONS)
            .and_then(FieldValue::as_citations)
            .map(|c| c.to_vec())
            .unwrap_or_default();

        let metrics = RequestMetrics::collect(
            &snapshot,
            &outcome.phases,
            &outcome.events,
            outcome.timeout_hit,
            outcome.attempts.len(),
            outcome.elapsed_ms,
        );

        Self {
            request_id,
            themes,
            summary,
            citations,
            quality_score: outcome.report.aggregate,
            partial: outcome.partial,
            route: snapshot.route(),
            quality_below_threshold: outcome.quality_below_threshold,
            diagnostics: Diagnostics {
                trace: outcome.trace,
                events: outcome.events,
                phases: outcome.phases,
                escalations: outcome.escalations,
                metrics,
                quality: outcome.report,
                attempts: outcome.attempts,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineInner {
    config: Arc<EngineConfig>,
    catalog: Arc<ThemeCatalog>,
    registry: Arc<Registry>,
    control: ControlStrategy,
}

/// Cheap to clone; clones share the registry and the worker pool.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("themes", &self.inner.catalog.len())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl Engine {
    /// Engine with the standard sources over the local collaborators.
    pub fn new(config: EngineConfig, catalog: ThemeCatalog) -> Result<Self, EngineError> {
        let services = Services::local(&catalog, config.selection.min_theme_score);
        Self::with_services(config, catalog, services)
    }

    /// Engine with the standard sources over the given collaborators.
    pub fn with_services(config: EngineConfig, catalog: ThemeCatalog, services: Services) -> Result<Self, EngineError> {
        let catalog = Arc::new(catalog);
        let sources = sources::standard(Arc::clone(&catalog), &services);
        Self::with_sources(config, catalog, sources)
    }

    /// Engine over an arbitrary set of sources. Fails on an invalid
    /// configuration or registry.
    pub fn with_sources(
        config: EngineConfig,
        catalog: Arc<ThemeCatalog>,
        sources: Vec<Arc<dyn KnowledgeSource>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let registry = Arc::new(Registry::new(sources, &config)?);
        let config = Arc::new(config);
        log::info!(
            "engine ready: {} sources, {} themes, deadline {}ms",
            registry.len(),
            catalog.len(),
            config.scheduler.deadline_ms
        );
        let control = ControlStrategy::new(Arc::clone(&registry), Arc::clone(&config), Arc::clone(&catalog));
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                catalog,
                registry,
                control,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &ThemeCatalog {
        &self.inner.catalog
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Static preview of the phase shape.
    pub fn plan_preview(&self, strategy: Strategy) -> ExecutionPlan {
        ExecutionPlan::preview(&self.inner.registry, strategy)
    }

    /// Process one input.
    pub async fn process(&self, text: &str) -> ProcessResult {
        self.execute(text, None).await
    }

    /// Process one input in the background, streaming one event per phase
    /// and a final `Complete`. Must be called inside a Tokio runtime.
    ///
    /// Dropping the receiver does not cancel the run.
    pub fn process_streaming(&self, text: impl Into<String>) -> StreamReceiver {
        let (tx, rx) = streaming::channel(self.inner.config.streaming.buffer_capacity);
        let engine = self.clone();
        let text = text.into();
        tokio::spawn(async move {
            let result = engine.execute(&text, Some(&tx)).await;
            if tx.dropped() > 0 {
                log::debug!("[{}] {} phase event(s) dropped", result.request_id, tx.dropped());
            }
            tx.complete(result);
        });
        rx
    }

    async fn execute(&self, text: &str, stream: Option<&StreamSender>) -> ProcessResult {
        let request_id = Uuid::new_v4().to_string();
        let outcome = self.inner.control.run(&request_id, text, stream).await;
        let result = ProcessResult::from_outcome(request_id, outcome, &self.inner.config);
        result.diagnostics.metrics.log(&result.request_id);
        result
    }
}
