//! Fallback chains and neutral defaults.
//!
//! Each output field has an ordered list of candidate producers: the
//! producers scheduled as primaries under the current route first, then every
//! other producer allowed to stand in, each group by descending priority.
//! When every candidate has failed the field gets a neutral default so the
//! request can still finish.

use std::collections::HashSet;
use std::sync::Arc;

use crate::blackboard::{Field, FieldValue, Snapshot};
use crate::gate::{ConfidenceMetrics, GateDecision, GateReason, Route};
use crate::knowledge::{KnowledgeSource, Registry};
use crate::model::{ThemeCheck, ThemeRanking};

/// Summary used when no producer could write one.
pub const APOLOGY_SUMMARY: &str = "I'm sorry, I wasn't able to put together a full response this time. \
Your message matters, and if you are going through something difficult, please consider reaching out \
to someone you trust or a qualified professional.";

/// Ordered candidate producers for one field.
#[derive(Clone)]
pub struct FallbackChain {
    field: Field,
    candidates: Vec<Arc<dyn KnowledgeSource>>,
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("field", &self.field)
            .field("candidates", &self.names())
            .finish()
    }
}

impl FallbackChain {
    /// Build the chain for `field` under `route`.
    pub fn for_field(registry: &Registry, field: Field, route: Option<Route>) -> Self {
        let mut primaries = Vec::new();
        let mut standins = Vec::new();
        for source in registry.producers(field) {
            let d = source.descriptor();
            if d.is_primary_in(route) {
                primaries.push(Arc::clone(source));
            } else if d.is_fallback_in(route) {
                standins.push(Arc::clone(source));
            }
        }
        let by_priority = |a: &Arc<dyn KnowledgeSource>, b: &Arc<dyn KnowledgeSource>| {
            b.descriptor()
                .priority
                .cmp(&a.descriptor().priority)
                .then_with(|| a.name().cmp(b.name()))
        };
        primaries.sort_by(by_priority);
        standins.sort_by(by_priority);
        primaries.extend(standins);
        Self {
            field,
            candidates: primaries,
        }
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|s| s.name()).collect()
    }

    /// The first candidate not yet tried whose inputs are present.
    pub fn next_candidate(&self, tried: &HashSet<String>, snapshot: &Snapshot) -> Option<Arc<dyn KnowledgeSource>> {
        self.candidates
            .iter()
            .find(|s| !tried.contains(s.name()) && s.descriptor().inputs_ready(snapshot))
            .cloned()
    }
}

/// The value written when every producer of `field` failed.
pub fn neutral_default(field: Field) -> FieldValue {
    match field {
        Field::THEME_RANKING => FieldValue::Ranking(ThemeRanking::default()),
        Field::CONFIDENCE_METRICS => FieldValue::Metrics(ConfidenceMetrics::default()),
        Field::SELECTED_THEMES => FieldValue::Themes(Vec::new()),
        Field::PASSAGES => FieldValue::Passages(Vec::new()),
        Field::THEME_CHECK => FieldValue::ThemeCheck(ThemeCheck::default()),
        Field::SUMMARY => FieldValue::Text(APOLOGY_SUMMARY.to_string()),
        Field::CITATIONS => FieldValue::Citations(Vec::new()),
        Field::PROGRESS_NOTICE | Field::NORMALIZED_TEXT | Field::USER_INPUT => FieldValue::Text(String::new()),
        Field::ROUTE => FieldValue::Route(GateDecision {
            route: Route::Balanced,
            reasons: vec![GateReason::Default],
            metrics: ConfidenceMetrics::default(),
        }),
        _ => FieldValue::Json(serde_json::Value::Null),
    }
}
