//! Field keys and the values they hold.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::gate::{ConfidenceMetrics, GateDecision};
use crate::model::{Citation, RetrievedPassage, SafetyScan, SelectedTheme, ThemeCheck, ThemeRanking};
use crate::quality::QualityReport;
use crate::themes::ThemeCatalog;

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// Name of a blackboard field.
///
/// Fields are static identifiers: every field a source can read or write is
/// known when the registry is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field(&'static str);

impl Field {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    // Seeds, written by the scheduler at INIT.
    pub const USER_INPUT: Field = Field("user_input");
    pub const NORMALIZED_TEXT: Field = Field("normalized_text");
    pub const THEME_CATALOG: Field = Field("theme_catalog");
    pub const SAFETY_SCAN: Field = Field("safety_scan");

    pub const THEME_RANKING: Field = Field("theme_ranking");
    pub const CONFIDENCE_METRICS: Field = Field("confidence_metrics");
    pub const SELECTED_THEMES: Field = Field("selected_themes");
    pub const PROGRESS_NOTICE: Field = Field("progress_notice");
    pub const PASSAGES: Field = Field("passages");
    pub const THEME_CHECK: Field = Field("theme_check");
    /// Written by the confidence gate.
    pub const ROUTE: Field = Field("route");
    pub const SUMMARY: Field = Field("summary");
    pub const CITATIONS: Field = Field("citations");
    /// Written by quality assurance.
    pub const QUALITY_REPORT: Field = Field("quality_report");

    pub const SEEDS: [Field; 4] = [
        Field::USER_INPUT,
        Field::NORMALIZED_TEXT,
        Field::THEME_CATALOG,
        Field::SAFETY_SCAN,
    ];

    /// Fields that must be present before quality assurance runs.
    pub const TERMINAL: [Field; 5] = [
        Field::SELECTED_THEMES,
        Field::PASSAGES,
        Field::THEME_CHECK,
        Field::SUMMARY,
        Field::CITATIONS,
    ];

    /// Fields dropped when the generation phase is retried.
    pub const GENERATION: [Field; 4] = [Field::ROUTE, Field::SUMMARY, Field::CITATIONS, Field::QUALITY_REPORT];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A value stored on the blackboard.
///
/// Native Rust values, no serialization on the internal path. `Json` covers
/// fields contributed by sources outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Catalog(Arc<ThemeCatalog>),
    Safety(SafetyScan),
    Ranking(ThemeRanking),
    Metrics(ConfidenceMetrics),
    Themes(Vec<SelectedTheme>),
    Passages(Vec<RetrievedPassage>),
    ThemeCheck(ThemeCheck),
    Route(GateDecision),
    Citations(Vec<Citation>),
    Quality(QualityReport),
    Json(Value),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Catalog(_) => "catalog",
            FieldValue::Safety(_) => "safety",
            FieldValue::Ranking(_) => "ranking",
            FieldValue::Metrics(_) => "metrics",
            FieldValue::Themes(_) => "themes",
            FieldValue::Passages(_) => "passages",
            FieldValue::ThemeCheck(_) => "theme_check",
            FieldValue::Route(_) => "route",
            FieldValue::Citations(_) => "citations",
            FieldValue::Quality(_) => "quality",
            FieldValue::Json(_) => "json",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_catalog(&self) -> Option<&Arc<ThemeCatalog>> {
        match self {
            FieldValue::Catalog(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_safety(&self) -> Option<&SafetyScan> {
        match self {
            FieldValue::Safety(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ranking(&self) -> Option<&ThemeRanking> {
        match self {
            FieldValue::Ranking(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_metrics(&self) -> Option<&ConfidenceMetrics> {
        match self {
            FieldValue::Metrics(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_themes(&self) -> Option<&[SelectedTheme]> {
        match self {
            FieldValue::Themes(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_passages(&self) -> Option<&[RetrievedPassage]> {
        match self {
            FieldValue::Passages(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_theme_check(&self) -> Option<&ThemeCheck> {
        match self {
            FieldValue::ThemeCheck(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_route(&self) -> Option<&GateDecision> {
        match self {
            FieldValue::Route(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_citations(&self) -> Option<&[Citation]> {
        match self {
            FieldValue::Citations(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_quality(&self) -> Option<&QualityReport> {
        match self {
            FieldValue::Quality(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// JSON view for streaming events. The catalog is summarized rather than
    /// copied out in full.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Catalog(c) => serde_json::json!({ "themes": c.len() }),
            other => serde_json::to_value(other)
                .ok()
                .and_then(|v| v.get("value").cloned())
                .unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_serializes_as_name() {
        assert_eq!(serde_json::to_string(&Field::SUMMARY).unwrap(), "\"summary\"");
        assert_eq!(Field::new("custom").as_str(), "custom");
        assert_eq!(Field::ROUTE.to_string(), "route");
    }

    #[test]
    fn test_typed_accessors() {
        let v = FieldValue::Text("hello".into());
        assert_eq!(v.as_text(), Some("hello"));
        assert!(v.as_themes().is_none());
        assert_eq!(v.kind(), "text");

        let themes = FieldValue::Themes(vec![]);
        assert_eq!(themes.as_themes().map(|t| t.len()), Some(0));
    }

    #[test]
    fn test_to_json_summarizes_catalog() {
        let catalog = FieldValue::Catalog(Arc::new(ThemeCatalog::default()));
        assert_eq!(catalog.to_json(), serde_json::json!({"themes": 0}));
        assert_eq!(FieldValue::Text("x".into()).to_json(), serde_json::json!("x"));
    }
}
