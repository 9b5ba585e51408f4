//! Engine configuration.
//!
//! Loaded from YAML; every field has a default so a partial file (or none at
//! all) is valid. [`EngineConfig::validate`] runs at engine construction and
//! is the only place a bad configuration can fail the process.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gate::Route;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Token, temperature and timeout budget for one processing mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeBudget {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl ModeBudget {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-route generation budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeBudgets {
    #[serde(default = "default_deterministic_budget")]
    pub deterministic: ModeBudget,
    #[serde(default = "default_balanced_budget")]
    pub balanced: ModeBudget,
    #[serde(default = "default_quality_first_budget")]
    pub quality_first: ModeBudget,
}

fn default_deterministic_budget() -> ModeBudget {
    ModeBudget { max_tokens: 0, temperature: 0.0, timeout_ms: 500 }
}
fn default_balanced_budget() -> ModeBudget {
    ModeBudget { max_tokens: 600, temperature: 0.3, timeout_ms: 8_000 }
}
fn default_quality_first_budget() -> ModeBudget {
    ModeBudget { max_tokens: 1_200, temperature: 0.2, timeout_ms: 15_000 }
}

impl Default for ModeBudgets {
    fn default() -> Self {
        Self {
            deterministic: default_deterministic_budget(),
            balanced: default_balanced_budget(),
            quality_first: default_quality_first_budget(),
        }
    }
}

impl ModeBudgets {
    pub fn for_route(&self, route: Route) -> &ModeBudget {
        match route {
            Route::Deterministic => &self.deterministic,
            Route::Balanced => &self.balanced,
            Route::QualityFirst => &self.quality_first,
        }
    }
}

/// Confidence gate and citation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Promote to quality-first when top minus second score is below this.
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Promote to quality-first when normalized entropy is above this.
    #[serde(default = "default_entropy")]
    pub entropy: f64,
    /// Promote to quality-first when the top similarity is below this.
    #[serde(default = "default_top_similarity")]
    pub top_similarity: f64,
    /// Minimum ranking confidence for the deterministic route.
    #[serde(default = "default_skip_confidence")]
    pub deterministic_skip_confidence: f64,
    /// Inputs with at most this many tokens count as short.
    #[serde(default = "default_short_input_tokens")]
    pub short_input_tokens: usize,
    /// Inputs with more than this many tokens promote to quality-first.
    #[serde(default = "default_long_input_tokens")]
    pub long_input_tokens: usize,
    /// Citations to passages below this similarity are dropped.
    #[serde(default = "default_min_citation_similarity")]
    pub min_citation_similarity: f64,
}

fn default_margin() -> f64 { 0.05 }
fn default_entropy() -> f64 { 0.95 }
fn default_top_similarity() -> f64 { 0.15 }
fn default_skip_confidence() -> f64 { 0.8 }
fn default_short_input_tokens() -> usize { 8 }
fn default_long_input_tokens() -> usize { 40 }
fn default_min_citation_similarity() -> f64 { 0.05 }

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            margin: default_margin(),
            entropy: default_entropy(),
            top_similarity: default_top_similarity(),
            deterministic_skip_confidence: default_skip_confidence(),
            short_input_tokens: default_short_input_tokens(),
            long_input_tokens: default_long_input_tokens(),
            min_citation_similarity: default_min_citation_similarity(),
        }
    }
}

/// Safety escalation terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_escalation_terms")]
    pub escalation_terms: Vec<String>,
}

fn default_escalation_terms() -> Vec<String> {
    [
        "suicide",
        "suicidal",
        "kill myself",
        "end my life",
        "self-harm",
        "self harm",
        "overdose",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            escalation_terms: default_escalation_terms(),
        }
    }
}

/// Theme selection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_max_theme_count")]
    pub max_theme_count: usize,
    /// Minimum normalized relevance for a theme to be returned.
    #[serde(default = "default_min_theme_score")]
    pub min_theme_score: f64,
}

fn default_max_theme_count() -> usize { 3 }
fn default_min_theme_score() -> f64 { 0.2 }

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_theme_count: default_max_theme_count(),
            min_theme_score: default_min_theme_score(),
        }
    }
}

/// Passage retrieval limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_passages_per_theme")]
    pub passages_per_theme: usize,
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,
}

fn default_passages_per_theme() -> usize { 2 }
fn default_max_passages() -> usize { 6 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            passages_per_theme: default_passages_per_theme(),
            max_passages: default_max_passages(),
        }
    }
}

/// Per-criterion quality weights. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_summary_weight")]
    pub summary: f64,
    #[serde(default = "default_theme_count_weight")]
    pub theme_count: f64,
    #[serde(default = "default_citations_weight")]
    pub citations: f64,
}

fn default_summary_weight() -> f64 { 0.4 }
fn default_theme_count_weight() -> f64 { 0.3 }
fn default_citations_weight() -> f64 { 0.3 }

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            summary: default_summary_weight(),
            theme_count: default_theme_count_weight(),
            citations: default_citations_weight(),
        }
    }
}

impl QualityWeights {
    pub fn total(&self) -> f64 {
        self.summary + self.theme_count + self.citations
    }
}

/// Quality assurance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default)]
    pub weights: QualityWeights,
    /// Aggregate below this triggers the single escalated retry.
    #[serde(default = "default_min_aggregate")]
    pub min_aggregate: f64,
    /// Summaries shorter than this score proportionally lower.
    #[serde(default = "default_min_summary_chars")]
    pub min_summary_chars: usize,
}

fn default_min_aggregate() -> f64 { 0.6 }
fn default_min_summary_chars() -> usize { 120 }

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            min_aggregate: default_min_aggregate(),
            min_summary_chars: default_min_summary_chars(),
        }
    }
}

/// Scheduler limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global request deadline.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Worker pool size.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Upper bound on scheduling iterations per request.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Per-source timeout overrides keyed by source name.
    #[serde(default)]
    pub source_timeouts_ms: HashMap<String, u64>,
}

fn default_deadline_ms() -> u64 { 20_000 }
fn default_max_concurrency() -> usize { 8 }
fn default_max_iterations() -> usize { 16 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_concurrency: default_max_concurrency(),
            max_iterations: default_max_iterations(),
            source_timeouts_ms: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Streaming channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Buffered events before the oldest is dropped.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_buffer_capacity() -> usize { 32 }

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub modes: ModeBudgets,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl EngineConfig {
    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Validation(format!("{name} must be in [0, 1], got {v}")))
            }
        };

        let thr = &self.thresholds;
        unit("thresholds.margin", thr.margin)?;
        unit("thresholds.entropy", thr.entropy)?;
        unit("thresholds.top_similarity", thr.top_similarity)?;
        unit("thresholds.deterministic_skip_confidence", thr.deterministic_skip_confidence)?;
        unit("thresholds.min_citation_similarity", thr.min_citation_similarity)?;
        if thr.short_input_tokens > thr.long_input_tokens {
            return Err(ConfigError::Validation(format!(
                "thresholds.short_input_tokens ({}) exceeds long_input_tokens ({})",
                thr.short_input_tokens, thr.long_input_tokens
            )));
        }

        unit("selection.min_theme_score", self.selection.min_theme_score)?;
        if self.selection.max_theme_count == 0 {
            return Err(ConfigError::Validation("selection.max_theme_count must be at least 1".into()));
        }

        let w = &self.quality.weights;
        unit("quality.weights.summary", w.summary)?;
        unit("quality.weights.theme_count", w.theme_count)?;
        unit("quality.weights.citations", w.citations)?;
        if (w.total() - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Validation(format!(
                "quality.weights must sum to 1.0, got {:.6}",
                w.total()
            )));
        }
        unit("quality.min_aggregate", self.quality.min_aggregate)?;

        let sched = &self.scheduler;
        if sched.deadline_ms == 0 {
            return Err(ConfigError::Validation("scheduler.deadline_ms must be positive".into()));
        }
        if sched.max_concurrency == 0 {
            return Err(ConfigError::Validation("scheduler.max_concurrency must be at least 1".into()));
        }
        if sched.max_iterations == 0 {
            return Err(ConfigError::Validation("scheduler.max_iterations must be at least 1".into()));
        }
        for route in Route::ALL {
            let budget = self.modes.for_route(route);
            if budget.timeout_ms == 0 || budget.timeout_ms >= sched.deadline_ms {
                return Err(ConfigError::Validation(format!(
                    "modes.{route}.timeout_ms ({}) must be positive and below scheduler.deadline_ms ({})",
                    budget.timeout_ms, sched.deadline_ms
                )));
            }
        }
        for (name, timeout) in &sched.source_timeouts_ms {
            if *timeout == 0 || *timeout >= sched.deadline_ms {
                return Err(ConfigError::Validation(format!(
                    "scheduler.source_timeouts_ms.{name} ({timeout}) must be positive and below the deadline ({})",
                    sched.deadline_ms
                )));
            }
        }

        if self.streaming.buffer_capacity == 0 {
            return Err(ConfigError::Validation("streaming.buffer_capacity must be at least 1".into()));
        }

        Ok(())
    }

    /// Timeout override for a named source, if configured.
    pub fn source_timeout(&self, source: &str) -> Option<Duration> {
        self.scheduler
            .source_timeouts_ms
            .get(source)
            .map(|ms| Duration::from_millis(*ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selection.max_theme_count, 3);
        assert!((config.quality.weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
thresholds:
  margin: 0.1
safety:
  escalation_terms: ["crisis"]
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.thresholds.margin, 0.1);
        assert_eq!(config.thresholds.entropy, 0.95);
        assert_eq!(config.safety.escalation_terms, vec!["crisis".to_string()]);
        assert_eq!(config.scheduler.deadline_ms, 20_000);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let yaml = r#"
quality:
  weights:
    summary: 0.5
    theme_count: 0.5
    citations: 0.5
"#;
        let err = EngineConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_mode_timeout_must_be_below_deadline() {
        let yaml = r#"
scheduler:
  deadline_ms: 1000
"#;
        let err = EngineConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_source_timeout_override_validated() {
        let mut config = EngineConfig::default();
        config.scheduler.source_timeouts_ms.insert("theme_scorer".into(), 50_000);
        assert!(config.validate().is_err());

        config.scheduler.source_timeouts_ms.insert("theme_scorer".into(), 250);
        assert!(config.validate().is_ok());
        assert_eq!(config.source_timeout("theme_scorer"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_out_of_range_threshold() {
        let mut config = EngineConfig::default();
        config.thresholds.entropy = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quality.yml");
        let config = EngineConfig::default();
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();
        let loaded = EngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
