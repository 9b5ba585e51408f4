//! Quality assurance for the assembled result.
//!
//! Three criteria, each normalized to [0, 1]:
//!
//! - `summary`: present and long enough.
//! - `theme_count`: the selection respects the count cap and score floor.
//! - `citations`: every citation points to a retrieved passage above the
//!   similarity minimum.
//!
//! The aggregate is the weighted sum. Weights are validated to sum to 1.0
//! when the configuration is loaded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blackboard::{Field, FieldValue, Snapshot};
use crate::config::{QualityConfig, SelectionConfig};
use crate::model::{ThemeCheck, ThemeRanking};

pub const SUMMARY: &str = "summary";
pub const THEME_COUNT: &str = "theme_count";
pub const CITATIONS: &str = "citations";

/// Per-criterion scores and their weighted aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub scores: BTreeMap<String, f64>,
    pub weights: BTreeMap<String, f64>,
    pub aggregate: f64,
    pub minimum: f64,
    pub passed: bool,
}

impl QualityReport {
    pub fn score(&self, criterion: &str) -> Option<f64> {
        self.scores.get(criterion).copied()
    }
}

/// Scores a blackboard snapshot.
#[derive(Debug, Clone)]
pub struct QualityAssurance {
    quality: QualityConfig,
    selection: SelectionConfig,
    min_citation_similarity: f64,
}

impl QualityAssurance {
    pub fn new(quality: QualityConfig, selection: SelectionConfig, min_citation_similarity: f64) -> Self {
        Self {
            quality,
            selection,
            min_citation_similarity,
        }
    }

    pub fn minimum(&self) -> f64 {
        self.quality.min_aggregate
    }

    /// Build the report for the current state of a request.
    pub fn assess(&self, snapshot: &Snapshot) -> QualityReport {
        let w = &self.quality.weights;
        let mut scores = BTreeMap::new();
        scores.insert(SUMMARY.to_string(), self.summary_score(snapshot));
        scores.insert(THEME_COUNT.to_string(), self.theme_score(snapshot));
        scores.insert(CITATIONS.to_string(), self.citation_score(snapshot));

        let mut weights = BTreeMap::new();
        weights.insert(SUMMARY.to_string(), w.summary);
        weights.insert(THEME_COUNT.to_string(), w.theme_count);
        weights.insert(CITATIONS.to_string(), w.citations);

        let aggregate = scores
            .iter()
            .map(|(k, s)| s * weights.get(k).copied().unwrap_or(0.0))
            .sum::<f64>()
            .clamp(0.0, 1.0);

        QualityReport {
            scores,
            weights,
            aggregate,
            minimum: self.quality.min_aggregate,
            passed: aggregate >= self.quality.min_aggregate,
        }
    }

    fn summary_score(&self, snapshot: &Snapshot) -> f64 {
        let chars = snapshot
            .get(Field::SUMMARY)
            .and_then(FieldValue::as_text)
            .map(|s| s.trim().chars().count())
            .unwrap_or(0);
        if chars == 0 {
            return 0.0;
        }
        if self.quality.min_summary_chars == 0 {
            return 1.0;
        }
        (chars as f64 / self.quality.min_summary_chars as f64).min(1.0)
    }

    fn theme_score(&self, snapshot: &Snapshot) -> f64 {
        if let Some(check) = snapshot.get(Field::THEME_CHECK).and_then(FieldValue::as_theme_check) {
            return check.score();
        }
        let selected = snapshot
            .get(Field::SELECTED_THEMES)
            .and_then(FieldValue::as_themes)
            .unwrap_or_default();
        let empty = ThemeRanking::default();
        let ranking = snapshot
            .get(Field::THEME_RANKING)
            .and_then(FieldValue::as_ranking)
            .unwrap_or(&empty);
        ThemeCheck::evaluate(
            selected,
            ranking,
            self.selection.max_theme_count,
            self.selection.min_theme_score,
        )
        .score()
    }

    fn citation_score(&self, snapshot: &Snapshot) -> f64 {
        let passages = snapshot
            .get(Field::PASSAGES)
            .and_then(FieldValue::as_passages)
            .unwrap_or_default();
        let citations = snapshot
            .get(Field::CITATIONS)
            .and_then(FieldValue::as_citations)
            .unwrap_or_default();

        if citations.is_empty() {
            // Nothing to cite is fine; ignoring retrieved material is not.
            return if passages.is_empty() { 1.0 } else { 0.5 };
        }

        let valid = citations
            .iter()
            .filter(|c| {
                c.marker >= 1
                    && passages.get(c.marker - 1).is_some_and(|p| {
                        p.passage_id == c.passage_id && p.similarity >= self.min_citation_similarity
                    })
            })
            .count();
        valid as f64 / citations.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::BlackboardStore;
    use crate::model::{Citation, RetrievedPassage, SelectedTheme, ThemeScore};

    fn qa() -> QualityAssurance {
        QualityAssurance::new(QualityConfig::default(), SelectionConfig::default(), 0.1)
    }

    fn passage(id: &str) -> RetrievedPassage {
        RetrievedPassage {
            passage_id: id.into(),
            theme_id: "t1".into(),
            text: "x".into(),
            similarity: 0.5,
            source_title: None,
        }
    }

    fn store_with(summary: &str, themes: usize, passages: Vec<RetrievedPassage>, citations: Vec<Citation>) -> Snapshot {
        let store = BlackboardStore::new();
        let scores: Vec<ThemeScore> = (0..themes)
            .map(|i| ThemeScore {
                theme_id: format!("t{i}"),
                label: format!("T{i}"),
                score: 0.9,
                similarity: None,
            })
            .collect();
        let selected: Vec<SelectedTheme> = scores
            .iter()
            .map(|s| SelectedTheme {
                theme_id: s.theme_id.clone(),
                label: s.label.clone(),
                score: s.score,
            })
            .collect();
        store
            .write(Field::THEME_RANKING, FieldValue::Ranking(ThemeRanking::new(scores, 0.5)), "t")
            .unwrap();
        store.write(Field::SELECTED_THEMES, FieldValue::Themes(selected), "t").unwrap();
        store.write(Field::SUMMARY, FieldValue::Text(summary.into()), "t").unwrap();
        store.write(Field::PASSAGES, FieldValue::Passages(passages), "t").unwrap();
        store.write(Field::CITATIONS, FieldValue::Citations(citations), "t").unwrap();
        store.snapshot()
    }

    #[test]
    fn test_full_marks() {
        let summary = "a".repeat(200);
        let citation = Citation {
            marker: 1,
            passage_id: "p1".into(),
            theme_id: "t1".into(),
            similarity: 0.5,
        };
        let report = qa().assess(&store_with(&summary, 2, vec![passage("p1")], vec![citation]));
        assert!((report.aggregate - 1.0).abs() < 1e-9);
        assert!(report.passed);
        assert!((report.weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_summary_fails() {
        let report = qa().assess(&store_with("", 4, vec![passage("p1")], vec![]));
        assert_eq!(report.score(SUMMARY), Some(0.0));
        assert_eq!(report.score(CITATIONS), Some(0.5));
        assert!(report.score(THEME_COUNT).unwrap() < 1.0);
        assert!(!report.passed);
    }

    #[test]
    fn test_no_passages_no_citations_is_clean() {
        let summary = "b".repeat(150);
        let report = qa().assess(&store_with(&summary, 0, vec![], vec![]));
        assert_eq!(report.score(CITATIONS), Some(1.0));
        assert_eq!(report.score(THEME_COUNT), Some(1.0));
        assert!(report.passed);
    }

    #[test]
    fn test_mismatched_citation_counts_as_invalid() {
        let citation = Citation {
            marker: 1,
            passage_id: "other".into(),
            theme_id: "t1".into(),
            similarity: 0.5,
        };
        let report = qa().assess(&store_with("ok", 1, vec![passage("p1")], vec![citation]));
        assert_eq!(report.score(CITATIONS), Some(0.0));
    }
}
