//! Value types exchanged through the blackboard.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Result of scanning the input for safety escalation terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyScan {
    /// Configured terms found in the input (case-insensitive substring match).
    pub matched_terms: Vec<String>,
    /// Whitespace token count of the raw input.
    pub token_count: usize,
}

impl SafetyScan {
    pub fn scan(text: &str, terms: &[String]) -> Self {
        let lower = text.to_lowercase();
        let matched_terms = terms
            .iter()
            .filter(|term| !term.trim().is_empty() && lower.contains(&term.to_lowercase()))
            .cloned()
            .collect();
        Self {
            matched_terms,
            token_count: crate::text::token_count(text),
        }
    }

    pub fn matched(&self) -> bool {
        !self.matched_terms.is_empty()
    }
}

/// Normalized relevance of one theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeScore {
    pub theme_id: String,
    pub label: String,
    /// Relevance in [0, 1].
    pub score: f64,
    /// Dense similarity in [0, 1], when the ranking service reports one.
    #[serde(default)]
    pub similarity: Option<f64>,
}

/// Full ranking of every candidate theme, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeRanking {
    pub scores: Vec<ThemeScore>,
    /// The ranking service's own confidence signal, in [0, 1].
    pub confidence: f64,
}

impl ThemeRanking {
    /// Build a ranking, sorting scores best first (ties broken by theme id so
    /// identical inputs always rank identically).
    pub fn new(mut scores: Vec<ThemeScore>, confidence: f64) -> Self {
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.theme_id.cmp(&b.theme_id))
        });
        Self {
            scores,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn top(&self) -> Option<&ThemeScore> {
        self.scores.first()
    }

    pub fn score_of(&self, theme_id: &str) -> Option<f64> {
        self.scores.iter().find(|s| s.theme_id == theme_id).map(|s| s.score)
    }
}

/// A theme chosen for the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTheme {
    pub theme_id: String,
    pub label: String,
    pub score: f64,
}

/// Pick at most `max_count` themes scoring at least `min_score`.
pub fn select_themes(ranking: &ThemeRanking, max_count: usize, min_score: f64) -> Vec<SelectedTheme> {
    ranking
        .scores
        .iter()
        .filter(|s| s.score >= min_score)
        .take(max_count)
        .map(|s| SelectedTheme {
            theme_id: s.theme_id.clone(),
            label: s.label.clone(),
            score: s.score,
        })
        .collect()
}

/// A passage returned by similarity search, resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub passage_id: String,
    pub theme_id: String,
    pub text: String,
    /// Similarity to the query in [0, 1].
    pub similarity: f64,
    #[serde(default)]
    pub source_title: Option<String>,
}

/// Partial quality check of the theme selection, run before generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeCheck {
    pub selected: usize,
    pub max_allowed: usize,
    pub min_score: f64,
    /// Selected theme ids scoring under `min_score`.
    pub below_floor: Vec<String>,
    /// Selected theme ids missing from the ranking.
    pub unranked: Vec<String>,
}

impl ThemeCheck {
    /// Check `selected` against the count cap and score floor, using the
    /// ranking as the source of truth for scores.
    pub fn evaluate(selected: &[SelectedTheme], ranking: &ThemeRanking, max_allowed: usize, min_score: f64) -> Self {
        let mut below_floor = Vec::new();
        let mut unranked = Vec::new();
        for theme in selected {
            match ranking.score_of(&theme.theme_id) {
                Some(score) if score >= min_score => {}
                Some(_) => below_floor.push(theme.theme_id.clone()),
                None => unranked.push(theme.theme_id.clone()),
            }
        }
        Self {
            selected: selected.len(),
            max_allowed,
            min_score,
            below_floor,
            unranked,
        }
    }

    pub fn conforming(&self) -> bool {
        self.selected <= self.max_allowed && self.below_floor.is_empty() && self.unranked.is_empty()
    }

    /// Conformance as a score in [0, 1].
    pub fn score(&self) -> f64 {
        if self.conforming() {
            return 1.0;
        }
        if self.selected == 0 {
            return 0.0;
        }
        let bad = (self.below_floor.len() + self.unranked.len()).min(self.selected);
        let over = self.selected.saturating_sub(self.max_allowed);
        let penalty = (bad + over) as f64 / self.selected as f64;
        (1.0 - penalty).clamp(0.0, 1.0)
    }
}

impl Default for ThemeCheck {
    fn default() -> Self {
        Self {
            selected: 0,
            max_allowed: usize::MAX,
            min_score: 0.0,
            below_floor: Vec::new(),
            unranked: Vec::new(),
        }
    }
}

/// A validated citation marker in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based marker number as it appears in the summary.
    pub marker: usize,
    pub passage_id: String,
    pub theme_id: String,
    pub similarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(id: &str, s: f64) -> ThemeScore {
        ThemeScore {
            theme_id: id.into(),
            label: id.to_uppercase(),
            score: s,
            similarity: None,
        }
    }

    #[test]
    fn test_safety_scan_case_insensitive() {
        let terms = vec!["suicide".to_string(), "self-harm".to_string()];
        let scan = SafetyScan::scan("Thinking about SUICIDE lately", &terms);
        assert!(scan.matched());
        assert_eq!(scan.matched_terms, vec!["suicide".to_string()]);
        assert_eq!(scan.token_count, 4);
        assert!(!SafetyScan::scan("hello", &terms).matched());
    }

    #[test]
    fn test_ranking_sorted_with_stable_ties() {
        let ranking = ThemeRanking::new(vec![score("b", 0.5), score("c", 0.9), score("a", 0.5)], 1.4);
        let ids: Vec<_> = ranking.scores.iter().map(|s| s.theme_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(ranking.confidence, 1.0);
    }

    #[test]
    fn test_select_themes_respects_cap_and_floor() {
        let ranking = ThemeRanking::new(
            vec![score("a", 0.9), score("b", 0.8), score("c", 0.7), score("d", 0.6), score("e", 0.1)],
            0.5,
        );
        let selected = select_themes(&ranking, 3, 0.2);
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|t| t.score >= 0.2));
        assert!(select_themes(&ranking, 3, 0.95).is_empty());
    }

    #[test]
    fn test_theme_check_score() {
        let ok = ThemeCheck {
            selected: 2,
            max_allowed: 3,
            min_score: 0.2,
            below_floor: vec![],
            unranked: vec![],
        };
        assert_eq!(ok.score(), 1.0);
        let bad = ThemeCheck {
            below_floor: vec!["x".into()],
            ..ok.clone()
        };
        assert!((bad.score() - 0.5).abs() < 1e-9);
        assert_eq!(ThemeCheck::default().score(), 1.0);
    }

    #[test]
    fn test_theme_check_evaluate() {
        let ranking = ThemeRanking::new(vec![score("a", 0.9), score("b", 0.1)], 0.5);
        let selected = vec![
            SelectedTheme { theme_id: "a".into(), label: "A".into(), score: 0.9 },
            SelectedTheme { theme_id: "b".into(), label: "B".into(), score: 0.1 },
            SelectedTheme { theme_id: "z".into(), label: "Z".into(), score: 0.5 },
        ];
        let check = ThemeCheck::evaluate(&selected, &ranking, 2, 0.2);
        assert_eq!(check.below_floor, vec!["b".to_string()]);
        assert_eq!(check.unranked, vec!["z".to_string()]);
        assert!(!check.conforming());
        assert_eq!(check.score(), 0.0);
    }
}
