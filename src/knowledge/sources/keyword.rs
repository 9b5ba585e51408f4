//! Keyword-overlap scoring, used when the ranking service is unavailable.

use async_trait::async_trait;

use crate::blackboard::{Field, FieldValue};
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::model::{ThemeRanking, ThemeScore};
use crate::text;
use crate::themes::ThemeCatalog;

/// Keyword hits needed for a full score.
const FULL_SCORE_HITS: f64 = 3.0;

/// Scores themes by counting their label and description terms in the
/// input. Fallback-only: it runs when `theme_scorer` fails.
pub struct KeywordScorer {
    descriptor: SourceDescriptor,
}

impl KeywordScorer {
    pub fn new() -> Self {
        Self {
            descriptor: SourceDescriptor::new("keyword_scorer")
                .priority(50)
                .inputs([Field::NORMALIZED_TEXT, Field::THEME_CATALOG])
                .outputs([Field::THEME_RANKING, Field::CONFIDENCE_METRICS, Field::SELECTED_THEMES])
                .timeout_ms(500)
                .fallback(),
        }
    }

    pub fn rank(input: &str, catalog: &ThemeCatalog) -> ThemeRanking {
        let words = text::term_set(input);
        let scores: Vec<ThemeScore> = catalog
            .themes
            .iter()
            .map(|theme| {
                let keywords = text::term_set(&theme.scoring_text());
                let hits = keywords.iter().filter(|k| words.contains(*k)).count();
                ThemeScore {
                    theme_id: theme.id.clone(),
                    label: theme.label.clone(),
                    score: (hits as f64 / FULL_SCORE_HITS).min(1.0),
                    similarity: None,
                }
            })
            .collect();

        // Halved: keyword overlap is a weaker signal than the ranking service.
        let top = scores.iter().map(|s| s.score).fold(0.0, f64::max);
        let confidence = if top == 0.0 { 0.5 } else { top * 0.5 };
        ThemeRanking::new(scores, confidence)
    }
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeSource for KeywordScorer {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let input = ctx.require(Field::NORMALIZED_TEXT, FieldValue::as_text)?;
        let catalog = ctx.require(Field::THEME_CATALOG, FieldValue::as_catalog)?;
        let ranking = Self::rank(input, catalog);
        let confidence = ranking.confidence;
        super::theme_scorer::publish_ranking(ctx, ranking)?;
        Ok(Contribution::new(confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_keyword_hits_scale_score() {
        let catalog = testing::catalog();
        let ranking = KeywordScorer::rank("panic and fear keep me nervous", &catalog);
        let top = ranking.top().unwrap();
        assert_eq!(top.theme_id, "anxiety");
        assert_eq!(top.score, 1.0);
        assert_eq!(ranking.confidence, 0.5);

        let partial = KeywordScorer::rank("so much fear", &catalog);
        assert!((partial.score_of("anxiety").unwrap() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_hits() {
        let catalog = testing::catalog();
        let ranking = KeywordScorer::rank("what is quantum physics?", &catalog);
        assert!(ranking.scores.iter().all(|s| s.score == 0.0));
        assert_eq!(ranking.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_contribute_selects_themes() {
        let (source, ctx) = testing::source_ctx("keyword_scorer", "I keep mourning the loss of my father");
        source.contribute(&ctx).await.unwrap();
        let staged = ctx.into_staged();
        let selected = staged[2].1.as_themes().unwrap();
        assert_eq!(selected[0].theme_id, "grief");
    }
}
