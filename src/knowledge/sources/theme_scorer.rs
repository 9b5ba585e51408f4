//! Fast theme scoring through the ranking service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::blackboard::{Field, FieldValue};
use crate::gate::ConfidenceMetrics;
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::model::{select_themes, ThemeRanking, ThemeScore};
use crate::services::{RankingRequest, RankingResponse, RankingService};
use crate::themes::ThemeCatalog;

/// Scores every catalog theme against the input.
pub struct ThemeScorer {
    descriptor: SourceDescriptor,
    ranking: Arc<RankingService>,
}

impl ThemeScorer {
    pub fn new(ranking: Arc<RankingService>) -> Self {
        Self {
            descriptor: SourceDescriptor::new("theme_scorer")
                .priority(100)
                .inputs([Field::NORMALIZED_TEXT, Field::THEME_CATALOG])
                .outputs([Field::THEME_RANKING, Field::CONFIDENCE_METRICS, Field::SELECTED_THEMES])
                .timeout_ms(3_000)
                .confidence_threshold(0.3),
            ranking,
        }
    }
}

#[async_trait]
impl KnowledgeSource for ThemeScorer {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let text = ctx.require(Field::NORMALIZED_TEXT, FieldValue::as_text)?;
        let catalog = ctx.require(Field::THEME_CATALOG, FieldValue::as_catalog)?;

        let request = RankingRequest {
            text: text.to_string(),
            labels: catalog.labels(),
        };
        log::debug!(
            "[{}] theme_scorer: ranking {} labels via {}",
            ctx.request_id(),
            request.labels.len(),
            self.ranking.name()
        );
        let response = self.ranking.invoke(request, ctx.budget()).await?;
        let ranking = ranking_from_response(catalog, &response)?;
        let confidence = ranking.confidence;
        publish_ranking(ctx, ranking)?;
        Ok(Contribution::new(confidence))
    }
}

/// Map a service response onto catalog themes. Scores are normalized from
/// 0-100 to [0, 1]; labels the catalog does not know are dropped.
pub(crate) fn ranking_from_response(
    catalog: &ThemeCatalog,
    response: &RankingResponse,
) -> Result<ThemeRanking, SourceError> {
    if !response.confidence.is_finite() {
        return Err(SourceError::failure("non-finite ranking confidence"));
    }
    let mut scores = Vec::with_capacity(response.scores.len());
    for entry in &response.scores {
        if !entry.score.is_finite() || entry.similarity.is_some_and(|s| !s.is_finite()) {
            return Err(SourceError::failure(format!("non-finite score for '{}'", entry.label)));
        }
        let Some(theme) = catalog.themes.iter().find(|t| t.label.eq_ignore_ascii_case(&entry.label)) else {
            log::warn!("ranking service returned unknown label '{}'", entry.label);
            continue;
        };
        if scores.iter().any(|s: &ThemeScore| s.theme_id == theme.id) {
            continue;
        }
        scores.push(ThemeScore {
            theme_id: theme.id.clone(),
            label: theme.label.clone(),
            score: (entry.score / 100.0).clamp(0.0, 1.0),
            similarity: entry.similarity.map(|s| s.clamp(0.0, 1.0)),
        });
    }
    Ok(ThemeRanking::new(scores, response.confidence))
}

/// Stage the ranking together with the metrics and selection derived from
/// it.
pub(crate) fn publish_ranking(ctx: &SourceContext, ranking: ThemeRanking) -> Result<(), SourceError> {
    let selection = &ctx.config().selection;
    let metrics = ConfidenceMetrics::from_ranking(&ranking);
    let selected = select_themes(&ranking, selection.max_theme_count, selection.min_theme_score);
    ctx.write(Field::THEME_RANKING, FieldValue::Ranking(ranking))?;
    ctx.write(Field::CONFIDENCE_METRICS, FieldValue::Metrics(metrics))?;
    ctx.write(Field::SELECTED_THEMES, FieldValue::Themes(selected))?;
    Ok(())
}
