//! Partial quality check of the theme selection, run alongside retrieval.

use async_trait::async_trait;

use crate::blackboard::{Field, FieldValue};
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::model::ThemeCheck;

pub struct ThemeCheckSource {
    descriptor: SourceDescriptor,
}

impl ThemeCheckSource {
    pub fn new() -> Self {
        Self {
            descriptor: SourceDescriptor::new("theme_check")
                .priority(70)
                .inputs([Field::SELECTED_THEMES, Field::THEME_RANKING])
                .outputs([Field::THEME_CHECK])
                .timeout_ms(200),
        }
    }
}

impl Default for ThemeCheckSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeSource for ThemeCheckSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let selected = ctx.require(Field::SELECTED_THEMES, FieldValue::as_themes)?;
        let ranking = ctx.require(Field::THEME_RANKING, FieldValue::as_ranking)?;
        let selection = &ctx.config().selection;

        let check = ThemeCheck::evaluate(selected, ranking, selection.max_theme_count, selection.min_theme_score);
        if !check.conforming() {
            log::warn!(
                "[{}] theme selection does not conform: {} selected (max {}), below floor {:?}, unranked {:?}",
                ctx.request_id(),
                check.selected,
                check.max_allowed,
                check.below_floor,
                check.unranked
            );
        }
        let score = check.score();
        ctx.write(Field::THEME_CHECK, FieldValue::ThemeCheck(check))?;
        Ok(Contribution::new(score))
    }
}

#[cfg(test)]
mod tests {
    use crate::testing;

    #[tokio::test]
    async fn test_checks_scorer_selection() {
        let store = testing::seeded("I feel anxious, worried and full of panic and fear");
        testing::advance(&store, &["theme_scorer"]).await;
        let source = testing::source("theme_check");
        let ctx = testing::context(&store, &source);
        let contribution = source.contribute(&ctx).await.unwrap();
        assert_eq!(contribution.confidence, 1.0);

        let staged = ctx.into_staged();
        let check = staged[0].1.as_theme_check().unwrap();
        assert!(check.conforming());
        assert_eq!(check.max_allowed, 3);
    }
}
