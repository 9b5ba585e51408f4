//! Generative summary, scheduled in the balanced and quality-first routes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::blackboard::{Field, FieldValue};
use crate::citations;
use crate::config::EngineConfig;
use crate::gate::Route;
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::model::{RetrievedPassage, SelectedTheme};
use crate::services::{Budget, GenerationRequest, GenerationService, PromptPassage};

/// Asks the generation service for a cited summary, then strips any marker
/// that does not point to a retrieved passage.
///
/// Without retrieved passages the service is still called, ungrounded, when
/// the route is quality-first or the input matched a safety term.
pub struct SummaryGenerator {
    descriptor: SourceDescriptor,
    generation: Arc<GenerationService>,
}

impl SummaryGenerator {
    pub fn new(generation: Arc<GenerationService>) -> Self {
        Self {
            descriptor: SourceDescriptor::new("summary_generator")
                .priority(60)
                .inputs([
                    Field::USER_INPUT,
                    Field::SAFETY_SCAN,
                    Field::SELECTED_THEMES,
                    Field::PASSAGES,
                    Field::ROUTE,
                ])
                .outputs([Field::SUMMARY, Field::CITATIONS])
                .timeout_ms(8_000)
                .confidence_threshold(0.5)
                .primary_in([Route::Balanced, Route::QualityFirst]),
            generation,
        }
    }
}

#[async_trait]
impl KnowledgeSource for SummaryGenerator {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// The mode budget's timeout once the route is known.
    fn timeout(&self, route: Option<Route>, config: &EngineConfig) -> Duration {
        match route {
            Some(route) => config.modes.for_route(route).timeout(),
            None => self.descriptor.timeout(),
        }
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let input = ctx.require(Field::USER_INPUT, FieldValue::as_text)?;
        let selected = ctx.require(Field::SELECTED_THEMES, FieldValue::as_themes)?;
        let passages = ctx.require(Field::PASSAGES, FieldValue::as_passages)?;
        let decision = ctx.require(Field::ROUTE, FieldValue::as_route)?;
        let safety_hit = ctx.require(Field::SAFETY_SCAN, FieldValue::as_safety)?.matched();

        if passages.is_empty() && !(safety_hit || decision.route == Route::QualityFirst) {
            return Err(SourceError::failure("no retrieved passages to ground a summary"));
        }

        let mode = ctx.config().modes.for_route(decision.route);
        let request = GenerationRequest {
            prompt: build_prompt(input, selected, decision.route, !passages.is_empty(), safety_hit),
            passages: prompt_passages(selected, passages),
            max_tokens: mode.max_tokens,
            temperature: mode.temperature,
            timeout_ms: mode.timeout_ms,
            safety_hit,
        };
        let budget = Budget {
            max_tokens: mode.max_tokens,
            ..ctx.budget()
        };
        log::debug!(
            "[{}] summary_generator: {} route, {} passages, max {} tokens",
            ctx.request_id(),
            decision.route,
            request.passages.len(),
            mode.max_tokens
        );

        let response = self.generation.invoke(request, budget).await?;
        let min_similarity = ctx.config().thresholds.min_citation_similarity;
        let sanitized = citations::sanitize(&response.text, passages, min_similarity);
        if sanitized.text.trim().is_empty() {
            return Err(SourceError::failure("generation service returned an empty summary"));
        }
        if sanitized.removed > 0 {
            log::warn!(
                "[{}] removed {} invalid citation marker(s) from generated summary",
                ctx.request_id(),
                sanitized.removed
            );
        }

        let found = sanitized.citations.len() + sanitized.removed;
        let confidence = if found == 0 {
            0.6
        } else {
            sanitized.citations.len() as f64 / found as f64
        };
        ctx.write(Field::SUMMARY, FieldValue::Text(sanitized.text))?;
        ctx.write(Field::CITATIONS, FieldValue::Citations(sanitized.citations))?;
        Ok(Contribution::new(confidence))
    }
}

fn build_prompt(input: &str, selected: &[SelectedTheme], route: Route, grounded: bool, safety_hit: bool) -> String {
    let labels: Vec<&str> = selected.iter().map(|t| t.label.as_str()).collect();
    let depth = match route {
        Route::QualityFirst => "Take care to be thorough and gentle; the message may describe acute distress.",
        _ => "Keep the response short and warm.",
    };
    let sources = if grounded {
        "Respond with empathy, drawing only on the numbered passages provided. \
         Cite a passage by writing its number as a superscript marker such as ⁽1⁾ right after the sentence it supports. \
         Never cite a number that is not in the list."
    } else {
        "No passages are available. Respond with empathy in your own words and do not use citation markers."
    };
    let mut prompt = format!(
        "You support people recovering from difficult experiences.\n\
         The person wrote: \"{input}\"\n\
         Themes identified: {themes}.\n\
         {sources}\n\
         {depth}",
        themes = if labels.is_empty() { "none".to_string() } else { labels.join(", ") },
    );
    if safety_hit {
        prompt.push_str(
            "\nThe message may mention self-harm. Acknowledge it directly and encourage contacting \
             a crisis line or local emergency services now.",
        );
    }
    prompt
}

fn prompt_passages(selected: &[SelectedTheme], passages: &[RetrievedPassage]) -> Vec<PromptPassage> {
    passages
        .iter()
        .enumerate()
        .map(|(idx, p)| PromptPassage {
            marker: idx + 1,
            theme_label: selected
                .iter()
                .find(|t| t.theme_id == p.theme_id)
                .map(|t| t.label.clone())
                .unwrap_or_else(|| p.theme_id.clone()),
            text: p.text.clone(),
            source_title: p.source_title.clone(),
        })
        .collect()
}
