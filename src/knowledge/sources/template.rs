//! Template summaries: the deterministic route's producer and the fallback
//! when generation fails.

use async_trait::async_trait;

use crate::blackboard::{Field, FieldValue};
use crate::citations;
use crate::gate::Route;
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::model::{RetrievedPassage, SelectedTheme};
use crate::text;

/// Which contextual opening a message gets, by the words it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Anxiety,
    Sadness,
    Anger,
    Hurt,
    General,
}

impl Tone {
    pub fn detect(input: &str) -> Tone {
        let words = text::term_set(input);
        let any = |list: &[&str]| list.iter().any(|w| words.contains(*w));
        if any(&["anxiety", "anxious", "worried", "panic"]) {
            Tone::Anxiety
        } else if any(&["depressed", "depression", "sad", "hopeless"]) {
            Tone::Sadness
        } else if any(&["angry", "anger", "rage", "furious"]) {
            Tone::Anger
        } else if any(&["hurt", "pain", "trauma", "abuse", "abused"]) {
            Tone::Hurt
        } else {
            Tone::General
        }
    }

    fn opening(self) -> &'static str {
        match self {
            Tone::Anxiety => {
                "It sounds like worry has been taking up a lot of room lately, and that is exhausting to carry."
            }
            Tone::Sadness => "It sounds like you have been carrying a heavy sadness, and it makes sense that it feels hard.",
            Tone::Anger => "It sounds like something has left you angry, and that anger is telling you something mattered.",
            Tone::Hurt => "It sounds like you have been hurt, and what you went through deserves to be taken seriously.",
            Tone::General => "Thank you for sharing what you are going through; putting it into words takes courage.",
        }
    }
}

/// Builds the summary from fixed templates without calling any service.
pub struct TemplateSummary {
    descriptor: SourceDescriptor,
}

impl TemplateSummary {
    pub fn new() -> Self {
        Self {
            descriptor: SourceDescriptor::new("template_summary")
                .priority(30)
                .inputs([
                    Field::USER_INPUT,
                    Field::SAFETY_SCAN,
                    Field::SELECTED_THEMES,
                    Field::PASSAGES,
                    Field::ROUTE,
                ])
                .outputs([Field::SUMMARY, Field::CITATIONS])
                .timeout_ms(500)
                .primary_in([Route::Deterministic])
                .fallback_elsewhere(),
        }
    }

    /// Summary text, with a `⁽1⁾` marker when a passage is quoted.
    ///
    /// A safety match always opens with crisis support and is never answered
    /// as off-topic.
    pub fn compose(input: &str, selected: &[SelectedTheme], passages: &[RetrievedPassage], safety_hit: bool) -> String {
        if selected.is_empty() && !safety_hit {
            return off_topic(input);
        }

        let mut out = if safety_hit {
            String::from(SAFETY_SUPPORT)
        } else {
            String::from(Tone::detect(input).opening())
        };
        if selected.is_empty() {
            out.push_str(CLOSING);
            return out;
        }

        let labels: Vec<String> = selected.iter().map(|t| t.label.to_lowercase()).collect();
        out.push_str(&format!(
            " Themes that may speak to your experience: {}.",
            labels.join(", ")
        ));
        if let Some(first) = passages.first() {
            let sentence = text::first_sentence(&first.text);
            if !sentence.is_empty() {
                out.push_str(&format!(" One reflection that others have found helpful: \"{sentence}\"{}", citations::marker(1)));
            }
        }
        out.push_str(CLOSING);
        out
    }
}

impl Default for TemplateSummary {
    fn default() -> Self {
        Self::new()
    }
}

const SAFETY_SUPPORT: &str = "It sounds like you may be having thoughts of ending your life or hurting yourself, \
     and I am really glad you said it out loud. Please reach out right now to a crisis line or your local \
     emergency number, and let someone you trust know how you are feeling.";

const CLOSING: &str = " You do not have to work through this alone.";

fn off_topic(input: &str) -> String {
    let shown = text::preview(input.trim(), 80);
    let ack = if shown.is_empty() {
        "Thanks for reaching out.".to_string()
    } else {
        format!("Thanks for your message about \"{shown}\".")
    };
    format!(
        "{ack} This assistant focuses on trauma recovery and emotional well-being, so it is not the right place \
         for a detailed answer on that topic. If something has been weighing on you, feel free to share it and \
         we can explore it together."
    )
}

#[async_trait]
impl KnowledgeSource for TemplateSummary {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let input = ctx.require(Field::USER_INPUT, FieldValue::as_text)?;
        let selected = ctx.require(Field::SELECTED_THEMES, FieldValue::as_themes)?;
        let passages = ctx.require(Field::PASSAGES, FieldValue::as_passages)?;
        let safety_hit = ctx.require(Field::SAFETY_SCAN, FieldValue::as_safety)?.matched();

        let composed = Self::compose(input, selected, passages, safety_hit);
        let sanitized = citations::sanitize(&composed, passages, ctx.config().thresholds.min_citation_similarity);
        ctx.write(Field::SUMMARY, FieldValue::Text(sanitized.text))?;
        ctx.write(Field::CITATIONS, FieldValue::Citations(sanitized.citations))?;
        Ok(Contribution::new(0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_tone_detection() {
        assert_eq!(Tone::detect("I'm so anxious all the time"), Tone::Anxiety);
        assert_eq!(Tone::detect("I feel sad and empty"), Tone::Sadness);
        assert_eq!(Tone::detect("pure rage"), Tone::Anger);
        assert_eq!(Tone::detect("the abuse still hurts"), Tone::Hurt);
        assert_eq!(Tone::detect("hello there"), Tone::General);
    }

    #[test]
    fn test_off_topic_acknowledges_input() {
        let summary = TemplateSummary::compose("What is quantum physics?", &[], &[], false);
        assert!(summary.contains("What is quantum physics?"));
        assert!(summary.contains("trauma recovery"));
        assert!(summary.chars().count() >= 120);
        assert!(citations::extract_markers(&summary).is_empty());
    }

    #[tokio::test]
    async fn test_safety_match_without_themes_is_never_off_topic() {
        for input in ["sometimes I think about suicide", "I want to kill myself", "I feel suicidal and hopeless"] {
            let store = testing::seeded(input);
            testing::advance(&store, &["theme_scorer", "passage_retriever"]).await;
            testing::write_route(&store, Route::QualityFirst);
            let source = testing::source("template_summary");
            let ctx = testing::context(&store, &source);
            source.contribute(&ctx).await.unwrap();

            let staged = ctx.into_staged();
            let summary = staged[0].1.as_text().unwrap();
            assert!(summary.contains("crisis line"), "{input}: {summary}");
            assert!(!summary.contains("not the right place"), "{input}: {summary}");
            assert!(summary.chars().count() >= 120);
            assert!(staged[1].1.as_citations().unwrap().is_empty());
        }
    }

    #[test]
    fn test_safety_match_keeps_theme_reflection() {
        let theme = SelectedTheme {
            theme_id: "grief".into(),
            label: "Grief".into(),
            score: 0.8,
        };
        let summary = TemplateSummary::compose("I feel hopeless since the loss", &[theme], &[], true);
        assert!(summary.starts_with("It sounds like you may be having thoughts"));
        assert!(summary.contains("grief"));
        assert!(summary.ends_with("alone."));
    }

    #[tokio::test]
    async fn test_on_topic_quotes_first_passage() {
        let store = testing::seeded("I feel anxious, worried and full of panic and fear");
        testing::advance(&store, &["theme_scorer", "passage_retriever"]).await;
        testing::write_route(&store, Route::Balanced);
        let source = testing::source("template_summary");
        let ctx = testing::context(&store, &source);
        source.contribute(&ctx).await.unwrap();

        let staged = ctx.into_staged();
        let summary = staged[0].1.as_text().unwrap();
        assert!(summary.starts_with("It sounds like worry"));
        assert!(summary.contains("anxiety"));
        let cites = staged[1].1.as_citations().unwrap();
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].marker, 1);
    }
}
