//! Early progress notice for streaming callers.

use async_trait::async_trait;

use crate::blackboard::{Field, FieldValue};
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::text;

/// Writes a short "working on it" message in the first phase so a streaming
/// caller has something to show before the slower phases finish.
pub struct ProgressNotifier {
    descriptor: SourceDescriptor,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self {
            descriptor: SourceDescriptor::new("progress_notifier")
                .priority(90)
                .inputs([Field::USER_INPUT])
                .outputs([Field::PROGRESS_NOTICE])
                .timeout_ms(200),
        }
    }

    pub fn notice(input: &str) -> String {
        match text::token_count(input) {
            0 => "Waiting for your message.".to_string(),
            1 => "Reading your message (1 word) and looking for related themes.".to_string(),
            n => format!("Reading your message ({n} words) and looking for related themes."),
        }
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeSource for ProgressNotifier {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let input = ctx.require(Field::USER_INPUT, FieldValue::as_text)?;
        ctx.write(Field::PROGRESS_NOTICE, FieldValue::Text(Self::notice(input)))?;
        Ok(Contribution::certain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_counts_words() {
        assert_eq!(
            ProgressNotifier::notice("I feel lost"),
            "Reading your message (3 words) and looking for related themes."
        );
        assert!(ProgressNotifier::notice("hello").contains("(1 word)"));
        assert_eq!(ProgressNotifier::notice("  "), "Waiting for your message.");
    }
}
