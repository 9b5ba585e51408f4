//! The standard knowledge sources.
//!
//! | source | role | writes |
//! |---|---|---|
//! | `theme_scorer` | primary | theme_ranking, confidence_metrics, selected_themes |
//! | `keyword_scorer` | fallback | theme_ranking, confidence_metrics, selected_themes |
//! | `progress_notifier` | primary | progress_notice |
//! | `passage_retriever` | primary | passages |
//! | `catalog_excerpts` | fallback | passages |
//! | `theme_check` | primary | theme_check |
//! | `summary_generator` | primary in balanced / quality_first | summary, citations |
//! | `template_summary` | primary in deterministic, fallback elsewhere | summary, citations |

pub mod generator;
pub mod keyword;
pub mod notifier;
pub mod retriever;
pub mod template;
pub mod theme_check;
pub mod theme_scorer;

use std::sync::Arc;

use crate::services::Services;
use crate::themes::ThemeCatalog;

use super::KnowledgeSource;

pub use generator::SummaryGenerator;
pub use keyword::KeywordScorer;
pub use notifier::ProgressNotifier;
pub use retriever::{CatalogExcerpts, PassageRetriever};
pub use template::TemplateSummary;
pub use theme_check::ThemeCheckSource;
pub use theme_scorer::ThemeScorer;

/// Every standard source, wired to `services`.
pub fn standard(catalog: Arc<ThemeCatalog>, services: &Services) -> Vec<Arc<dyn KnowledgeSource>> {
    vec![
        Arc::new(ThemeScorer::new(Arc::clone(&services.ranking))),
        Arc::new(KeywordScorer::new()),
        Arc::new(ProgressNotifier::new()),
        Arc::new(PassageRetriever::new(Arc::clone(&services.search), Arc::clone(&catalog))),
        Arc::new(CatalogExcerpts::new()),
        Arc::new(ThemeCheckSource::new()),
        Arc::new(SummaryGenerator::new(Arc::clone(&services.generation))),
        Arc::new(TemplateSummary::new()),
    ]
}
