//! Passage retrieval for the selected themes.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::blackboard::{Field, FieldValue};
use crate::config::RetrievalConfig;
use crate::knowledge::{Contribution, KnowledgeSource, SourceContext, SourceDescriptor, SourceError};
use crate::model::{RetrievedPassage, SelectedTheme};
use crate::services::{SearchRequest, SearchService};
use crate::text;
use crate::themes::ThemeCatalog;

/// Searches passages theme by theme through the similarity service.
pub struct PassageRetriever {
    descriptor: SourceDescriptor,
    search: Arc<SearchService>,
    catalog: Arc<ThemeCatalog>,
}

impl PassageRetriever {
    pub fn new(search: Arc<SearchService>, catalog: Arc<ThemeCatalog>) -> Self {
        Self {
            descriptor: SourceDescriptor::new("passage_retriever")
                .priority(80)
                .inputs([Field::NORMALIZED_TEXT, Field::SELECTED_THEMES])
                .outputs([Field::PASSAGES])
                .timeout_ms(3_000)
                .confidence_threshold(0.1),
            search,
            catalog,
        }
    }
}

#[async_trait]
impl KnowledgeSource for PassageRetriever {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let query = ctx.require(Field::NORMALIZED_TEXT, FieldValue::as_text)?;
        let selected = ctx.require(Field::SELECTED_THEMES, FieldValue::as_themes)?;
        let retrieval = &ctx.config().retrieval;

        if selected.is_empty() {
            ctx.write(Field::PASSAGES, FieldValue::Passages(Vec::new()))?;
            return Ok(Contribution::certain());
        }

        let searches = selected.iter().map(|theme| {
            let request = SearchRequest {
                query: query.to_string(),
                labels: Some(vec![theme.label.clone()]),
                limit: retrieval.passages_per_theme,
            };
            self.search.invoke(request, ctx.budget())
        });
        let responses = try_join_all(searches).await?;

        let mut seen = HashSet::new();
        let mut passages = Vec::new();
        for (theme, response) in selected.iter().zip(responses) {
            for hit in response.hits {
                if hit.similarity <= 0.0 || !seen.insert(hit.passage_id.clone()) {
                    continue;
                }
                let Some((theme_id, passage)) = self.catalog.passage(&hit.passage_id) else {
                    log::warn!(
                        "[{}] search returned unknown passage '{}' for theme '{}'",
                        ctx.request_id(),
                        hit.passage_id,
                        theme.theme_id
                    );
                    continue;
                };
                passages.push(RetrievedPassage {
                    passage_id: passage.id.clone(),
                    theme_id: theme_id.to_string(),
                    text: passage.text.clone(),
                    similarity: hit.similarity.clamp(0.0, 1.0),
                    source_title: passage.source_title.clone(),
                });
            }
        }
        passages.truncate(retrieval.max_passages);

        let confidence = mean_similarity(&passages);
        ctx.write(Field::PASSAGES, FieldValue::Passages(passages))?;
        Ok(Contribution::new(confidence))
    }
}

// ---------------------------------------------------------------------------
// CatalogExcerpts
// ---------------------------------------------------------------------------

/// Takes the leading passages of each selected theme straight from the
/// catalog. Fallback-only: it runs when the search service fails.
pub struct CatalogExcerpts {
    descriptor: SourceDescriptor,
}

impl CatalogExcerpts {
    pub fn new() -> Self {
        Self {
            descriptor: SourceDescriptor::new("catalog_excerpts")
                .priority(40)
                .inputs([Field::NORMALIZED_TEXT, Field::SELECTED_THEMES, Field::THEME_CATALOG])
                .outputs([Field::PASSAGES])
                .timeout_ms(500)
                .fallback(),
        }
    }

    pub fn excerpts(
        query: &str,
        selected: &[SelectedTheme],
        catalog: &ThemeCatalog,
        retrieval: &RetrievalConfig,
    ) -> Vec<RetrievedPassage> {
        let tf = text::term_frequencies(query);
        let mut passages: Vec<RetrievedPassage> = selected
            .iter()
            .filter_map(|s| catalog.get(&s.theme_id))
            .flat_map(|theme| {
                theme.passages.iter().take(retrieval.passages_per_theme).map(|p| RetrievedPassage {
                    passage_id: p.id.clone(),
                    theme_id: theme.id.clone(),
                    text: p.text.clone(),
                    similarity: text::cosine(&tf, &text::term_frequencies(&p.text)),
                    source_title: p.source_title.clone(),
                })
            })
            .collect();
        passages.truncate(retrieval.max_passages);
        passages
    }
}

impl Default for CatalogExcerpts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeSource for CatalogExcerpts {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError> {
        let query = ctx.require(Field::NORMALIZED_TEXT, FieldValue::as_text)?;
        let selected = ctx.require(Field::SELECTED_THEMES, FieldValue::as_themes)?;
        let catalog = ctx.require(Field::THEME_CATALOG, FieldValue::as_catalog)?;
        let passages = Self::excerpts(query, selected, catalog, &ctx.config().retrieval);
        ctx.write(Field::PASSAGES, FieldValue::Passages(passages))?;
        Ok(Contribution::new(0.5))
    }
}

fn mean_similarity(passages: &[RetrievedPassage]) -> f64 {
    if passages.is_empty() {
        return 0.0;
    }
    passages.iter().map(|p| p.similarity).sum::<f64>() / passages.len() as f64
}
