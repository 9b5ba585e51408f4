//! Deterministic in-process collaborators.
//!
//! These make the engine usable without any remote service and give tests
//! reproducible behaviour. Scoring is lexical: a hybrid of bag-of-words
//! cosine (dense) and Jaccard overlap (sparse).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use super::{
    Budget, Collaborator, GenerationRequest, GenerationResponse, LabelScore, PromptPassage, RankingRequest,
    RankingResponse, SearchHit, SearchRequest, SearchResponse, ServiceError,
};
use crate::citations;
use crate::gate::metrics::normalized_entropy;
use crate::text;
use crate::themes::ThemeCatalog;

// ---------------------------------------------------------------------------
// LexicalRanker
// ---------------------------------------------------------------------------

const DENSE_WEIGHT: f64 = 0.6;
const SPARSE_WEIGHT: f64 = 0.4;
/// Multiplier applied when the label appears verbatim in the input.
const LABEL_BOOST: f64 = 1.5;

#[derive(Debug, Clone)]
struct ThemeProfile {
    tf: HashMap<String, f64>,
    terms: HashSet<String>,
}

impl ThemeProfile {
    fn from_text(text: &str) -> Self {
        Self {
            tf: text::term_frequencies(text),
            terms: text::term_set(text),
        }
    }
}

/// Ranking service over the theme catalog.
#[derive(Debug, Clone)]
pub struct LexicalRanker {
    /// Keyed by lower-cased label.
    profiles: HashMap<String, ThemeProfile>,
    /// Hybrid scores below this are treated as "no match" when computing
    /// confidence.
    relevance_floor: f64,
}

impl LexicalRanker {
    pub fn new(catalog: &ThemeCatalog, relevance_floor: f64) -> Self {
        let profiles = catalog
            .themes
            .iter()
            .map(|t| (t.label.to_lowercase(), ThemeProfile::from_text(&t.scoring_text())))
            .collect();
        Self {
            profiles,
            relevance_floor,
        }
    }

    /// Score every label against `input`.
    pub fn rank(&self, input: &str, labels: &[String]) -> RankingResponse {
        let normalized = text::normalize(input);
        let tf = text::term_frequencies(&normalized);
        let terms = text::term_set(&normalized);

        let mut hybrids = Vec::with_capacity(labels.len());
        let mut scores = Vec::with_capacity(labels.len());
        for label in labels {
            let key = label.to_lowercase();
            let fallback;
            let profile = match self.profiles.get(&key) {
                Some(p) => p,
                None => {
                    fallback = ThemeProfile::from_text(label);
                    &fallback
                }
            };

            let dense = text::cosine(&tf, &profile.tf);
            let sparse = text::jaccard(&terms, &profile.terms);
            let mut hybrid = DENSE_WEIGHT * dense + SPARSE_WEIGHT * sparse;
            if !key.is_empty() && normalized.contains(&key) {
                hybrid *= LABEL_BOOST;
            }
            let hybrid = hybrid.clamp(0.0, 1.0);

            hybrids.push(hybrid);
            scores.push(LabelScore {
                label: label.clone(),
                score: hybrid * 100.0,
                similarity: Some(dense),
            });
        }

        let confidence = self.confidence(&hybrids, &scores);
        RankingResponse { scores, confidence }
    }

    fn confidence(&self, hybrids: &[f64], scores: &[LabelScore]) -> f64 {
        let Some((top_idx, top)) = hybrids
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return 0.0;
        };
        if top < self.relevance_floor {
            // Clearly off-topic input: confident that nothing matches.
            if self.relevance_floor <= 0.0 {
                return 1.0;
            }
            return (1.0 - top / self.relevance_floor).clamp(0.0, 1.0);
        }
        let similarity = scores[top_idx].similarity.unwrap_or(top);
        (similarity * (1.0 - normalized_entropy(hybrids))).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Collaborator<RankingRequest, RankingResponse> for LexicalRanker {
    fn name(&self) -> &str {
        "lexical_ranker"
    }

    async fn invoke(&self, input: RankingRequest, budget: Budget) -> Result<RankingResponse, ServiceError> {
        if budget.expired() {
            return Err(ServiceError::Timeout(0));
        }
        Ok(self.rank(&input.text, &input.labels))
    }
}

// ---------------------------------------------------------------------------
// PassageIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct IndexedPassage {
    passage_id: String,
    theme_label: String,
    tf: HashMap<String, f64>,
}

/// In-memory similarity search over catalog passages.
#[derive(Debug, Clone, Default)]
pub struct PassageIndex {
    entries: Vec<IndexedPassage>,
}

impl PassageIndex {
    pub fn new(catalog: &ThemeCatalog) -> Self {
        let entries = catalog
            .themes
            .iter()
            .flat_map(|theme| {
                theme.passages.iter().map(move |p| IndexedPassage {
                    passage_id: p.id.clone(),
                    theme_label: theme.label.to_lowercase(),
                    tf: text::term_frequencies(&p.text),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Passages best first, ties broken by passage id.
    pub fn search(&self, query: &str, labels: Option<&[String]>, limit: usize) -> Vec<SearchHit> {
        let tf = text::term_frequencies(query);
        let allowed: Option<HashSet<String>> = labels.map(|ls| ls.iter().map(|l| l.to_lowercase()).collect());

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|e| allowed.as_ref().map_or(true, |a| a.contains(&e.theme_label)))
            .map(|e| SearchHit {
                passage_id: e.passage_id.clone(),
                similarity: text::cosine(&tf, &e.tf),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.passage_id.cmp(&b.passage_id))
        });
        hits.truncate(limit);
        hits
    }
}

#[async_trait]
impl Collaborator<SearchRequest, SearchResponse> for PassageIndex {
    fn name(&self) -> &str {
        "passage_index"
    }

    async fn invoke(&self, input: SearchRequest, budget: Budget) -> Result<SearchResponse, ServiceError> {
        if budget.expired() {
            return Err(ServiceError::Timeout(0));
        }
        Ok(SearchResponse {
            hits: self.search(&input.query, input.labels.as_deref(), input.limit),
        })
    }
}

// ---------------------------------------------------------------------------
// ExtractiveGenerator
// ---------------------------------------------------------------------------

/// Passages quoted per summary.
const MAX_QUOTED: usize = 4;

/// Builds a summary from the leading sentence of each offered passage,
/// citing each one. Without passages it answers with a short supportive
/// reply and no markers.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let out = if request.passages.is_empty() {
            ungrounded(request.safety_hit)
        } else {
            extract(&request.passages)
        };
        if request.max_tokens > 0 {
            return Ok(text::truncate_words(&out, request.max_tokens as usize));
        }
        Ok(out)
    }
}

fn ungrounded(safety_hit: bool) -> String {
    let mut out = String::from(
        "Thank you for trusting me with this. What you are feeling matters, and you deserve support that fits \
         where you are right now.",
    );
    if safety_hit {
        out.push_str(
            " If you are thinking about ending your life or hurting yourself, please contact a crisis line or your \
             local emergency number now, and reach out to someone you trust.",
        );
    }
    out.push_str(" You do not have to carry this alone.");
    out
}

fn extract(passages: &[PromptPassage]) -> String {
    let mut labels: Vec<&str> = Vec::new();
    for p in passages {
        if !labels.contains(&p.theme_label.as_str()) {
            labels.push(&p.theme_label);
        }
    }

    let mut out = format!(
        "What you describe connects with {}. Others who have walked this path put it this way:",
        join_labels(&labels)
    );
    for p in passages.iter().take(MAX_QUOTED) {
        let sentence = text::first_sentence(&p.text);
        if sentence.is_empty() {
            continue;
        }
        out.push(' ');
        out.push_str(&sentence);
        out.push_str(&citations::marker(p.marker));
    }
    out.push_str(" Healing is rarely a straight line, and support along the way makes a difference.");
    out
}

fn join_labels(labels: &[&str]) -> String {
    let lower: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    match lower.len() {
        0 => "your experience".to_string(),
        1 => lower[0].clone(),
        n => format!("{} and {}", lower[..n - 1].join(", "), lower[n - 1]),
    }
}

#[async_trait]
impl Collaborator<GenerationRequest, GenerationResponse> for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive_generator"
    }

    async fn invoke(&self, input: GenerationRequest, budget: Budget) -> Result<GenerationResponse, ServiceError> {
        if budget.expired() {
            return Err(ServiceError::Timeout(input.timeout_ms));
        }
        self.generate(&input).map(|text| GenerationResponse { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::time::Duration;

    #[test]
    fn test_ranker_prefers_matching_theme() {
        let catalog = testing::catalog();
        let ranker = LexicalRanker::new(&catalog, 0.2);
        let resp = ranker.rank("I feel anxious, worried and full of panic and fear", &catalog.labels());
        let best = resp
            .scores
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        assert_eq!(best.label, "Anxiety");
        assert!(best.score > 20.0);
        assert!(resp.scores.iter().all(|s| (0.0..=100.0).contains(&s.score)));
    }

    #[test]
    fn test_ranker_off_topic_is_confident_no_match() {
        let catalog = testing::catalog();
        let ranker = LexicalRanker::new(&catalog, 0.2);
        let resp = ranker.rank("What is quantum physics?", &catalog.labels());
        assert!(resp.scores.iter().all(|s| s.score == 0.0));
        assert_eq!(resp.confidence, 1.0);
    }

    #[test]
    fn test_ranker_label_boost() {
        let catalog = testing::catalog();
        let ranker = LexicalRanker::new(&catalog, 0.2);
        let plain = ranker.rank("worry", &["Anxiety".to_string()]).scores[0].score;
        let boosted = ranker.rank("worry anxiety", &["Anxiety".to_string()]).scores[0].score;
        assert!(boosted > plain);
    }

    #[test]
    fn test_index_search_restricted() {
        let catalog = testing::catalog();
        let index = PassageIndex::new(&catalog);
        let all = index.search("panic and worry", None, 10);
        assert_eq!(all.len(), index.len());
        assert!(all.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let only = index.search("panic", Some(&["Grief".to_string()]), 10);
        assert!(only.iter().all(|h| h.passage_id.starts_with("grief")));
    }

    #[test]
    fn test_generator_cites_every_quoted_passage() {
        let request = GenerationRequest {
            prompt: "help".into(),
            passages: vec![
                PromptPassage {
                    marker: 1,
                    theme_label: "Anxiety".into(),
                    text: "Worry narrows the world. It passes.".into(),
                    source_title: None,
                },
                PromptPassage {
                    marker: 2,
                    theme_label: "Grief".into(),
                    text: "Grief comes in waves".into(),
                    source_title: None,
                },
            ],
            max_tokens: 0,
            temperature: 0.0,
            timeout_ms: 100,
            safety_hit: false,
        };
        let text = ExtractiveGenerator::new().generate(&request).unwrap();
        assert_eq!(citations::extract_markers(&text), vec![1, 2]);
        assert!(text.contains("anxiety and grief"));
        assert!(text.contains("Grief comes in waves.⁽2⁾"));
    }

    #[test]
    fn test_generator_without_passages_answers_ungrounded() {
        let mut request = GenerationRequest {
            prompt: "help".into(),
            passages: vec![],
            max_tokens: 100,
            temperature: 0.3,
            timeout_ms: 100,
            safety_hit: false,
        };
        let plain = ExtractiveGenerator::new().generate(&request).unwrap();
        assert!(citations::extract_markers(&plain).is_empty());
        assert!(!plain.contains("crisis line"));

        request.safety_hit = true;
        let safety = ExtractiveGenerator::new().generate(&request).unwrap();
        assert!(citations::extract_markers(&safety).is_empty());
        assert!(safety.contains("crisis line"));
        assert!(safety.chars().count() >= 120);
    }

    #[tokio::test]
    async fn test_expired_budget_times_out() {
        let catalog = testing::catalog();
        let ranker = LexicalRanker::new(&catalog, 0.2);
        let req = RankingRequest {
            text: "x".into(),
            labels: catalog.labels(),
        };
        let result = ranker.invoke(req, Budget::new(0, Duration::ZERO)).await;
        assert_eq!(result, Err(ServiceError::Timeout(0)));
    }
}
