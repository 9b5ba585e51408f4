//! External collaborators: ranking, similarity search and text generation.
//!
//! Every collaborator has the same shape:
//! `invoke(input, budget) -> output | timeout | error`. The engine ships
//! deterministic in-process implementations ([`local`]) and a JSON-over-HTTP
//! adapter ([`http`]) for remote ones.

pub mod http;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::themes::ThemeCatalog;

pub use http::HttpCollaborator;
pub use local::{ExtractiveGenerator, LexicalRanker, PassageIndex};

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Resource budget for one collaborator call.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    /// Upper bound on generated tokens. Zero for non-generative calls.
    pub max_tokens: u32,
    /// The call must finish by this instant.
    pub deadline: Instant,
}

impl Budget {
    pub fn new(max_tokens: u32, timeout: Duration) -> Self {
        Self {
            max_tokens,
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline (zero once it has passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a collaborator call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// The call did not finish within its budget.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The service could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a non-success status.
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be decoded or is structurally invalid.
    #[error("malformed response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Collaborator trait
// ---------------------------------------------------------------------------

/// A service the engine calls out to.
#[async_trait]
pub trait Collaborator<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Perform one call within `budget`.
    async fn invoke(&self, input: I, budget: Budget) -> Result<O, ServiceError>;
}

pub type RankingService = dyn Collaborator<RankingRequest, RankingResponse>;
pub type SearchService = dyn Collaborator<SearchRequest, SearchResponse>;
pub type GenerationService = dyn Collaborator<GenerationRequest, GenerationResponse>;

/// The three collaborators the standard knowledge sources call.
#[derive(Clone)]
pub struct Services {
    pub ranking: Arc<RankingService>,
    pub search: Arc<SearchService>,
    pub generation: Arc<GenerationService>,
}

impl Services {
    /// In-process implementations over `catalog`.
    pub fn local(catalog: &ThemeCatalog, relevance_floor: f64) -> Self {
        Self {
            ranking: Arc::new(LexicalRanker::new(catalog, relevance_floor)),
            search: Arc::new(PassageIndex::new(catalog)),
            generation: Arc::new(ExtractiveGenerator::new()),
        }
    }

    pub fn with_ranking(mut self, ranking: Arc<RankingService>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_search(mut self, search: Arc<SearchService>) -> Self {
        self.search = search;
        self
    }

    pub fn with_generation(mut self, generation: Arc<GenerationService>) -> Self {
        self.generation = generation;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("ranking", &self.ranking.name())
            .field("search", &self.search.name())
            .field("generation", &self.generation.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Score how relevant each candidate label is to `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRequest {
    pub text: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    /// Relevance on a 0-100 scale.
    pub score: f64,
    #[serde(default)]
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResponse {
    pub scores: Vec<LabelScore>,
    /// Service confidence in [0, 1].
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Similarity search
// ---------------------------------------------------------------------------

/// Find passages similar to `query`, optionally restricted to themes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Theme labels to search within; `None` searches everything.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub passage_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Best first.
    pub hits: Vec<SearchHit>,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// A passage offered to the generator, addressable by its 1-based marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPassage {
    pub marker: usize,
    pub theme_label: String,
    pub text: String,
    #[serde(default)]
    pub source_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub passages: Vec<PromptPassage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
    /// The input matched a safety term.
    #[serde(default)]
    pub safety_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text with citation markers.
    pub text: String,
}
