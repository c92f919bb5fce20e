//! Ranking pipeline: embed, overfetch, score, filter, truncate.
//!
//! Similarity is derived from the squared euclidean distance the index
//! reports. For unit vectors `d = 2(1 - cos θ)`, so `1 - d/2` is the
//! cosine similarity. The query vector is normalised here; the index
//! rows are expected to be unit vectors already (hosted embedding models
//! and fastembed both emit normalised output). Rows that are not unit
//! length yield similarities outside `[0, 1]`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::places::PlaceRecord;
use crate::semantic::catalog::PlaceCatalog;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{normalize, IndexError};

/// How many neighbours to request per wanted result.
pub const DEFAULT_OVERFETCH: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("invalid search settings: {0}")]
    InvalidConfig(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Per-query selection settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    min_similarity: f32,
    max_results: usize,
}

impl SearchConfig {
    pub fn new(min_similarity: f32, max_results: usize) -> Result<Self, RankingError> {
        if !(0.0..=1.0).contains(&min_similarity) {
            return Err(RankingError::InvalidConfig(format!(
                "min_similarity must be between 0.0 and 1.0, got {min_similarity}"
            )));
        }
        if max_results == 0 {
            return Err(RankingError::InvalidConfig(
                "max_results must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            min_similarity,
            max_results,
        })
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }
}

/// A place that survived ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub place: PlaceRecord,
    pub distance: f32,
    pub similarity: f32,
}

/// Convert squared L2 distance between unit vectors to cosine similarity.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

pub struct Ranker {
    embedder: Arc<dyn EmbeddingProvider>,
    catalog: Arc<PlaceCatalog>,
    overfetch: usize,
}

impl Ranker {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, catalog: Arc<PlaceCatalog>) -> Self {
        Self {
            embedder,
            catalog,
            overfetch: DEFAULT_OVERFETCH,
        }
    }

    /// Set the overfetch factor. Values below 1 are clamped to 1.
    pub fn with_overfetch(mut self, overfetch: usize) -> Self {
        self.overfetch = overfetch.max(1);
        self
    }

    pub fn catalog(&self) -> &PlaceCatalog {
        &self.catalog
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Rank places against `query_text`.
    ///
    /// Returns at most `max_results` candidates with
    /// `similarity >= min_similarity`, most similar first. An empty list
    /// means nothing cleared the threshold.
    pub fn rank(
        &self,
        query_text: &str,
        config: &SearchConfig,
    ) -> Result<Vec<ScoredCandidate>, RankingError> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(RankingError::EmptyQuery);
        }

        let mut query = self.embedder.embed(query_text)?;
        normalize(&mut query).map_err(|e| {
            RankingError::EmbeddingUnavailable(EmbeddingError::InvalidResponse(e.to_string()))
        })?;

        let k = config.max_results().saturating_mul(self.overfetch);
        let neighbors = self.catalog.nearest(&query, k).map_err(|e| match e {
            IndexError::DimensionMismatch { expected, got } => RankingError::Configuration(format!(
                "index has {expected} dimensions but model '{}' produced {got}",
                self.embedder.name()
            )),
            other => RankingError::Configuration(other.to_string()),
        })?;

        let fetched = neighbors.len();
        let candidates: Vec<ScoredCandidate> = neighbors
            .into_iter()
            .map(|n| ScoredCandidate {
                place: n.place.clone(),
                distance: n.distance,
                similarity: similarity_from_distance(n.distance),
            })
            .filter(|c| c.similarity >= config.min_similarity())
            .take(config.max_results())
            .collect();

        log::debug!(
            "ranked query: fetched={fetched} kept={} min_similarity={} max_results={}",
            candidates.len(),
            config.min_similarity(),
            config.max_results()
        );

        Ok(candidates)
    }
}
