//! Query handling: rank places, then put them on the map.

use std::time::Instant;

use serde::Serialize;

use crate::config::SearchDefaults;
use crate::geocode::{Coordinates, GeocodeResolver};
use crate::semantic::{Ranker, RankingError, ScoredCandidate, SearchConfig};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<RankingError> for SearchError {
    fn from(err: RankingError) -> Self {
        match err {
            RankingError::EmptyQuery | RankingError::InvalidConfig(_) => {
                SearchError::InvalidInput(err.to_string())
            }
            RankingError::EmbeddingUnavailable(e) => SearchError::EmbeddingUnavailable(e.to_string()),
            RankingError::Configuration(msg) => SearchError::Configuration(msg),
        }
    }
}

/// Fill in configured defaults and check user-supplied settings against
/// `max_results_limit`. Shared by the web handlers and the CLI.
pub fn search_settings(
    defaults: &SearchDefaults,
    min_similarity: Option<f32>,
    max_results: Option<usize>,
) -> Result<SearchConfig, SearchError> {
    let max_results = max_results.unwrap_or(defaults.max_results);
    if max_results > defaults.max_results_limit {
        return Err(SearchError::InvalidInput(format!(
            "max_results must be at most {}",
            defaults.max_results_limit
        )));
    }

    SearchConfig::new(
        min_similarity.unwrap_or(defaults.min_similarity),
        max_results,
    )
    .map_err(Into::into)
}

/// One ranked place and, when geocoding succeeded, its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceMatch {
    #[serde(flatten)]
    pub candidate: ScoredCandidate,
    pub location: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub config: SearchConfig,
    pub matches: Vec<PlaceMatch>,
}

impl SearchResponse {
    /// No place cleared the similarity threshold.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Matches that can be drawn on the map.
    pub fn mapped(&self) -> impl Iterator<Item = (&ScoredCandidate, Coordinates)> {
        self.matches
            .iter()
            .filter_map(|m| m.location.map(|loc| (&m.candidate, loc)))
    }
}

/// Everything a query needs, built once at startup and shared read-only.
pub struct PlaceSearch {
    ranker: Ranker,
    resolver: GeocodeResolver,
    parallel_geocoding: bool,
}

impl PlaceSearch {
    pub fn new(ranker: Ranker, resolver: GeocodeResolver, parallel_geocoding: bool) -> Self {
        Self {
            ranker,
            resolver,
            parallel_geocoding,
        }
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Rank without geocoding.
    pub fn rank(&self, query: &str, config: &SearchConfig) -> Result<Vec<ScoredCandidate>, SearchError> {
        Ok(self.ranker.rank(query, config)?)
    }

    /// Rank and geocode. Places that cannot be located stay in the
    /// result with `location: None`.
    pub fn search(&self, query: &str, config: &SearchConfig) -> Result<SearchResponse, SearchError> {
        let now = Instant::now();
        let candidates = self.rank(query, config)?;
        let locations = self.resolver.resolve_all(&candidates, self.parallel_geocoding);

        let matches: Vec<PlaceMatch> = candidates
            .into_iter()
            .zip(locations)
            .map(|(candidate, location)| match location {
                Ok(coords) => PlaceMatch {
                    candidate,
                    location: Some(coords),
                    location_error: None,
                },
                Err(err) => PlaceMatch {
                    candidate,
                    location: None,
                    location_error: Some(err.reason),
                },
            })
            .collect();

        log::info!(
            "search done: results={} mapped={} in {:?}",
            matches.len(),
            matches.iter().filter(|m| m.location.is_some()).count(),
            now.elapsed()
        );

        Ok(SearchResponse {
            query: query.trim().to_string(),
            config: *config,
            matches,
        })
    }
}
