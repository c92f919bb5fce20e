use crate::{
    config::{Config, EmbeddingBackend, Secrets},
    geocode::{GeocodeResolver, GoogleGeocoder},
    search::PlaceSearch,
    semantic::{EmbeddingProvider, OpenAiEmbeddings, PlaceCatalog, Ranker},
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const BASE_PATH_VAR: &str = "PLACEFINDER_BASE_PATH";

/// Builds the long-lived components from config and secrets.
pub struct AppFactory;

impl AppFactory {
    /// Directory holding config.yaml, the index and the places table.
    pub fn base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var(BASE_PATH_VAR) {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/placefinder"))
    }

    pub fn load_config() -> Result<Config> {
        let base_path = Self::base_path()?;
        Config::load_with(&base_path)
            .with_context(|| format!("Failed to load config from {}", base_path.display()))
    }

    pub fn create_embedder(config: &Config, secrets: &Secrets) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedding = &config.embedding;
        match embedding.provider {
            EmbeddingBackend::Openai => {
                let api_key = secrets
                    .embedding_api_key
                    .clone()
                    .context("embedding api key is not set")?;
                let provider = OpenAiEmbeddings::new(
                    &embedding.endpoint,
                    &embedding.model,
                    api_key,
                    Some(Duration::from_secs(embedding.timeout_secs)),
                )?;
                log::info!("using hosted embeddings: {}", embedding.model);
                Ok(Arc::new(provider))
            }
            #[cfg(feature = "local-embeddings")]
            EmbeddingBackend::Local => {
                let provider = crate::semantic::LocalEmbeddings::new(
                    &embedding.model,
                    config.base_path().to_path_buf(),
                )?;
                log::info!("using local embeddings: {}", embedding.model);
                Ok(Arc::new(provider))
            }
            #[cfg(not(feature = "local-embeddings"))]
            EmbeddingBackend::Local => anyhow::bail!(
                "embedding.provider is 'local' but placefinder was built without the local-embeddings feature"
            ),
        }
    }

    /// Open the catalog. `expected_dimensions` comes from the embedding
    /// provider when it knows its output size.
    pub fn open_catalog(config: &Config, expected_dimensions: Option<usize>) -> Result<PlaceCatalog> {
        PlaceCatalog::open(
            &config.index_path(),
            &config.places_path(),
            expected_dimensions,
        )
        .context("Failed to open place catalog")
    }

    pub fn create_resolver(config: &Config, secrets: &Secrets) -> Result<GeocodeResolver> {
        let geocoding = &config.geocoding;
        let geocoder = GoogleGeocoder::new(
            &geocoding.endpoint,
            secrets.maps_api_key.clone(),
            Some(Duration::from_secs(geocoding.timeout_secs)),
        )?;
        Ok(GeocodeResolver::new(
            Box::new(geocoder),
            geocoding.retry_policy(),
        ))
    }

    /// Everything a query needs. Fails fast on missing files or a catalog
    /// that does not fit the embedding model.
    pub fn create_search(config: &Config, secrets: &Secrets) -> Result<PlaceSearch> {
        let embedder = Self::create_embedder(config, secrets)?;
        let catalog = Self::open_catalog(config, embedder.dimensions())?;

        let ranker = Ranker::new(embedder, Arc::new(catalog)).with_overfetch(config.search.overfetch);
        let resolver = Self::create_resolver(config, secrets)?;

        Ok(PlaceSearch::new(ranker, resolver, config.geocoding.parallel))
    }
}
