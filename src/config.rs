use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geocode::{RetryPolicy, DEFAULT_GEOCODE_ENDPOINT};
use crate::semantic::{ranking::DEFAULT_OVERFETCH, DEFAULT_MODEL, DEFAULT_THRESHOLD};

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const GOOGLE_MAPS_API_KEY_VAR: &str = "GOOGLE_MAPS_API_KEY";

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_INDEX_FILE: &str = "faiss_index.bin";
const DEFAULT_PLACES_FILE: &str = "reviews_embeddings.csv";
const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_RESULTS: usize = 5;
const DEFAULT_MAX_RESULTS_LIMIT: usize = 20;
const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("environment variable {0} is not set")]
    MissingSecret(&'static str),
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible hosted endpoint
    Openai,
    /// fastembed model run in-process
    Local,
}

/// Where the prebuilt index and its places table live.
/// Relative paths are resolved against the base directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    #[serde(default = "default_places_path")]
    pub places_path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            places_path: default_places_path(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub provider: EmbeddingBackend,

    /// Model name; must match the model the index was built with
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_backend(),
            model: default_embedding_model(),
            endpoint: default_embedding_endpoint(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocode_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_geocode_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_geocode_backoff_secs")]
    pub backoff_secs: u64,

    #[serde(default = "default_geocode_timeout_secs")]
    pub timeout_secs: u64,

    /// Look up all result places at once instead of one by one
    #[serde(default)]
    pub parallel: bool,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geocode_endpoint(),
            max_attempts: default_geocode_max_attempts(),
            backoff_secs: default_geocode_backoff_secs(),
            timeout_secs: default_geocode_timeout_secs(),
            parallel: false,
        }
    }
}

impl GeocodingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchDefaults {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Upper bound accepted from users
    #[serde(default = "default_max_results_limit")]
    pub max_results_limit: usize,

    /// Neighbours fetched per wanted result before threshold filtering
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            max_results: default_max_results(),
            max_results_limit: default_max_results_limit(),
            overfetch: default_overfetch(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from(DEFAULT_INDEX_FILE)
}

fn default_places_path() -> PathBuf {
    PathBuf::from(DEFAULT_PLACES_FILE)
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Openai
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embedding_endpoint() -> String {
    DEFAULT_EMBEDDING_ENDPOINT.to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_geocode_endpoint() -> String {
    DEFAULT_GEOCODE_ENDPOINT.to_string()
}

fn default_geocode_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_geocode_backoff_secs() -> u64 {
    RetryPolicy::default().backoff.as_secs()
}

fn default_geocode_timeout_secs() -> u64 {
    10
}

fn default_min_similarity() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_max_results_limit() -> usize {
    DEFAULT_MAX_RESULTS_LIMIT
}

fn default_overfetch() -> usize {
    DEFAULT_OVERFETCH
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let search = &self.search;
        if !(0.0..=1.0).contains(&search.min_similarity) {
            return Err(invalid(
                "search.min_similarity",
                format!("must be between 0.0 and 1.0, got {}", search.min_similarity),
            ));
        }
        if search.max_results_limit == 0 {
            return Err(invalid("search.max_results_limit", "must be greater than 0"));
        }
        if search.max_results == 0 || search.max_results > search.max_results_limit {
            return Err(invalid(
                "search.max_results",
                format!(
                    "must be between 1 and {}, got {}",
                    search.max_results_limit, search.max_results
                ),
            ));
        }
        if search.overfetch == 0 {
            return Err(invalid("search.overfetch", "must be at least 1"));
        }

        if self.geocoding.max_attempts == 0 {
            return Err(invalid("geocoding.max_attempts", "must be at least 1"));
        }
        if self.geocoding.timeout_secs == 0 {
            return Err(invalid("geocoding.timeout_secs", "must be greater than 0"));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(invalid("embedding.timeout_secs", "must be greater than 0"));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(invalid("embedding.model", "must not be empty"));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults if missing.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ConfigError::Io { path, source }
        };

        std::fs::create_dir_all(base_path).map_err(io_err(base_path))?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            log::info!("writing default config to {}", config_path.display());
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)
                .map_err(io_err(&config_path))?;
        }

        let config_str = std::fs::read_to_string(&config_path).map_err(io_err(&config_path))?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn index_path(&self) -> PathBuf {
        self.base_path.join(&self.catalog.index_path)
    }

    pub fn places_path(&self) -> PathBuf {
        self.base_path.join(&self.catalog.places_path)
    }
}

/// API keys read from the environment at startup. Never written to
/// `config.yaml` and never logged.
#[derive(Clone)]
pub struct Secrets {
    pub embedding_api_key: Option<String>,
    pub maps_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Secrets {{ embedding_api_key: {}, maps_api_key: [REDACTED] }}",
            if self.embedding_api_key.is_some() { "[REDACTED]" } else { "None" }
        )
    }
}

impl Secrets {
    pub fn from_env(config: &Config) -> Result<Self, ConfigError> {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        config: &Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingSecret(name))
        };

        let embedding_api_key = match config.embedding.provider {
            EmbeddingBackend::Openai => Some(read(OPENAI_API_KEY_VAR)?),
            EmbeddingBackend::Local => None,
        };

        Ok(Self {
            embedding_api_key,
            maps_api_key: read(GOOGLE_MAPS_API_KEY_VAR)?,
        })
    }
}
