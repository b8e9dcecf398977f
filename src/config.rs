use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Pool size. Queries are read-mostly, so a handful of connections
    /// covers concurrent retrievals alongside the ingestion writer.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing;
    /// ingestion and reindex writes contend with readers under WAL.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    8
}
fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"memory"` rebuilds vectors from the store at startup by re-embedding;
    /// `"sqlite"` persists vectors alongside documents and warm-loads them.
    #[serde(default = "default_index_backend")]
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
        }
    }
}

fn default_index_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not pass `k`.
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Matches scoring below this are excluded entirely, never returned
    /// as "low".
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
    /// Over-fetch multiplier: the index is asked for `k * overfetch_factor`
    /// candidates so stale/deactivated documents can be filtered without a
    /// second round trip.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    /// Per-stage budget for the embedding call; exceeding it degrades to
    /// the lexical fallback.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            similarity_floor: default_similarity_floor(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
            overfetch_factor: default_overfetch_factor(),
            stage_timeout_ms: default_stage_timeout_ms(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_similarity_floor() -> f64 {
    0.30
}
fn default_high_threshold() -> f64 {
    0.80
}
fn default_medium_threshold() -> f64 {
    0.55
}
fn default_overfetch_factor() -> usize {
    3
}
fn default_stage_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier; doubles as the embedding version recorded on
    /// documents.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// HTTP timeout for one provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Worker pool bound: callers queue beyond this instead of spawning
    /// unbounded concurrent model invocations.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    180
}
fn default_cache_capacity() -> usize {
    1024
}

impl Config {
    /// Minimal in-memory configuration, used by tests and tools that do
    /// not touch the database file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from(":memory:"),
                max_connections: default_max_connections(),
                busy_timeout_secs: default_busy_timeout_secs(),
            },
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate db
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.default_k < 1 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.overfetch_factor < 1 {
        anyhow::bail!("retrieval.overfetch_factor must be >= 1");
    }
    for (name, value) in [
        ("similarity_floor", config.retrieval.similarity_floor),
        ("high_threshold", config.retrieval.high_threshold),
        ("medium_threshold", config.retrieval.medium_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    if config.retrieval.medium_threshold > config.retrieval.high_threshold {
        anyhow::bail!("retrieval.medium_threshold must not exceed retrieval.high_threshold");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.max_concurrent == 0 {
            anyhow::bail!("embedding.max_concurrent must be >= 1");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate cache
    if config.cache.capacity == 0 {
        anyhow::bail!("cache.capacity must be >= 1");
    }

    match config.index.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }

    Ok(config)
}
