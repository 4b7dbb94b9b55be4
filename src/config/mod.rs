//! Configuration management for deskpipe
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::warehouse::validate_identifier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Table names inside the warehouse
    #[serde(default)]
    pub tables: TablesConfig,

    /// Object storage layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Structured-extraction capability
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Text embedding capability
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Multimodal (image) embedding capability
    #[serde(default = "default_image_embedding_config")]
    pub image_embedding: EmbeddingConfig,

    /// Transcription capability
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Orchestrator behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Names of the tables the pipeline reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_forms_table")]
    pub forms: String,

    #[serde(default = "default_chats_table")]
    pub chats: String,

    #[serde(default = "default_emails_table")]
    pub emails: String,

    #[serde(default = "default_call_objects_table")]
    pub call_objects: String,

    #[serde(default = "default_call_transcripts_table")]
    pub call_transcripts: String,

    #[serde(default = "default_tickets_table")]
    pub tickets: String,

    #[serde(default = "default_products_table")]
    pub products: String,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// URI prefix (e.g. `gs://bucket/`) that maps onto `root`
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Local directory holding the objects (defaults to `<base>/objects`)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Glob selecting call recordings
    #[serde(default = "default_calls_location")]
    pub calls_location: String,

    /// Prefix prepended to product image file names
    #[serde(default = "default_images_prefix")]
    pub images_prefix: String,

    /// Reuse a registered object table younger than this many seconds
    #[serde(default = "default_max_staleness_secs")]
    pub max_staleness_secs: u64,
}

/// Structured-extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_url")]
    pub backend_url: String,

    #[serde(default = "default_extraction_model")]
    pub model: String,

    #[serde(default = "default_extraction_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub backend_url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Transcription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_url")]
    pub backend_url: String,

    #[serde(default = "default_transcription_model")]
    pub model: String,

    #[serde(default = "default_transcription_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Stage retry policy. `max_attempts = 1` disables retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_retry_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for deskpipe data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite warehouse
    pub db_file: PathBuf,
}

fn default_image_embedding_config() -> EmbeddingConfig {
    EmbeddingConfig {
        model: default_image_embedding_model(),
        dimension: default_image_embedding_dimension(),
        ..EmbeddingConfig::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tables: TablesConfig::default(),
            storage: StorageConfig::default(),
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            image_embedding: default_image_embedding_config(),
            transcription: TranscriptionConfig::default(),
            pipeline: PipelineConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            forms: default_forms_table(),
            chats: default_chats_table(),
            emails: default_emails_table(),
            call_objects: default_call_objects_table(),
            call_transcripts: default_call_transcripts_table(),
            tickets: default_tickets_table(),
            products: default_products_table(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_prefix: default_bucket_prefix(),
            root: None,
            calls_location: default_calls_location(),
            images_prefix: default_images_prefix(),
            max_staleness_secs: default_max_staleness_secs(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend_url: default_extraction_url(),
            model: default_extraction_model(),
            batch_size: default_extraction_batch_size(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend_url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend_url: default_transcription_url(),
            model: default_transcription_model(),
            batch_size: default_transcription_batch_size(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            backoff_multiplier: default_retry_backoff_multiplier(),
            max_backoff_ms: default_retry_max_backoff_ms(),
        }
    }
}

impl TablesConfig {
    fn all(&self) -> [(&'static str, &str); 7] {
        [
            ("tables.forms", &self.forms),
            ("tables.chats", &self.chats),
            ("tables.emails", &self.emails),
            ("tables.call_objects", &self.call_objects),
            ("tables.call_transcripts", &self.call_transcripts),
            ("tables.tickets", &self.tickets),
            ("tables.products", &self.products),
        ]
    }
}

impl StorageConfig {
    /// Local directory backing the bucket prefix
    pub fn resolved_root(&self, paths: &PathsConfig) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| paths.base_dir.join("objects"))
    }
}

impl Config {
    /// Get the default base directory for deskpipe (~/.deskpipe)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deskpipe")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("warehouse.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("warehouse.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (key, name) in self.tables.all() {
            validate_identifier(name)
                .map_err(|_| {
                    Error::Config(format!("{} is not a valid table name: '{}'", key, name))
                })?;
        }

        for (key, embedding) in [
            ("embedding", &self.embedding),
            ("image_embedding", &self.image_embedding),
        ] {
            if embedding.dimension == 0 {
                return Err(Error::Config(format!("{}.dimension must be positive", key)));
            }
            if embedding.batch_size == 0 {
                return Err(Error::Config(format!("{}.batch_size must be positive", key)));
            }
        }

        if self.extraction.batch_size == 0 {
            return Err(Error::Config(
                "extraction.batch_size must be positive".to_string(),
            ));
        }

        if self.transcription.batch_size == 0 {
            return Err(Error::Config(
                "transcription.batch_size must be positive".to_string(),
            ));
        }

        if !self
            .storage
            .calls_location
            .starts_with(&self.storage.bucket_prefix)
        {
            return Err(Error::Config(format!(
                "storage.calls_location '{}' must start with storage.bucket_prefix '{}'",
                self.storage.calls_location, self.storage.bucket_prefix
            )));
        }

        let retry = &self.pipeline.retry;
        if retry.max_attempts == 0 {
            return Err(Error::Config(
                "pipeline.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "pipeline.retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        Ok(())
    }
}
