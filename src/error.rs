//! Custom error types for deskpipe

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Rebuild already in progress for pipeline '{0}'")]
    RebuildInProgress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'deskpipe init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an error with the name of the pipeline stage that produced it
    pub fn in_stage(stage: impl Into<String>, source: Error) -> Self {
        Error::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }
}

/// Result type alias for deskpipe
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_message_includes_cause() {
        let err = Error::in_stage("build_tickets", Error::Extraction("timeout".to_string()));
        let msg = err.to_string();
        assert!(msg.contains("build_tickets"));
        assert!(msg.contains("timeout"));
    }
}
