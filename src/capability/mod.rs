//! External capabilities the pipeline calls into
//!
//! - Structured extraction from free text
//! - Text and image embeddings
//! - Speech transcription
//! - Object storage listing and access
//!
//! Each one is a trait so stages can be exercised against in-process fakes.
//! `Capabilities::from_config` wires up the HTTP-backed implementations.

mod client;
mod embed;
mod extract;
mod objects;
mod transcribe;

#[cfg(test)]
pub(crate) mod fakes;

pub use client::*;
pub use embed::*;
pub use extract::*;
pub use objects::*;
pub use transcribe::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::normalize::ExtractionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured extraction over prompts
#[async_trait]
pub trait Extractor: Send + Sync {
    /// One result per prompt, in prompt order, with the fields named in
    /// `schema`
    async fn extract(
        &self,
        prompts: Vec<String>,
        schema: &[&str],
    ) -> Result<Vec<ExtractionResult>>;

    fn model_name(&self) -> &str;
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a batch of images given by fetchable URLs
    async fn embed_images(&self, _image_urls: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedding(
            "Image embedding is not supported by this backend".to_string(),
        ))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// An object handed to the transcriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub uri: String,
    pub url: String,
}

/// Transcription of one recording. A failed transcription has no text and a
/// status explaining why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub transcripts: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Transcription {
    pub fn failed(status: impl Into<String>) -> Self {
        Self {
            transcripts: None,
            status: Some(status.into()),
        }
    }
}

/// Speech-to-text over stored recordings
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// One transcription per object, in input order
    async fn transcribe(&self, objects: Vec<ObjectRef>) -> Result<Vec<Transcription>>;

    fn model_name(&self) -> &str;
}

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub uri: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub updated_at: Option<String>,
}

/// Object storage
#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    /// Objects whose URI matches `location` (a URI with `*` wildcards),
    /// sorted by URI
    async fn list(&self, location: &str) -> Result<Vec<ObjectMeta>>;

    /// URL a capability can fetch the object from, `None` when the object
    /// does not exist
    fn access_url(&self, uri: &str) -> Result<Option<String>>;
}

/// The set of capabilities a pipeline run uses
pub struct Capabilities {
    pub extractor: Box<dyn Extractor>,
    pub text_embedder: Box<dyn Embedder>,
    pub image_embedder: Box<dyn Embedder>,
    pub transcriber: Box<dyn Transcriber>,
    pub objects: Box<dyn ObjectCatalog>,
}

impl Capabilities {
    /// HTTP-backed capabilities and the local object store
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            extractor: Box::new(HttpExtractor::new(&config.extraction)?),
            text_embedder: Box::new(HttpEmbedder::new(&config.embedding)?),
            image_embedder: Box::new(HttpEmbedder::new(&config.image_embedding)?),
            transcriber: Box::new(HttpTranscriber::new(&config.transcription)?),
            objects: Box::new(LocalObjectStore::from_config(config)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_image_embedding_is_unsupported() {
        struct TextOnly;

        #[async_trait]
        impl Embedder for TextOnly {
            async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0]).collect())
            }
            fn dimension(&self) -> usize {
                1
            }
            fn model_name(&self) -> &str {
                "text-only"
            }
        }

        let err = TextOnly
            .embed_images(vec!["file:///a.png".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn test_capabilities_from_default_config() {
        let mut config = Config::default();
        config.init_paths(Some(std::env::temp_dir().join("deskpipe-caps")));
        let caps = Capabilities::from_config(&config).unwrap();
        assert_eq!(caps.text_embedder.dimension(), 768);
        assert_eq!(caps.image_embedder.dimension(), 1408);
        assert_eq!(caps.extractor.model_name(), "gemini-2.5-flash");
        assert_eq!(caps.transcriber.model_name(), "chirp-2");
    }
}
