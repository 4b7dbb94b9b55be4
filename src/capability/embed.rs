use super::{CapabilityClient, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
struct EmbedTextRequest<'a> {
    model: &'a str,
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ImageInput {
    image_url: String,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedImageRequest<'a> {
    model: &'a str,
    inputs: Vec<ImageInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Embedder backed by an HTTP embedding service
pub struct HttpEmbedder {
    client: CapabilityClient,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = CapabilityClient::new(&config.backend_url, config.timeout_secs)?;
        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn validate(&self, sent: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != sent {
            return Err(Error::Embedding(format!(
                "Model '{}' returned {} vectors for {} inputs",
                self.model,
                embeddings.len(),
                sent
            )));
        }
        if let Some(mismatch) = embeddings.iter().find(|vec| vec.len() != self.dimension) {
            return Err(Error::Embedding(format!(
                "Embedding dimension mismatch for model '{}': expected {}, got {}",
                self.model,
                self.dimension,
                mismatch.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let sent = texts.len();
        let request = EmbedTextRequest {
            model: &self.model,
            inputs: texts,
        };
        let response: EmbeddingResponse = self
            .client
            .post_json("/v1/embed/text", &request, Error::Embedding)
            .await?;
        let embeddings = response.into_embeddings();
        self.validate(sent, &embeddings)?;
        Ok(embeddings)
    }

    async fn embed_images(&self, image_urls: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if image_urls.is_empty() {
            return Ok(Vec::new());
        }

        let sent = image_urls.len();
        let request = EmbedImageRequest {
            model: &self.model,
            inputs: image_urls
                .into_iter()
                .map(|image_url| ImageInput { image_url })
                .collect(),
        };
        let response: EmbeddingResponse = self
            .client
            .post_json("/v1/embed/image", &request, Error::Embedding)
            .await?;
        let embeddings = response.into_embeddings();
        self.validate(sent, &embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
