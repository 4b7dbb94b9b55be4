use super::{CapabilityClient, ObjectRef, Transcriber, Transcription};
use crate::config::TranscriptionConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    model: &'a str,
    inputs: &'a [ObjectRef],
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    results: Vec<Transcription>,
}

/// Transcriber backed by an HTTP speech-to-text service
pub struct HttpTranscriber {
    client: CapabilityClient,
    model: String,
}

impl HttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let client = CapabilityClient::new(&config.backend_url, config.timeout_secs)?;
        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, objects: Vec<ObjectRef>) -> Result<Vec<Transcription>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let request = TranscribeRequest {
            model: &self.model,
            inputs: &objects,
        };
        let response: TranscribeResponse = self
            .client
            .post_json("/v1/transcribe", &request, Error::Transcription)
            .await?;

        if response.results.len() != objects.len() {
            return Err(Error::Transcription(format!(
                "Model '{}' returned {} results for {} recordings",
                self.model,
                response.results.len(),
                objects.len()
            )));
        }

        Ok(response.results)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber_for(server: &MockServer) -> HttpTranscriber {
        HttpTranscriber::new(&TranscriptionConfig {
            backend_url: server.uri(),
            model: "chirp-2".to_string(),
            batch_size: 2,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_transcribe_keeps_failed_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcribe"))
            .and(body_partial_json(json!({
                "model": "chirp-2",
                "inputs": [
                    {"uri": "gs://b/calls/1.wav", "url": "file:///objects/calls/1.wav"},
                    {"uri": "gs://b/calls/2.wav", "url": "file:///objects/calls/2.wav"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"transcripts": "agent: hello", "status": ""},
                    {"transcripts": null, "status": "unsupported encoding"}
                ]
            })))
            .mount(&server)
            .await;

        let objects = vec![
            ObjectRef {
                uri: "gs://b/calls/1.wav".to_string(),
                url: "file:///objects/calls/1.wav".to_string(),
            },
            ObjectRef {
                uri: "gs://b/calls/2.wav".to_string(),
                url: "file:///objects/calls/2.wav".to_string(),
            },
        ];
        let results = transcriber_for(&server).transcribe(objects).await.unwrap();

        assert_eq!(results[0].transcripts.as_deref(), Some("agent: hello"));
        assert_eq!(results[1], Transcription::failed("unsupported encoding"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_transcription_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcribe"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = transcriber_for(&server)
            .transcribe(vec![ObjectRef {
                uri: "gs://b/calls/1.wav".to_string(),
                url: "file:///x".to_string(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transcription(_)));
    }
}
