use super::{CapabilityClient, Extractor};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::normalize::{ExtractionResult, PartialRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    model: &'a str,
    output_schema: Vec<OutputField<'a>>,
    prompts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OutputField<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    rows: Vec<Option<Map<String, Value>>>,
}

fn output_schema<'a>(schema: &[&'a str]) -> Vec<OutputField<'a>> {
    schema
        .iter()
        .map(|name| OutputField {
            name: *name,
            field_type: "STRING",
        })
        .collect()
}

/// Scalars are kept as text, anything else counts as absent
fn field_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn row_to_result(schema: &[&str], row: Option<Map<String, Value>>) -> ExtractionResult {
    let Some(row) = row else {
        return ExtractionResult::empty();
    };
    let fields: PartialRecord = schema
        .iter()
        .map(|name| (name.to_string(), field_text(row.get(*name))))
        .collect();
    ExtractionResult::from_fields(fields)
}

/// Extractor backed by an HTTP generation service
pub struct HttpExtractor {
    client: CapabilityClient,
    model: String,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let client = CapabilityClient::new(&config.backend_url, config.timeout_secs)?;
        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        prompts: Vec<String>,
        schema: &[&str],
    ) -> Result<Vec<ExtractionResult>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let sent = prompts.len();
        let request = ExtractRequest {
            model: &self.model,
            output_schema: output_schema(schema),
            prompts,
        };
        let response: ExtractResponse = self
            .client
            .post_json("/v1/extract", &request, Error::Extraction)
            .await?;

        if response.rows.len() != sent {
            return Err(Error::Extraction(format!(
                "Model '{}' returned {} rows for {} prompts",
                self.model,
                response.rows.len(),
                sent
            )));
        }

        Ok(response
            .rows
            .into_iter()
            .map(|row| row_to_result(schema, row))
            .collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::OUTPUT_SCHEMA;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn extractor_for(server: &MockServer) -> HttpExtractor {
        HttpExtractor::new(&ExtractionConfig {
            backend_url: server.uri(),
            model: "gemini-2.5-flash".to_string(),
            batch_size: 4,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_maps_rows_through_gate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .and(body_partial_json(json!({
                "model": "gemini-2.5-flash",
                "output_schema": [
                    {"name": "subject", "type": "STRING"},
                    {"name": "body", "type": "STRING"},
                    {"name": "answer", "type": "STRING"},
                    {"name": "type", "type": "STRING"},
                    {"name": "priority", "type": "STRING"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [
                    {
                        "subject": "Double charge",
                        "body": "Card charged twice.",
                        "answer": "Refund issued.",
                        "type": "Billing and Payments",
                        "priority": "high"
                    },
                    {"subject": "Hi", "body": null, "answer": "Bye"},
                    null
                ]
            })))
            .mount(&server)
            .await;

        let results = extractor_for(&server)
            .extract(vec!["a".into(), "b".into(), "c".into()], &OUTPUT_SCHEMA)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let first = results[0].clone().into_complete().unwrap();
        assert_eq!(first.subject, "Double charge");
        assert_eq!(first.priority.as_deref(), Some("high"));
        assert!(!results[1].is_complete());
        assert_eq!(results[2], ExtractionResult::empty());
    }

    #[tokio::test]
    async fn test_row_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rows": [] })))
            .mount(&server)
            .await;

        let err = extractor_for(&server)
            .extract(vec!["a".into()], &OUTPUT_SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_backend_failure_is_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/extract"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = extractor_for(&server)
            .extract(vec!["a".into()], &OUTPUT_SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
