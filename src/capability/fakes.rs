//! In-process capabilities for tests

use super::{
    Capabilities, Embedder, Extractor, LocalObjectStore, ObjectRef, Transcriber, Transcription,
};
use crate::error::{Error, Result};
use crate::normalize::{ExtractionResult, PartialRecord};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
enum ExtractMode {
    Complete,
    DroppingLast,
    Failing,
}

/// Extracts a complete ticket from every prompt, except prompts containing
/// `NO_ANSWER`, which come back without an answer.
pub struct FakeExtractor {
    mode: ExtractMode,
    prompts: Mutex<Vec<String>>,
}

impl FakeExtractor {
    fn with_mode(mode: ExtractMode) -> Self {
        Self {
            mode,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn complete() -> Self {
        Self::with_mode(ExtractMode::Complete)
    }

    /// Returns one result too few per batch
    pub fn dropping_last() -> Self {
        Self::with_mode(ExtractMode::DroppingLast)
    }

    pub fn failing() -> Self {
        Self::with_mode(ExtractMode::Failing)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn answer(schema: &[&str], prompt: &str) -> ExtractionResult {
        let raw = prompt.rsplit('\n').next().unwrap_or_default();
        let fields: PartialRecord = schema
            .iter()
            .map(|field| {
                let value = match *field {
                    "subject" => Some(format!("About {}", raw)),
                    "body" => Some(raw.to_string()),
                    "answer" if prompt.contains("NO_ANSWER") => Some(String::new()),
                    "answer" => Some("Resolved by support.".to_string()),
                    "type" => Some("Other".to_string()),
                    "priority" => Some("low".to_string()),
                    _ => None,
                };
                (field.to_string(), value)
            })
            .collect();
        ExtractionResult::from_fields(fields)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        prompts: Vec<String>,
        schema: &[&str],
    ) -> Result<Vec<ExtractionResult>> {
        self.prompts.lock().unwrap().extend(prompts.iter().cloned());
        match self.mode {
            ExtractMode::Failing => Err(Error::Extraction("fake extractor down".to_string())),
            ExtractMode::Complete => Ok(prompts.iter().map(|p| Self::answer(schema, p)).collect()),
            ExtractMode::DroppingLast => Ok(prompts
                .iter()
                .take(prompts.len().saturating_sub(1))
                .map(|p| Self::answer(schema, p))
                .collect()),
        }
    }

    fn model_name(&self) -> &str {
        "fake-extractor"
    }
}

/// Embeds each input as a constant vector whose value is the input length
pub struct FakeEmbedder {
    dimension: usize,
    fail_after: Option<usize>,
    calls: AtomicUsize,
    batches: Mutex<Vec<usize>>,
    inputs: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_after: None,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Succeeds for the first `calls` batches, then fails
    pub fn failing_after(dimension: usize, calls: usize) -> Self {
        Self {
            fail_after: Some(calls),
            ..Self::new(dimension)
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    fn vectors(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(Error::Embedding("fake embedder down".to_string()));
        }
        self.batches.lock().unwrap().push(inputs.len());
        let vectors = inputs
            .iter()
            .map(|text| vec![text.chars().count() as f32; self.dimension])
            .collect();
        self.inputs.lock().unwrap().extend(inputs);
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.vectors(texts)
    }

    async fn embed_images(&self, image_urls: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.vectors(image_urls)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "fake-embedder"
    }
}

/// Transcribes every recording as "transcript of <uri>", except URIs
/// containing `broken`, which fail, and `silent`, which come back empty.
#[derive(Default)]
pub struct FakeTranscriber {
    calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, objects: Vec<ObjectRef>) -> Result<Vec<Transcription>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(objects
            .into_iter()
            .map(|object| {
                if object.uri.contains("broken") {
                    Transcription::failed("audio could not be decoded")
                } else if object.uri.contains("silent") {
                    Transcription {
                        transcripts: Some(String::new()),
                        status: Some(String::new()),
                    }
                } else {
                    Transcription {
                        transcripts: Some(format!("transcript of {}", object.uri)),
                        status: Some(String::new()),
                    }
                }
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "fake-transcriber"
    }
}

/// Fake capabilities over a local object root
pub fn fake_capabilities(bucket_prefix: &str, root: &Path, dimension: usize) -> Capabilities {
    Capabilities {
        extractor: Box::new(FakeExtractor::complete()),
        text_embedder: Box::new(FakeEmbedder::new(dimension)),
        image_embedder: Box::new(FakeEmbedder::new(dimension)),
        transcriber: Box::new(FakeTranscriber::new()),
        objects: Box::new(LocalObjectStore::new(bucket_prefix, root)),
    }
}
