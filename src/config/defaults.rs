//! Default values for configuration

/// Default raw forms table
pub fn default_forms_table() -> String {
    "forms".to_string()
}

/// Default raw chats table
pub fn default_chats_table() -> String {
    "chats".to_string()
}

/// Default raw emails table
pub fn default_emails_table() -> String {
    "emails".to_string()
}

/// Default object metadata table for call audio
pub fn default_call_objects_table() -> String {
    "call_object_table".to_string()
}

/// Default transcript table
pub fn default_call_transcripts_table() -> String {
    "call_transcriptions".to_string()
}

/// Default unified tickets table
pub fn default_tickets_table() -> String {
    "tickets".to_string()
}

/// Default products table
pub fn default_products_table() -> String {
    "products".to_string()
}

/// Default bucket prefix that the local object root stands in for
pub fn default_bucket_prefix() -> String {
    std::env::var("DESKPIPE_BUCKET_PREFIX").unwrap_or_else(|_| "gs://deskpipe-assets/".to_string())
}

/// Default glob for call recordings
pub fn default_calls_location() -> String {
    format!("{}calls/*", default_bucket_prefix())
}

/// Default prefix prepended to product image file names
pub fn default_images_prefix() -> String {
    format!("{}images/", default_bucket_prefix())
}

/// Default metadata staleness bound (1 hour)
pub fn default_max_staleness_secs() -> u64 {
    3600
}

/// Default structured-extraction backend URL
pub fn default_extraction_url() -> String {
    std::env::var("DESKPIPE_EXTRACTION_URL").unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default generative model used for extraction
pub fn default_extraction_model() -> String {
    "gemini-2.5-flash".to_string()
}

/// Default number of prompts per extraction request
pub fn default_extraction_batch_size() -> usize {
    16
}

/// Default embedding backend URL
pub fn default_embedding_url() -> String {
    std::env::var("DESKPIPE_EMBEDDING_URL").unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default text embedding model
pub fn default_embedding_model() -> String {
    "text-embedding-005".to_string()
}

/// Default text embedding dimension
pub fn default_embedding_dimension() -> usize {
    768
}

/// Default multimodal embedding model
pub fn default_image_embedding_model() -> String {
    "multimodalembedding@001".to_string()
}

/// Default multimodal embedding dimension
pub fn default_image_embedding_dimension() -> usize {
    1408
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default transcription backend URL
pub fn default_transcription_url() -> String {
    std::env::var("DESKPIPE_TRANSCRIPTION_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default transcription model
pub fn default_transcription_model() -> String {
    "chirp-2".to_string()
}

/// Default number of objects per transcription request
pub fn default_transcription_batch_size() -> usize {
    4
}

/// Default HTTP timeout for capability calls in seconds
pub fn default_request_timeout() -> u64 {
    300
}

/// Default: a single attempt per stage
pub fn default_retry_max_attempts() -> u32 {
    1
}

/// Default initial backoff between stage attempts
pub fn default_retry_initial_backoff_ms() -> u64 {
    500
}

/// Default backoff multiplier
pub fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

/// Default ceiling for a single backoff
pub fn default_retry_max_backoff_ms() -> u64 {
    30_000
}
