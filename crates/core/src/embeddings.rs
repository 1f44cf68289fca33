use crate::error::{ensure_success, BackendError};
use crate::gemini::{Content, GeminiConfig, Part, BACKEND};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Whether text is embedded for storage or for lookup. Hosted models tune the
/// vector for each side of retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    Document,
    Query,
}

impl EmbeddingTask {
    fn as_gemini_task(self) -> &'static str {
        match self {
            EmbeddingTask::Document => "RETRIEVAL_DOCUMENT",
            EmbeddingTask::Query => "RETRIEVAL_QUERY",
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, BackendError>;
}

pub struct GeminiEmbedder {
    client: Client,
    config: GeminiConfig,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: Option<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, BackendError> {
        let api_key = self.config.api_key()?;
        let model = self.config.embedding_model.trim_start_matches("models/");
        let url = self.config.method_url(model, "embedContent")?;

        let payload = EmbedContentRequest {
            model: format!("models/{model}"),
            content: Content {
                parts: vec![Part { text }],
            },
            task_type: task.as_gemini_task(),
        };

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await?;
        let parsed: EmbedContentResponse = ensure_success(BACKEND, response)
            .await?
            .json()
            .await?;

        let values = parsed
            .embedding
            .map(|embedding| embedding.values)
            .unwrap_or_default();
        if values.is_empty() {
            return Err(BackendError::EmptyEmbedding(self.config.embedding_model.clone()));
        }

        Ok(values)
    }
}

/// Offline embedder hashing character trigrams into a fixed number of
/// buckets. Deterministic, so it also serves as a stand-in model in tests.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model_name: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_name: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions;
        let mut vector = vec![0f32; buckets];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.len() < 3 {
            if !chars.is_empty() {
                vector[bucket_for(&chars, buckets)] = 1.0;
            }
            return vector;
        }

        for window in chars.windows(3) {
            let bucket = bucket_for(window, buckets);
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed_sync(text))
    }
}

// FNV-1a over the UTF-8 bytes of the gram.
fn bucket_for(gram: &[char], buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in gram.iter().collect::<String>().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}
