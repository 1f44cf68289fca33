use crate::error::BackendError;
use serde::Serialize;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash-lite";

pub(crate) const BACKEND: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub generation_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
        }
    }
}

impl GeminiConfig {
    pub(crate) fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BackendError::MissingApiKey(BACKEND.to_string()))
    }

    /// `{api_base}/v1beta/models/{model}:{method}`
    pub(crate) fn method_url(&self, model: &str, method: &str) -> Result<Url, BackendError> {
        let model = model.trim_start_matches("models/");
        let base = Url::parse(&format!("{}/", self.api_base.trim_end_matches('/')))?;
        Ok(base.join(&format!("v1beta/models/{model}:{method}"))?)
    }
}

#[derive(Serialize)]
pub(crate) struct Content<'a> {
    pub(crate) parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
pub(crate) struct Part<'a> {
    pub(crate) text: &'a str,
}
