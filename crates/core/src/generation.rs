use crate::error::{ensure_success, BackendError};
use crate::gemini::{Content, GeminiConfig, Part, BACKEND};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns `None` when the model produced no text.
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<Option<String>, BackendError>;
}

pub struct GeminiGenerator {
    client: Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Turn<'a>>,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    pub(crate) fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text = parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<String>();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<Option<String>, BackendError> {
        let api_key = self.config.api_key()?;
        let url = self
            .config
            .method_url(&self.config.generation_model, "generateContent")?;

        let payload = GenerateContentRequest {
            system_instruction: Content {
                parts: vec![Part {
                    text: system_instruction,
                }],
            },
            contents: vec![Turn {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await?;
        let parsed: GenerateContentResponse = ensure_success(BACKEND, response)
            .await?
            .json()
            .await?;

        Ok(parsed.text())
    }
}
