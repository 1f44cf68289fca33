use crate::error::AppError;
use crate::generation::Generator;
use crate::models::RetrievedChunk;
use crate::pipeline::RetrievalPipeline;
use crate::traits::DocumentRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chunks retrieved as context for one chat turn.
pub const CONTEXT_TOP_K: usize = 4;

pub const NOT_IN_DOCUMENT_REPLY: &str = "The information is not available in the document.";

const GROUNDED_SYSTEM_INSTRUCTION: &str =
    "You are a document-only assistant. Never answer outside the document content.";

const GENERAL_SYSTEM_INSTRUCTION: &str =
    "You are a helpful, friendly AI assistant. Answer naturally and clearly.";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub grounding: Grounding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Grounding {
    Document { document_id: i64, chunks: usize },
    Ungrounded { reason: UngroundedReason },
}

/// Why a reply was generated without document context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UngroundedReason {
    NoLinkedDocument,
    NoMatchingChunks,
    LookupFailed(String),
    RetrievalFailed(String),
}

/// Answers chat messages, grounding them in the chat's linked document when
/// one is available.
///
/// Context enrichment never fails a request: lookup and retrieval errors are
/// logged and the turn falls back to an ungrounded prompt. Generation errors
/// are returned to the caller.
#[derive(Clone)]
pub struct ChatOrchestrator {
    repository: Arc<dyn DocumentRepository>,
    pipeline: RetrievalPipeline,
    generator: Arc<dyn Generator>,
}

impl ChatOrchestrator {
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        pipeline: RetrievalPipeline,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            repository,
            pipeline,
            generator,
        }
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatReply, AppError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::validation("Empty message"));
        }
        let chat_id = request
            .chat_id
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::validation("chat_id missing"))?;

        let grounding = self.context_for(chat_id, message).await;
        let (prompt, system_instruction, grounding) = match grounding {
            Ok((document_id, chunks)) => {
                let context = render_context(&chunks);
                info!(chat_id, document_id, chunk_count = chunks.len(), "using document context");
                (
                    grounded_prompt(&context, message),
                    GROUNDED_SYSTEM_INSTRUCTION,
                    Grounding::Document {
                        document_id,
                        chunks: chunks.len(),
                    },
                )
            }
            Err(reason) => {
                debug!(chat_id, reason = ?reason, "answering without document context");
                (
                    message.to_string(),
                    GENERAL_SYSTEM_INSTRUCTION,
                    Grounding::Ungrounded { reason },
                )
            }
        };

        let reply = self
            .generator
            .generate(&prompt, system_instruction)
            .await?
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NOT_IN_DOCUMENT_REPLY.to_string());

        Ok(ChatReply { reply, grounding })
    }

    async fn context_for(
        &self,
        chat_id: i64,
        message: &str,
    ) -> Result<(i64, Vec<RetrievedChunk>), UngroundedReason> {
        let document = match self.repository.linked_document(chat_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return Err(UngroundedReason::NoLinkedDocument),
            Err(error) => {
                warn!(chat_id, error = %error, "chat document lookup failed");
                return Err(UngroundedReason::LookupFailed(error.to_string()));
            }
        };

        let chunks = match self
            .pipeline
            .query(document.id, message, CONTEXT_TOP_K)
            .await
        {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(chat_id, document_id = document.id, error = %error, "retrieval failed");
                return Err(UngroundedReason::RetrievalFailed(error.to_string()));
            }
        };

        let chunks = chunks
            .into_iter()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .collect::<Vec<_>>();
        if chunks.is_empty() {
            return Err(UngroundedReason::NoMatchingChunks);
        }
        Ok((document.id, chunks))
    }
}

fn render_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("- {}", chunk.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn grounded_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a strict document-based assistant.\n\
         \n\
         DOCUMENT CONTENT:\n\
         {context}\n\
         \n\
         USER QUESTION:\n\
         {question}\n\
         \n\
         RULES:\n\
         - Answer ONLY using the document content above.\n\
         - Do NOT assume or guess.\n\
         - If the answer is NOT found, reply exactly:\n\
         \"{NOT_IN_DOCUMENT_REPLY}\"\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder, EmbeddingTask};
    use crate::error::BackendError;
    use crate::models::NewDocument;
    use crate::stores::{InMemoryRepository, InMemoryVectorIndex};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        calls: Mutex<Vec<(String, String)>>,
        reply: Option<String>,
        fail: bool,
    }

    impl RecordingGenerator {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
                ..Self::default()
            }
        }

        fn last_call(&self) -> (String, String) {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(
            &self,
            prompt: &str,
            system_instruction: &str,
        ) -> Result<Option<String>, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), system_instruction.to_string()));
            if self.fail {
                return Err(BackendError::Request("model overloaded".to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, BackendError> {
            Err(BackendError::Request("embedding service down".to_string()))
        }
    }

    struct Fixture {
        repository: Arc<InMemoryRepository>,
        index: Arc<InMemoryVectorIndex>,
        generator: Arc<RecordingGenerator>,
        orchestrator: ChatOrchestrator,
    }

    fn fixture(embedder: Arc<dyn Embedder>, generator: RecordingGenerator) -> Fixture {
        let repository = Arc::new(InMemoryRepository::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let generator = Arc::new(generator);
        let orchestrator = ChatOrchestrator::new(
            repository.clone(),
            RetrievalPipeline::new(embedder, index.clone()),
            generator.clone(),
        );
        Fixture {
            repository,
            index,
            generator,
            orchestrator,
        }
    }

    /// Stores a document, links it to a fresh chat and indexes its text.
    async fn linked_chat(fixture: &Fixture, text: &str) -> (i64, i64) {
        let document = fixture
            .repository
            .insert_document(NewDocument {
                title: "handbook.txt".to_string(),
                file_path: "documents/handbook.txt".to_string(),
                checksum: "abc".to_string(),
                size_bytes: text.len() as u64,
                extracted_text: text.to_string(),
            })
            .await
            .unwrap();
        let chat = fixture.repository.create_chat("handbook.txt").await.unwrap();
        fixture
            .repository
            .link_chat(chat.id, document.id)
            .await
            .unwrap();
        RetrievalPipeline::new(Arc::new(CharacterNgramEmbedder::default()), fixture.index.clone())
            .ingest_document(document.id, text, "handbook.txt")
            .await
            .unwrap();
        (chat.id, document.id)
    }

    fn request(message: &str, chat_id: Option<i64>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            chat_id,
        }
    }

    #[tokio::test]
    async fn empty_message_fails_validation_regardless_of_chat_id() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::replying("hi"),
        );

        for chat_id in [None, Some(1)] {
            let error = fixture
                .orchestrator
                .answer(request("   ", chat_id))
                .await
                .unwrap_err();
            assert!(matches!(&error, AppError::Validation(message) if message == "Empty message"));
        }
        assert!(fixture.generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_chat_id_fails_validation() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::replying("hi"),
        );
        let error = fixture
            .orchestrator
            .answer(request("hello", None))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "chat_id missing");
        assert_eq!(error.status_code(), 400);
    }

    #[tokio::test]
    async fn non_positive_chat_id_fails_validation() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::replying("hi"),
        );
        for chat_id in [0, -1] {
            let error = fixture
                .orchestrator
                .answer(request("hello", Some(chat_id)))
                .await
                .unwrap_err();
            assert_eq!(error.to_string(), "chat_id missing");
        }
        assert!(fixture.generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_without_linked_document_is_ungrounded() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::replying("  Hello there!  "),
        );

        let reply = fixture
            .orchestrator
            .answer(request("hello", Some(77)))
            .await
            .unwrap();

        assert_eq!(reply.reply, "Hello there!");
        assert_eq!(
            reply.grounding,
            Grounding::Ungrounded {
                reason: UngroundedReason::NoLinkedDocument
            }
        );
        let (prompt, system_instruction) = fixture.generator.last_call();
        assert_eq!(prompt, "hello");
        assert_eq!(system_instruction, GENERAL_SYSTEM_INSTRUCTION);
    }

    #[tokio::test]
    async fn linked_document_grounds_the_prompt() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::replying("Marmalade."),
        );
        let (chat_id, document_id) =
            linked_chat(&fixture, "The office cat is named marmalade.").await;

        let reply = fixture
            .orchestrator
            .answer(request("What is the cat named?", Some(chat_id)))
            .await
            .unwrap();

        assert_eq!(reply.reply, "Marmalade.");
        assert_eq!(
            reply.grounding,
            Grounding::Document {
                document_id,
                chunks: 1
            }
        );
        let (prompt, system_instruction) = fixture.generator.last_call();
        assert_eq!(system_instruction, GROUNDED_SYSTEM_INSTRUCTION);
        assert!(prompt.contains("DOCUMENT CONTENT:\n- The office cat is named marmalade.\n"));
        assert!(prompt.contains("USER QUESTION:\nWhat is the cat named?\n"));
        assert!(prompt.contains(NOT_IN_DOCUMENT_REPLY));
    }

    #[tokio::test]
    async fn linked_but_unindexed_document_is_ungrounded() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::replying("ok"),
        );
        let document = fixture
            .repository
            .insert_document(NewDocument {
                title: "scan.pdf".to_string(),
                file_path: "documents/scan.pdf".to_string(),
                checksum: "abc".to_string(),
                size_bytes: 3,
                extracted_text: String::new(),
            })
            .await
            .unwrap();
        let chat = fixture.repository.create_chat("scan.pdf").await.unwrap();
        fixture
            .repository
            .link_chat(chat.id, document.id)
            .await
            .unwrap();

        let reply = fixture
            .orchestrator
            .answer(request("summarise", Some(chat.id)))
            .await
            .unwrap();

        assert_eq!(
            reply.grounding,
            Grounding::Ungrounded {
                reason: UngroundedReason::NoMatchingChunks
            }
        );
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_ungrounded_reply() {
        let fixture = fixture(Arc::new(BrokenEmbedder), RecordingGenerator::replying("fine"));
        let (chat_id, _) = linked_chat(&fixture, "Some indexed text.").await;

        let reply = fixture
            .orchestrator
            .answer(request("question", Some(chat_id)))
            .await
            .unwrap();

        assert_eq!(reply.reply, "fine");
        assert!(matches!(
            reply.grounding,
            Grounding::Ungrounded {
                reason: UngroundedReason::RetrievalFailed(_)
            }
        ));
        assert_eq!(fixture.generator.last_call().1, GENERAL_SYSTEM_INSTRUCTION);
    }

    #[tokio::test]
    async fn empty_generation_uses_fallback_sentence() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator::default(),
        );
        let reply = fixture
            .orchestrator
            .answer(request("hello", Some(1)))
            .await
            .unwrap();
        assert_eq!(reply.reply, NOT_IN_DOCUMENT_REPLY);
    }

    #[tokio::test]
    async fn generation_failure_fails_the_request() {
        let fixture = fixture(
            Arc::new(CharacterNgramEmbedder::default()),
            RecordingGenerator {
                fail: true,
                ..RecordingGenerator::default()
            },
        );

        let error = fixture
            .orchestrator
            .answer(request("hello", Some(1)))
            .await
            .unwrap_err();

        assert!(matches!(error, AppError::ExternalService(_)));
        assert_eq!(error.status_code(), 502);
        assert!(error.to_string().contains("model overloaded"));
    }
}
