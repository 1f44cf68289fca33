use crate::error::AppError;
use crate::extractor::{extract_text, FileKind};
use crate::models::{
    DeleteReport, DocumentSummary, EmbeddingStatus, ExtractionStatus, NewDocument,
    RetrievedChunk, UploadReport, UploadRequest,
};
use crate::pipeline::RetrievalPipeline;
use crate::storage::FileStorage;
use crate::traits::DocumentRepository;
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

pub const DEFAULT_QUERY_TOP_K: usize = 5;

/// Upload, listing, deletion and ad-hoc retrieval over stored documents.
#[derive(Clone)]
pub struct DocumentService {
    repository: Arc<dyn DocumentRepository>,
    storage: FileStorage,
    pipeline: RetrievalPipeline,
}

impl DocumentService {
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        storage: FileStorage,
        pipeline: RetrievalPipeline,
    ) -> Self {
        Self {
            repository,
            storage,
            pipeline,
        }
    }

    /// Stores the file, records the document with a chat linked to it and
    /// indexes its text inline.
    ///
    /// Extraction and indexing failures do not fail the upload; they are
    /// reported in the returned [`UploadReport`].
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReport, AppError> {
        validate_upload(&request)?;
        let UploadRequest { file_name, bytes } = request;

        let stored = self.storage.save(&file_name, &bytes).await?;

        let (text, extraction) = match extract_off_runtime(&file_name, bytes).await {
            Ok(text) => {
                let characters = text.chars().count();
                (text, ExtractionStatus::Extracted { characters })
            }
            Err(reason) => {
                warn!(file_name = %file_name, error = %reason, "text extraction failed");
                (String::new(), ExtractionStatus::Failed { reason })
            }
        };

        let created = self
            .repository
            .insert_document_with_chat(NewDocument {
                title: file_name,
                file_path: stored.relative_path.clone(),
                checksum: stored.checksum,
                size_bytes: stored.size_bytes,
                extracted_text: text,
            })
            .await;
        let (document, chat) = match created {
            Ok(created) => created,
            Err(error) => {
                if let Err(cleanup) = self.storage.delete(&stored.relative_path).await {
                    warn!(
                        file_path = %stored.relative_path,
                        error = %cleanup,
                        "failed to remove file of rejected upload"
                    );
                }
                return Err(error.into());
            }
        };

        let embedding = match self
            .pipeline
            .ingest_document(document.id, &document.extracted_text, &document.title)
            .await
        {
            Ok(outcome) => EmbeddingStatus::from(outcome),
            Err(error) => {
                warn!(document_id = document.id, error = %error, "embedding failed");
                EmbeddingStatus::Degraded {
                    reason: error.to_string(),
                }
            }
        };

        info!(
            document_id = document.id,
            chat_id = chat.id,
            size_bytes = document.size_bytes,
            "document uploaded"
        );

        Ok(UploadReport {
            document: DocumentSummary {
                id: document.id,
                title: document.title,
                file_path: document.file_path,
                uploaded_at: document.uploaded_at,
                linked_chat_id: Some(chat.id),
            },
            chat_id: chat.id,
            extraction,
            embedding,
        })
    }

    pub async fn list(&self) -> Result<Vec<DocumentSummary>, AppError> {
        Ok(self.repository.list_documents().await?)
    }

    /// Removes the record and its chat links, then the stored file and the
    /// index collection. The last two are best-effort.
    pub async fn delete(&self, document_id: i64) -> Result<DeleteReport, AppError> {
        let document = self
            .repository
            .get_document(document_id)
            .await?
            .ok_or(AppError::NotFound {
                resource: "document",
                id: document_id,
            })?;

        self.repository.delete_document(document_id).await?;

        let file_removed = match self.storage.delete(&document.file_path).await {
            Ok(removed) => removed,
            Err(error) => {
                warn!(document_id, error = %error, "failed to remove stored file");
                false
            }
        };

        let index_removed = match self.pipeline.delete_index(document_id).await {
            Ok(removed) => removed,
            Err(error) => {
                warn!(document_id, error = %error, "failed to delete index collection");
                false
            }
        };

        info!(document_id, file_removed, index_removed, "document deleted");
        Ok(DeleteReport {
            document_id,
            file_removed,
            index_removed,
        })
    }

    /// Nearest chunks of one document for a free-text question.
    pub async fn query(
        &self,
        document_id: Option<i64>,
        question: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        let question = question.trim();
        let document_id = match document_id {
            Some(id) if !question.is_empty() => id,
            _ => return Err(AppError::validation("document_id and question required")),
        };

        Ok(self
            .pipeline
            .query(document_id, question, top_k.unwrap_or(DEFAULT_QUERY_TOP_K))
            .await?)
    }
}

/// PDF and DOCX parsing is CPU-bound, so it runs on the blocking pool.
async fn extract_off_runtime(file_name: &str, bytes: Vec<u8>) -> Result<String, String> {
    let file_name = file_name.to_string();
    tokio::task::spawn_blocking(move || extract_text(&file_name, &bytes))
        .await
        .map_err(|error| error.to_string())?
        .map_err(|error| error.to_string())
}

fn validate_upload(request: &UploadRequest) -> Result<(), AppError> {
    if request.file_name.trim().is_empty() || request.bytes.is_empty() {
        return Err(AppError::validation("No file uploaded"));
    }
    if request.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::validation("File too large (max 100 MB)"));
    }
    if FileKind::from_file_name(&request.file_name).is_none() {
        return Err(AppError::validation("Unsupported file type"));
    }
    Ok(())
}
