use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded file together with the text extracted from it at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub extracted_text: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub file_path: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub extracted_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub linked_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatDocumentLink {
    pub chat_id: i64,
    pub document_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub document_id: i64,
    pub chunk_index: usize,
    pub file_name: String,
}

/// One vector-index entry: stable id, raw chunk text and its metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    pub fn new(document_id: i64, chunk_index: usize, file_name: &str, text: String) -> Self {
        Self {
            id: format!("{document_id}_{chunk_index}"),
            text,
            metadata: ChunkMetadata {
                document_id,
                chunk_index,
                file_name: file_name.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed { chunks: usize, batches: usize },
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Extracted { characters: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Indexed { chunks: usize, batches: usize },
    Skipped,
    Degraded { reason: String },
}

impl From<IngestOutcome> for EmbeddingStatus {
    fn from(value: IngestOutcome) -> Self {
        match value {
            IngestOutcome::Indexed { chunks, batches } => Self::Indexed { chunks, batches },
            IngestOutcome::Skipped => Self::Skipped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub document: DocumentSummary,
    pub chat_id: i64,
    pub extraction: ExtractionStatus,
    pub embedding: EmbeddingStatus,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DeleteReport {
    pub document_id: i64,
    pub file_removed: bool,
    pub index_removed: bool,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            batch_size: 50,
        }
    }
}
