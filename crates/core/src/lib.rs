pub mod chat;
pub mod chunking;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod stores;
pub mod traits;

pub use chat::{ChatOrchestrator, ChatReply, ChatRequest, Grounding, UngroundedReason};
pub use chunking::{chunk_spans, chunk_text, ChunkingConfig, TextChunk};
pub use documents::{DocumentService, DEFAULT_QUERY_TOP_K, MAX_UPLOAD_BYTES};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingTask, GeminiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{AppError, BackendError, IngestError, RepositoryError};
pub use extractor::{extract_text, FileKind};
pub use gemini::GeminiConfig;
pub use generation::{GeminiGenerator, Generator};
pub use models::{
    ChatDocumentLink, ChatSession, ChunkMetadata, ChunkRecord, DeleteReport, Document,
    DocumentSummary, EmbeddingStatus, ExtractionStatus, IngestOutcome, IngestionOptions,
    RetrievedChunk, UploadReport, UploadRequest,
};
pub use pipeline::{collection_name, PipelineError, RetrievalPipeline};
pub use storage::FileStorage;
pub use stores::{InMemoryRepository, InMemoryVectorIndex, QdrantStore, SqliteRepository};
pub use traits::{DocumentRepository, VectorIndex};
