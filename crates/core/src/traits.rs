use crate::error::{BackendError, RepositoryError};
use crate::models::{
    ChatDocumentLink, ChatSession, ChunkRecord, Document, DocumentSummary, NewDocument,
    RetrievedChunk,
};
use async_trait::async_trait;

/// Persistent vector store partitioned into named collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, BackendError>;

    async fn get_or_create_collection(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<(), BackendError>;

    async fn upsert(
        &self,
        name: &str,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<(), BackendError>;

    /// Nearest neighbours of `vector`, smallest distance first.
    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError>;

    /// Returns whether the collection existed.
    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError>;

    /// Inserts the document together with a chat titled after it and the
    /// link between them. Either all three are stored or none is.
    async fn insert_document_with_chat(
        &self,
        document: NewDocument,
    ) -> Result<(Document, ChatSession), RepositoryError>;

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError>;

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, RepositoryError>;

    /// Deletes the document and every chat link pointing at it.
    async fn delete_document(&self, id: i64) -> Result<bool, RepositoryError>;

    async fn create_chat(&self, title: &str) -> Result<ChatSession, RepositoryError>;

    /// A chat links to at most one document; linking again replaces it.
    async fn link_chat(
        &self,
        chat_id: i64,
        document_id: i64,
    ) -> Result<ChatDocumentLink, RepositoryError>;

    async fn linked_document(&self, chat_id: i64) -> Result<Option<Document>, RepositoryError>;
}
