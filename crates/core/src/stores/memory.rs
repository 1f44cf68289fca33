//! In-process stores used by tests and by callers that do not need
//! persistence. Vector search is brute-force cosine distance.

use crate::error::{BackendError, RepositoryError};
use crate::models::{
    ChatDocumentLink, ChatSession, ChunkRecord, Document, DocumentSummary, NewDocument,
    RetrievedChunk,
};
use crate::traits::{DocumentRepository, VectorIndex};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock};

struct Collection {
    dimensions: usize,
    entries: BTreeMap<String, (ChunkRecord, Vec<f32>)>,
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_len(&self, name: &str) -> Option<usize> {
        let collections = self.collections.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        collections.get(name).map(|collection| collection.entries.len())
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        1.0
    } else {
        1.0 - f64::from(dot / (mag_a * mag_b))
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn collection_exists(&self, name: &str) -> Result<bool, BackendError> {
        let collections = self.collections.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections.contains_key(name))
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<(), BackendError> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                dimensions,
                entries: BTreeMap::new(),
            });
        Ok(())
    }

    async fn upsert(
        &self,
        name: &str,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<(), BackendError> {
        if records.len() != embeddings.len() {
            return Err(BackendError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                records.len()
            )));
        }

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;

        if let Some(embedding) = embeddings
            .iter()
            .find(|embedding| embedding.len() != collection.dimensions)
        {
            return Err(BackendError::DimensionMismatch {
                expected: collection.dimensions,
                actual: embedding.len(),
            });
        }

        for (record, embedding) in records.iter().zip(embeddings.iter()) {
            collection
                .entries
                .insert(record.id.clone(), (record.clone(), embedding.clone()));
        }
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        let collections = self.collections.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let collection = collections
            .get(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;

        if vector.len() != collection.dimensions {
            return Err(BackendError::DimensionMismatch {
                expected: collection.dimensions,
                actual: vector.len(),
            });
        }

        let mut hits = collection
            .entries
            .values()
            .map(|(record, embedding)| RetrievedChunk {
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                distance: cosine_distance(vector, embedding),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections.remove(name).is_some())
    }
}

#[derive(Default)]
struct RepositoryState {
    next_document_id: i64,
    next_chat_id: i64,
    documents: BTreeMap<i64, Document>,
    chats: BTreeMap<i64, ChatSession>,
    links: BTreeMap<i64, ChatDocumentLink>,
}

impl RepositoryState {
    fn insert_document(&mut self, document: NewDocument) -> Document {
        self.next_document_id += 1;
        let stored = Document {
            id: self.next_document_id,
            title: document.title,
            file_path: document.file_path,
            checksum: document.checksum,
            size_bytes: document.size_bytes,
            extracted_text: document.extracted_text,
            uploaded_at: Utc::now(),
        };
        self.documents.insert(stored.id, stored.clone());
        stored
    }

    fn create_chat(&mut self, title: &str) -> ChatSession {
        self.next_chat_id += 1;
        let chat = ChatSession {
            id: self.next_chat_id,
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.chats.insert(chat.id, chat.clone());
        chat
    }

    fn link(&mut self, chat_id: i64, document_id: i64) -> ChatDocumentLink {
        let link = ChatDocumentLink {
            chat_id,
            document_id,
            created_at: Utc::now(),
        };
        self.links.insert(chat_id, link.clone());
        link
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentRepository for InMemoryRepository {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        Ok(self.lock().insert_document(document))
    }

    async fn insert_document_with_chat(
        &self,
        document: NewDocument,
    ) -> Result<(Document, ChatSession), RepositoryError> {
        let mut state = self.lock();
        let document = state.insert_document(document);
        let chat = state.create_chat(&document.title);
        state.link(chat.id, document.id);
        Ok((document, chat))
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, RepositoryError> {
        Ok(self.lock().documents.get(&id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, RepositoryError> {
        let state = self.lock();
        let mut summaries = state
            .documents
            .values()
            .map(|document| DocumentSummary {
                id: document.id,
                title: document.title.clone(),
                file_path: document.file_path.clone(),
                uploaded_at: document.uploaded_at,
                linked_chat_id: state
                    .links
                    .values()
                    .find(|link| link.document_id == document.id)
                    .map(|link| link.chat_id),
            })
            .collect::<Vec<_>>();

        summaries.sort_by(|left, right| {
            right
                .uploaded_at
                .cmp(&left.uploaded_at)
                .then(right.id.cmp(&left.id))
        });
        Ok(summaries)
    }

    async fn delete_document(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        state.links.retain(|_, link| link.document_id != id);
        Ok(state.documents.remove(&id).is_some())
    }

    async fn create_chat(&self, title: &str) -> Result<ChatSession, RepositoryError> {
        Ok(self.lock().create_chat(title))
    }

    async fn link_chat(
        &self,
        chat_id: i64,
        document_id: i64,
    ) -> Result<ChatDocumentLink, RepositoryError> {
        Ok(self.lock().link(chat_id, document_id))
    }

    async fn linked_document(&self, chat_id: i64) -> Result<Option<Document>, RepositoryError> {
        let state = self.lock();
        Ok(state
            .links
            .get(&chat_id)
            .and_then(|link| state.documents.get(&link.document_id))
            .cloned())
    }
}
