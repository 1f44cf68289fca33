use crate::error::{ensure_success, BackendError};
use crate::models::{ChunkMetadata, ChunkRecord, RetrievedChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API, one collection per document.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.endpoint, name)
    }
}

/// Qdrant only accepts unsigned integers or UUIDs as point ids, so the
/// textual chunk id is mapped onto a name-based UUID and kept in the payload.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

fn parse_hit(hit: &Value) -> RetrievedChunk {
    let text = hit
        .pointer("/payload/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let document_id = hit
        .pointer("/payload/document_id")
        .and_then(Value::as_i64)
        .unwrap_or_default();
    let chunk_index = hit
        .pointer("/payload/chunk_index")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;
    let file_name = hit
        .pointer("/payload/file_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    RetrievedChunk {
        text,
        metadata: ChunkMetadata {
            document_id,
            chunk_index,
            file_name,
        },
        distance: 1.0 - score,
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, BackendError> {
        let response = self.client.get(self.collection_url(name)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(BACKEND, response).await?;
        Ok(true)
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        dimensions: usize,
    ) -> Result<(), BackendError> {
        if self.collection_exists(name).await? {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url(name))
            .json(&json!({
                "vectors": {
                    "size": dimensions,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        ensure_success(BACKEND, response).await?;

        debug!(collection = name, dimensions, "created qdrant collection");
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

        let points = records
            .iter()
            .zip(embeddings.iter())
            .map(|(record, embedding)| {
                json!({
                    "id": point_id(&record.id).to_string(),
                    "vector": embedding,
                    "payload": {
                        "chunk_id": record.id,
                        "document_id": record.metadata.document_id,
                        "chunk_index": record.metadata.chunk_index,
                        "file_name": record.metadata.file_name,
                        "text": record.text,
                    },
                })
            })
            .collect::<Vec<_>>();

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(name)))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::CollectionNotFound(name.to_string()));
        }
        ensure_success(BACKEND, response).await?;

        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(name)))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::CollectionNotFound(name.to_string()));
        }

        let parsed: Value = ensure_success(BACKEND, response).await?.json().await?;
        let mut hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().map(parse_hit).collect::<Vec<_>>())
            .unwrap_or_default();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        Ok(hits)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool, BackendError> {
        if !self.collection_exists(name).await? {
            return Ok(false);
        }

        let response = self.client.delete(self.collection_url(name)).send().await?;
        ensure_success(BACKEND, response).await?;
        Ok(true)
    }
}
