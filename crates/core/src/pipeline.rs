use crate::chunking::{chunk_spans, ChunkingConfig};
use crate::embeddings::{Embedder, EmbeddingTask};
use crate::error::{BackendError, IngestError};
use crate::models::{ChunkRecord, IngestOutcome, IngestionOptions, RetrievedChunk};
use crate::traits::VectorIndex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the vector-index collection holding one document's chunks.
pub fn collection_name(document_id: i64) -> String {
    format!("document_{document_id}")
}

/// Chunks, embeds and indexes document text, and answers nearest-chunk
/// queries against it.
///
/// The embedder and index handles are built once by the caller and shared;
/// the same embedder serves both ingestion and query so their vectors stay
/// comparable.
#[derive(Clone)]
pub struct RetrievalPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    options: IngestionOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] IngestError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RetrievalPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self::with_options(embedder, index, IngestionOptions::default())
    }

    pub fn with_options(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            embedder,
            index,
            options,
        }
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Ingests with the configured batch size.
    pub async fn ingest_document(
        &self,
        document_id: i64,
        text: &str,
        file_name: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        self.ingest(document_id, text, file_name, self.options.batch_size)
            .await
    }

    /// Splits `text` into chunks and upserts them into the document's
    /// collection, `batch_size` chunks per upsert.
    ///
    /// Blank text is skipped without touching the embedder. If any batch
    /// fails the collection is dropped again, so a document is either fully
    /// indexed or not indexed at all.
    pub async fn ingest(
        &self,
        document_id: i64,
        text: &str,
        file_name: &str,
        batch_size: usize,
    ) -> Result<IngestOutcome, PipelineError> {
        if text.trim().is_empty() {
            debug!(document_id, "no text to embed");
            return Ok(IngestOutcome::Skipped);
        }
        if batch_size == 0 {
            return Err(
                IngestError::InvalidArgument("batch_size must be positive".to_string()).into(),
            );
        }

        let config = ChunkingConfig::from(&self.options);
        config.validate()?;

        let records = chunk_spans(text, config)
            .into_iter()
            .map(|chunk| ChunkRecord::new(document_id, chunk.ordinal, file_name, chunk.text))
            .collect::<Vec<_>>();
        let collection = collection_name(document_id);

        match self.index_batches(&collection, &records, batch_size).await {
            Ok(batches) => {
                info!(
                    document_id,
                    collection = %collection,
                    chunk_count = records.len(),
                    batches,
                    model = self.embedder.model_name(),
                    "stored document embeddings"
                );
                Ok(IngestOutcome::Indexed {
                    chunks: records.len(),
                    batches,
                })
            }
            Err(error) => {
                match self.index.delete_collection(&collection).await {
                    Ok(_) => debug!(collection = %collection, "rolled back partial ingestion"),
                    Err(cleanup) => warn!(
                        collection = %collection,
                        error = %cleanup,
                        "failed to roll back partial ingestion"
                    ),
                }
                Err(error.into())
            }
        }
    }

    async fn index_batches(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        batch_size: usize,
    ) -> Result<usize, BackendError> {
        let mut batches = 0;
        for (batch, slice) in records.chunks(batch_size).enumerate() {
            let mut embeddings = Vec::with_capacity(slice.len());
            for record in slice {
                embeddings.push(
                    self.embedder
                        .embed(&record.text, EmbeddingTask::Document)
                        .await?,
                );
            }

            if batch == 0 {
                let dimensions = embeddings.first().map(Vec::len).unwrap_or_default();
                self.index
                    .get_or_create_collection(collection, dimensions)
                    .await?;
            }

            self.index.upsert(collection, slice, &embeddings).await?;
            debug!(collection, batch, chunk_count = slice.len(), "upserted batch");
            batches += 1;
        }
        Ok(batches)
    }

    /// Top `top_k` chunks of the document nearest to `query_text`, best
    /// match first. A document that was never indexed has no context.
    pub async fn query(
        &self,
        document_id: i64,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        let collection = collection_name(document_id);
        if !self.index.collection_exists(&collection).await? {
            debug!(collection = %collection, "collection not found");
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed(query_text, EmbeddingTask::Query)
            .await?;
        let mut hits = self.index.query(&collection, &vector, top_k).await?;
        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));

        debug!(collection = %collection, hits = hits.len(), "queried collection");
        Ok(hits)
    }

    /// Drops the document's collection; returns whether it existed.
    pub async fn delete_index(&self, document_id: i64) -> Result<bool, BackendError> {
        self.index
            .delete_collection(&collection_name(document_id))
            .await
    }
}
