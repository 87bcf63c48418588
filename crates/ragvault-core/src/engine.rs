//! The engine facade.
//!
//! [`Engine`] owns a [`Store`] and the [`IvfIndex`] built over it, and is
//! the API the application drives. All methods take `&self`; share an
//! engine across tasks with `Arc<Engine<S>>`.

use serde_json::Value;

use crate::chunk::ChunkParams;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::ingest::{
    self, BackfillReport, RowIngest, RowSyncReport, SyncMode, TextIngestOptions, TextIngestReport,
};
use crate::ivf::{IndexStats, IvfIndex, IvfParams};
use crate::models::{Dataset, DatasetDeletion, Document, DocumentMatch, NewDataset, NewDocument, RowId};
use crate::search::{self, QueryRequest};
use crate::store::Store;

/// Engine settings. `dims` has no sensible default.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Embedding dimension `D`.
    pub dims: usize,
    /// Documents fetched from the store per query batch.
    pub fetch_batch: usize,
    pub index: IvfParams,
    pub chunk: ChunkParams,
    pub embed_batch_size: usize,
}

impl EngineConfig {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            fetch_batch: 256,
            index: IvfParams::default(),
            chunk: ChunkParams::default(),
            embed_batch_size: 64,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dims == 0 {
            return Err(EngineError::invalid("dims must be positive"));
        }
        if self.fetch_batch == 0 {
            return Err(EngineError::invalid("fetch_batch must be positive"));
        }
        if self.index.probes == 0 {
            return Err(EngineError::invalid("probes must be >= 1"));
        }
        self.chunk.validate()
    }
}

/// Vector search engine over a store.
pub struct Engine<S: Store> {
    store: S,
    index: IvfIndex,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    /// Open an engine over `store`, restoring the persisted index if any.
    ///
    /// Fails with [`EngineError::DimensionMismatch`] if the store holds
    /// documents whose embeddings are not `config.dims` long. Centroids that
    /// do not match `config.dims` are ignored with a warning and the index
    /// starts untrained.
    pub async fn open(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        if let Some(&actual) = store
            .embedding_dims()
            .await?
            .iter()
            .find(|&&d| d != config.dims)
        {
            return Err(EngineError::DimensionMismatch {
                expected: config.dims,
                actual,
            });
        }

        let index = IvfIndex::new(config.dims, config.index.clone());
        if let Some((generation, centroids)) = store.load_centroids().await? {
            match restore_index(&store, &index, generation, centroids).await {
                Ok(stats) => tracing::info!(
                    generation = stats.generation,
                    lists = stats.lists,
                    indexed = stats.indexed,
                    "restored IVF index"
                ),
                Err(EngineError::IndexUnavailable(reason)) => {
                    tracing::warn!(%reason, "ignoring persisted IVF centroids; queries will full-scan")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            store,
            index,
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &IvfIndex {
        &self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Release the store, dropping the in-memory index.
    pub fn into_store(self) -> S {
        self.store
    }

    // ── Datasets ───────────────────────────────────────────────

    /// Create a dataset, or update title and url of an existing one.
    pub async fn create_dataset(&self, dataset: &NewDataset) -> Result<Dataset> {
        if dataset.id.trim().is_empty() {
            return Err(EngineError::invalid("dataset id must not be empty"));
        }
        self.store.upsert_dataset(dataset).await
    }

    pub async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        self.store.get_dataset(id).await
    }

    /// Delete a dataset with its rows and documents, and drop those
    /// documents from the index.
    pub async fn delete_dataset(&self, id: &str) -> Result<Option<DatasetDeletion>> {
        let deletion = self.store.delete_dataset(id).await?;
        if let Some(d) = &deletion {
            for doc_id in &d.document_ids {
                self.index.remove(doc_id);
            }
            tracing::info!(
                dataset_id = id,
                rows = d.rows_deleted,
                documents = d.document_ids.len(),
                "deleted dataset"
            );
        }
        Ok(deletion)
    }

    // ── Rows ───────────────────────────────────────────────────

    pub async fn ingest_row(&self, dataset_id: &str, row_data: &Value) -> Result<RowId> {
        ingest::ingest_row(&self.store, dataset_id, row_data).await
    }

    /// Like [`ingest_row`](Self::ingest_row), also reporting whether this
    /// call wrote the row.
    pub async fn ingest_row_with_status(
        &self,
        dataset_id: &str,
        row_data: &Value,
    ) -> Result<RowIngest> {
        ingest::ingest_row_with_status(&self.store, dataset_id, row_data).await
    }

    pub async fn sync_rows(
        &self,
        dataset: &NewDataset,
        rows: &[Value],
        mode: SyncMode,
    ) -> Result<RowSyncReport> {
        ingest::sync_rows(&self.store, dataset, rows, mode).await
    }

    pub async fn backfill_row_hashes(&self, batch_size: usize) -> Result<BackfillReport> {
        ingest::backfill_row_hashes(&self.store, batch_size).await
    }

    // ── Documents ──────────────────────────────────────────────

    pub async fn ingest_document(&self, doc: NewDocument) -> Result<String> {
        ingest::ingest_document(&self.store, &self.index, doc).await
    }

    pub async fn ingest_text<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
        dataset: &NewDataset,
        content: &str,
    ) -> Result<TextIngestReport> {
        let options = TextIngestOptions {
            chunk: self.config.chunk,
            embed_batch_size: self.config.embed_batch_size,
        };
        ingest::ingest_text(&self.store, &self.index, embedder, dataset, content, options).await
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.store.get_document(id).await
    }

    /// Delete one document from the store and the index.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete_document(id).await?;
        if removed {
            self.index.remove(id);
        }
        Ok(removed)
    }

    // ── Query ──────────────────────────────────────────────────

    pub async fn query_documents(&self, req: &QueryRequest<'_>) -> Result<Vec<DocumentMatch>> {
        search::query_documents(&self.store, &self.index, req, self.config.fetch_batch).await
    }

    // ── Index maintenance ──────────────────────────────────────

    /// Retrain the index from every stored embedding and publish it.
    ///
    /// Fails with [`EngineError::IndexUnavailable`] if a rebuild is already
    /// running. Queries keep using the previous generation until the swap.
    pub async fn rebuild_index(&self) -> Result<IndexStats> {
        let guard = self.index.begin_rebuild()?;
        let vectors = self.store.scan_embeddings().await?;
        let generation = self.index.generation() + 1;
        let next = self.index.train(generation, &vectors)?;
        self.store.save_centroids(generation, next.centroids()).await?;
        let stats = guard.publish(next);

        // Placements include writes replayed at publish time.
        let published = self.index.snapshot();
        self.store
            .save_list_members(published.generation(), &published.members())
            .await?;
        Ok(stats)
    }

    /// Rebuild if [`needs_rebuild`](Self::needs_rebuild) says so. Returns
    /// the new stats when a rebuild ran. A rebuild already in flight is not
    /// an error here.
    pub async fn rebuild_if_needed(&self) -> Result<Option<IndexStats>> {
        if !self.needs_rebuild().await? {
            return Ok(None);
        }
        match self.rebuild_index().await {
            Ok(stats) => Ok(Some(stats)),
            Err(EngineError::IndexUnavailable(reason)) => {
                tracing::debug!(%reason, "skipping automatic rebuild");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub async fn needs_rebuild(&self) -> Result<bool> {
        let count = self.store.count_documents().await?;
        Ok(self.index.needs_rebuild(count as usize))
    }
}

/// Rebuild the lists around persisted centroids. Only documents without a
/// placement for `generation` have their embeddings read; their new
/// placements are written back.
async fn restore_index<S: Store + ?Sized>(
    store: &S,
    index: &IvfIndex,
    generation: u64,
    centroids: Vec<Vec<f32>>,
) -> Result<IndexStats> {
    let members = store.load_list_members(generation).await?;
    let unplaced = store.unplaced_embeddings(generation).await?;
    let restored = index.restore(generation, centroids, &members, &unplaced)?;
    if !restored.placed.is_empty() {
        tracing::debug!(
            generation,
            placed = restored.placed.len(),
            "persisting placements for unplaced documents"
        );
        store.save_list_members(generation, &restored.placed).await?;
    }
    Ok(restored.stats)
}
