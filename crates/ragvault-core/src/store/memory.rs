//! In-memory [`Store`] implementation for testing and embedded use.
//!
//! All state sits behind one `parking_lot::RwLock`, which makes every
//! method atomic: the row uniqueness check and the insert happen under the
//! same write guard, and cascading deletes are all-or-nothing.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::models::{now_ts, Dataset, DatasetDeletion, Document, NewDataset, Row, RowId};

use super::Store;

#[derive(Default)]
struct Inner {
    datasets: HashMap<String, Dataset>,
    rows: BTreeMap<RowId, Row>,
    /// `(dataset_id, row_hash)` → row id. The uniqueness constraint.
    row_hashes: HashMap<(String, String), RowId>,
    last_row_id: RowId,
    documents: BTreeMap<String, Document>,
    /// document id → `(generation, list_no)`.
    placements: HashMap<String, (u64, usize)>,
    centroids: Option<(u64, Vec<Vec<f32>>)>,
}

impl Inner {
    fn remove_row(&mut self, id: RowId) {
        if let Some(row) = self.rows.remove(&id) {
            if let Some(hash) = row.row_hash {
                self.row_hashes.remove(&(row.dataset_id, hash));
            }
        }
    }

    fn remove_document(&mut self, id: &str) -> bool {
        self.placements.remove(id);
        self.documents.remove(id).is_some()
    }

    fn missing_dataset(dataset_id: &str) -> EngineError {
        EngineError::ConstraintViolation(format!("dataset '{dataset_id}' does not exist"))
    }
}

/// In-memory store.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_dataset(&self, dataset: &NewDataset) -> Result<Dataset> {
        let mut inner = self.inner.write();
        let stored = inner
            .datasets
            .entry(dataset.id.clone())
            .and_modify(|d| {
                d.title = dataset.title.clone();
                d.url = dataset.url.clone();
            })
            .or_insert_with(|| Dataset {
                id: dataset.id.clone(),
                title: dataset.title.clone(),
                url: dataset.url.clone(),
                created_at: now_ts(),
                schema: Vec::new(),
            });
        Ok(stored.clone())
    }

    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        Ok(self.inner.read().datasets.get(id).cloned())
    }

    async fn set_dataset_schema(&self, id: &str, schema: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        let dataset = inner
            .datasets
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("dataset '{id}'")))?;
        dataset.schema = schema.to_vec();
        Ok(())
    }

    async fn delete_dataset(&self, id: &str) -> Result<Option<DatasetDeletion>> {
        let mut inner = self.inner.write();
        if inner.datasets.remove(id).is_none() {
            return Ok(None);
        }

        let row_ids: Vec<RowId> = inner
            .rows
            .values()
            .filter(|r| r.dataset_id == id)
            .map(|r| r.id)
            .collect();
        for row_id in &row_ids {
            inner.remove_row(*row_id);
        }

        let document_ids: Vec<String> = inner
            .documents
            .values()
            .filter(|d| d.dataset_id.as_deref() == Some(id))
            .map(|d| d.id.clone())
            .collect();
        for doc_id in &document_ids {
            inner.remove_document(doc_id);
        }

        Ok(Some(DatasetDeletion {
            rows_deleted: row_ids.len() as u64,
            document_ids,
        }))
    }

    async fn insert_row(
        &self,
        dataset_id: &str,
        row_data: &Value,
        row_hash: Option<&str>,
    ) -> Result<RowId> {
        let mut inner = self.inner.write();
        if !inner.datasets.contains_key(dataset_id) {
            return Err(Inner::missing_dataset(dataset_id));
        }
        if let Some(hash) = row_hash {
            let key = (dataset_id.to_string(), hash.to_string());
            if inner.row_hashes.contains_key(&key) {
                return Err(EngineError::DuplicateContent {
                    dataset_id: dataset_id.to_string(),
                    row_hash: hash.to_string(),
                });
            }
        }

        inner.last_row_id += 1;
        let id = inner.last_row_id;
        if let Some(hash) = row_hash {
            inner
                .row_hashes
                .insert((dataset_id.to_string(), hash.to_string()), id);
        }
        inner.rows.insert(
            id,
            Row {
                id,
                dataset_id: dataset_id.to_string(),
                row_data: row_data.clone(),
                row_hash: row_hash.map(str::to_string),
                created_at: now_ts(),
            },
        );
        Ok(id)
    }

    async fn find_row_by_hash(&self, dataset_id: &str, row_hash: &str) -> Result<Option<RowId>> {
        let inner = self.inner.read();
        Ok(inner
            .row_hashes
            .get(&(dataset_id.to_string(), row_hash.to_string()))
            .copied())
    }

    async fn get_row(&self, id: RowId) -> Result<Option<Row>> {
        Ok(self.inner.read().rows.get(&id).cloned())
    }

    async fn list_rows(&self, dataset_id: &str) -> Result<Vec<Row>> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .values()
            .filter(|r| r.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn count_rows(&self, dataset_id: &str) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner.rows.values().filter(|r| r.dataset_id == dataset_id).count() as u64)
    }

    async fn delete_rows_by_hash(&self, dataset_id: &str, hashes: &[String]) -> Result<u64> {
        let mut inner = self.inner.write();
        let mut deleted = 0;
        for hash in hashes {
            if let Some(id) = inner
                .row_hashes
                .get(&(dataset_id.to_string(), hash.clone()))
                .copied()
            {
                inner.remove_row(id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_all_rows(&self, dataset_id: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let ids: Vec<RowId> = inner
            .rows
            .values()
            .filter(|r| r.dataset_id == dataset_id)
            .map(|r| r.id)
            .collect();
        for id in &ids {
            inner.remove_row(*id);
        }
        Ok(ids.len() as u64)
    }

    async fn rows_missing_hash(&self, after: RowId, limit: usize) -> Result<Vec<Row>> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .range(after + 1..)
            .map(|(_, r)| r)
            .filter(|r| r.row_hash.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_row_hash(&self, id: RowId, row_hash: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let dataset_id = match inner.rows.get(&id) {
            Some(row) if row.row_hash.is_none() => row.dataset_id.clone(),
            Some(_) => return Ok(false),
            None => return Err(EngineError::NotFound(format!("row {id}"))),
        };
        let key = (dataset_id.clone(), row_hash.to_string());
        if inner.row_hashes.contains_key(&key) {
            return Err(EngineError::DuplicateContent {
                dataset_id,
                row_hash: row_hash.to_string(),
            });
        }
        inner.row_hashes.insert(key, id);
        if let Some(row) = inner.rows.get_mut(&id) {
            row.row_hash = Some(row_hash.to_string());
        }
        Ok(true)
    }

    async fn put_document(&self, doc: &Document) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(dataset_id) = &doc.dataset_id {
            if !inner.datasets.contains_key(dataset_id) {
                return Err(Inner::missing_dataset(dataset_id));
            }
        }
        inner.placements.remove(&doc.id);
        inner.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.inner.read().documents.get(id).cloned())
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.documents.get(id).cloned())
            .collect())
    }

    async fn scan_documents(&self, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        let inner = self.inner.read();
        let docs = inner.documents.values();
        let page: Vec<Document> = match after {
            Some(after) => docs
                .filter(|d| d.id.as_str() > after)
                .take(limit)
                .cloned()
                .collect(),
            None => docs.take(limit).cloned().collect(),
        };
        Ok(page)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().remove_document(id))
    }

    async fn delete_documents_by_dataset(&self, dataset_id: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.write();
        let ids: Vec<String> = inner
            .documents
            .values()
            .filter(|d| d.dataset_id.as_deref() == Some(dataset_id))
            .map(|d| d.id.clone())
            .collect();
        for id in &ids {
            inner.remove_document(id);
        }
        Ok(ids)
    }

    async fn count_documents(&self) -> Result<u64> {
        Ok(self.inner.read().documents.len() as u64)
    }

    async fn scan_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let inner = self.inner.read();
        Ok(inner
            .documents
            .values()
            .map(|d| (d.id.clone(), d.embedding.clone()))
            .collect())
    }

    async fn embedding_dims(&self) -> Result<Vec<usize>> {
        let inner = self.inner.read();
        let mut dims: Vec<usize> = inner.documents.values().map(|d| d.embedding.len()).collect();
        dims.sort_unstable();
        dims.dedup();
        Ok(dims)
    }

    async fn save_list_members(&self, generation: u64, members: &[(String, usize)]) -> Result<()> {
        let mut inner = self.inner.write();
        for (id, list) in members {
            if inner.documents.contains_key(id) {
                inner.placements.insert(id.clone(), (generation, *list));
            }
        }
        Ok(())
    }

    async fn load_list_members(&self, generation: u64) -> Result<Vec<(String, usize)>> {
        let inner = self.inner.read();
        Ok(inner
            .placements
            .iter()
            .filter(|(_, (g, _))| *g == generation)
            .map(|(id, (_, list))| (id.clone(), *list))
            .collect())
    }

    async fn unplaced_embeddings(&self, generation: u64) -> Result<Vec<(String, Vec<f32>)>> {
        let inner = self.inner.read();
        Ok(inner
            .documents
            .values()
            .filter(|d| !matches!(inner.placements.get(&d.id), Some((g, _)) if *g == generation))
            .map(|d| (d.id.clone(), d.embedding.clone()))
            .collect())
    }

    async fn save_centroids(&self, generation: u64, centroids: &[Vec<f32>]) -> Result<()> {
        self.inner.write().centroids = Some((generation, centroids.to_vec()));
        Ok(())
    }

    async fn load_centroids(&self) -> Result<Option<(u64, Vec<Vec<f32>>)>> {
        Ok(self.inner.read().centroids.clone())
    }
}
