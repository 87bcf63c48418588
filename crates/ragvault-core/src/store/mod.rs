//! Storage abstraction for RagVault.
//!
//! The [`Store`] trait is everything the engine needs from the relational
//! collaborator: datasets, rows with a scoped uniqueness constraint,
//! documents with embeddings, and a place to persist IVF centroids and
//! list placements.
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Contract
//!
//! - [`insert_row`](Store::insert_row) is the dedup arbitration point. When
//!   a row with the same `(dataset_id, row_hash)` exists it must fail with
//!   [`EngineError::DuplicateContent`](crate::error::EngineError::DuplicateContent)
//!   and write nothing. A missing dataset is
//!   [`EngineError::ConstraintViolation`](crate::error::EngineError::ConstraintViolation).
//! - [`delete_dataset`](Store::delete_dataset) cascades to rows and documents
//!   atomically and reports the removed document ids so the caller can
//!   update the index.
//! - List placements are tagged with an index generation. Deleting a
//!   document drops its placement with it.
//! - Any other backend failure travels as
//!   [`EngineError::Storage`](crate::error::EngineError::Storage).

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{Dataset, DatasetDeletion, Document, NewDataset, Row, RowId};

/// Abstract storage backend.
///
/// | Method group | Purpose |
/// |--------------|---------|
/// | `*_dataset*` | Dataset lifecycle and schema |
/// | `*row*` | Row insert, dedup lookup, sync deletes, hash backfill |
/// | `*document*` | Document records and cascade |
/// | [`scan_embeddings`](Store::scan_embeddings) | Input for index training |
/// | `*centroids`, `*list_members`, [`unplaced_embeddings`](Store::unplaced_embeddings) | IVF persistence |
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a dataset, or update title/url if it exists. Returns the stored row.
    async fn upsert_dataset(&self, dataset: &NewDataset) -> Result<Dataset>;

    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>>;

    /// Replace the dataset's schema descriptor.
    async fn set_dataset_schema(&self, id: &str, schema: &[String]) -> Result<()>;

    /// Delete a dataset with all its rows and documents. `None` if it did not exist.
    async fn delete_dataset(&self, id: &str) -> Result<Option<DatasetDeletion>>;

    /// Insert a row. `row_hash` is `None` only when importing legacy data.
    async fn insert_row(
        &self,
        dataset_id: &str,
        row_data: &Value,
        row_hash: Option<&str>,
    ) -> Result<RowId>;

    async fn find_row_by_hash(&self, dataset_id: &str, row_hash: &str) -> Result<Option<RowId>>;

    async fn get_row(&self, id: RowId) -> Result<Option<Row>>;

    /// All rows of a dataset in id order.
    async fn list_rows(&self, dataset_id: &str) -> Result<Vec<Row>>;

    async fn count_rows(&self, dataset_id: &str) -> Result<u64>;

    /// Delete rows of a dataset whose hash is in `hashes`. Returns rows removed.
    async fn delete_rows_by_hash(&self, dataset_id: &str, hashes: &[String]) -> Result<u64>;

    /// Delete every row of a dataset. Returns rows removed.
    async fn delete_all_rows(&self, dataset_id: &str) -> Result<u64>;

    /// Up to `limit` rows with no hash and an id greater than `after`, in id order.
    async fn rows_missing_hash(&self, after: RowId, limit: usize) -> Result<Vec<Row>>;

    /// Set the hash of a row that has none. Returns `false` if the row
    /// already had a hash. Collisions fail with `DuplicateContent`.
    async fn set_row_hash(&self, id: RowId, row_hash: &str) -> Result<bool>;

    /// Insert a document. Fails with `ConstraintViolation` if its dataset is missing.
    async fn put_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Fetch the documents that exist among `ids`, in no particular order.
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Fetch a page of all documents ordered by id, starting after `after`.
    async fn scan_documents(&self, after: Option<&str>, limit: usize) -> Result<Vec<Document>>;

    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Delete every document owned by a dataset. Returns their ids.
    async fn delete_documents_by_dataset(&self, dataset_id: &str) -> Result<Vec<String>>;

    async fn count_documents(&self) -> Result<u64>;

    /// `(id, embedding)` for every stored document.
    async fn scan_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>>;

    /// Distinct embedding dimensions among stored documents.
    async fn embedding_dims(&self) -> Result<Vec<usize>>;

    /// Record `(document_id, list_no)` placements under `generation`,
    /// replacing any earlier placement of those documents. Unknown ids are
    /// skipped.
    async fn save_list_members(&self, generation: u64, members: &[(String, usize)]) -> Result<()>;

    /// `(document_id, list_no)` for documents placed under `generation`.
    async fn load_list_members(&self, generation: u64) -> Result<Vec<(String, usize)>>;

    /// `(id, embedding)` for documents with no placement under `generation`.
    async fn unplaced_embeddings(&self, generation: u64) -> Result<Vec<(String, Vec<f32>)>>;

    /// Replace the persisted centroid table.
    async fn save_centroids(&self, generation: u64, centroids: &[Vec<f32>]) -> Result<()>;

    /// Persisted `(generation, centroids)`, if any were saved.
    async fn load_centroids(&self) -> Result<Option<(u64, Vec<Vec<f32>>)>>;
}
