//! Core data models shared by the engine, the stores, and the CLI.
//!
//! Timestamps are Unix seconds (`i64`) like the rest of the storage layer;
//! [`format_ts_iso`] renders them for display.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured document metadata. Always a JSON object.
pub type Metadata = Map<String, Value>;

/// Sequence-assigned row identifier.
pub type RowId = i64;

/// A named collection of rows and documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_at: i64,
    /// Ordered union of row keys, in first-seen order.
    pub schema: Vec<String>,
}

/// Input for creating (or re-titling) a dataset.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl NewDataset {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// A structured record owned by a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub dataset_id: String,
    pub row_data: Value,
    /// `None` only for rows imported before hashing existed.
    pub row_hash: Option<String>,
    pub created_at: i64,
}

/// A stored embedding with its content and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub dataset_id: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    pub created_at: i64,
}

/// Input for [`Engine::ingest_document`](crate::engine::Engine::ingest_document).
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub dataset_id: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMatch {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f32,
}

/// What a cascading dataset delete removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetDeletion {
    pub rows_deleted: u64,
    pub document_ids: Vec<String>,
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
