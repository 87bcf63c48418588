//! Document retrieval by ID (`rvault doc get`).

use anyhow::{bail, Result};
use ragvault_core::models::{format_ts_iso, Document, Metadata};
use serde::Serialize;

use crate::config::Config;
use crate::db;

/// Printable view of a stored document. The embedding is summarized by
/// its dimension.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub dataset_id: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub dims: usize,
    pub created_at: String, // ISO8601
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            dims: doc.embedding.len(),
            created_at: format_ts_iso(doc.created_at),
            id: doc.id,
            dataset_id: doc.dataset_id,
            content: doc.content,
            metadata: doc.metadata,
        }
    }
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let Some(doc) = engine.get_document(id).await? else {
        bail!("document not found: {}", id);
    };
    let response = DocumentResponse::from(doc);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
