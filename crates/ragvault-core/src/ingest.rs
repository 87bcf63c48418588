//! Dedup ingest pipeline.
//!
//! Rows are fingerprinted with [`hash_value`] and written through the
//! store's `(dataset_id, row_hash)` uniqueness constraint. The constraint is
//! the only arbiter of "already present": a rejected insert is resolved to
//! the existing row's id, so re-ingesting the same content is a no-op that
//! returns the original id.
//!
//! Documents are validated, stored, then added to the IVF index. Text
//! ingest chunks and embeds content and replaces every document the
//! dataset previously owned.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::chunk::{chunk_text, ChunkParams};
use crate::embedding::{validate_embedding, Embedder};
use crate::error::{EngineError, Result};
use crate::hash::hash_value;
use crate::ivf::IvfIndex;
use crate::models::{now_ts, Document, Metadata, NewDataset, NewDocument, RowId};
use crate::store::Store;

/// How [`sync_rows`] treats rows already in the dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Insert new content, delete rows absent from the batch.
    #[default]
    Incremental,
    /// Delete every row, then insert the batch.
    FullRefresh,
}

/// Outcome of [`sync_rows`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSyncReport {
    pub dataset_id: String,
    pub mode: SyncMode,
    pub inserted: u64,
    pub deleted: u64,
    /// Incoming rows whose content was already stored.
    pub unchanged: u64,
    pub schema: Vec<String>,
}

/// Outcome of [`backfill_row_hashes`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub scanned: u64,
    pub hashed: u64,
    /// Rows left unhashed because another row of the dataset already
    /// carries the same hash.
    pub conflicts: u64,
    /// Rows hashed by someone else between the scan and the update.
    pub skipped: u64,
    pub batches: u64,
}

/// Outcome of [`ingest_text`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextIngestReport {
    pub dataset_id: String,
    pub chunks: usize,
    /// Documents of the dataset removed before the new chunks were written.
    pub replaced: usize,
    pub document_ids: Vec<String>,
}

/// Tunables for [`ingest_text`].
#[derive(Debug, Clone, Copy)]
pub struct TextIngestOptions {
    pub chunk: ChunkParams,
    pub embed_batch_size: usize,
}

impl Default for TextIngestOptions {
    fn default() -> Self {
        Self {
            chunk: ChunkParams::default(),
            embed_batch_size: 64,
        }
    }
}

fn require_object(row_data: &Value) -> Result<()> {
    if row_data.is_object() {
        Ok(())
    } else {
        Err(EngineError::invalid(format!(
            "row_data must be a JSON object, got {}",
            json_kind(row_data)
        )))
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Insert a pre-hashed row, resolving a constraint hit to the existing id.
/// Returns the id and whether a new row was written.
async fn insert_hashed<S: Store + ?Sized>(
    store: &S,
    dataset_id: &str,
    row_data: &Value,
    row_hash: &str,
) -> Result<(RowId, bool)> {
    // A second attempt covers the row being deleted between the rejected
    // insert and the lookup.
    for _ in 0..2 {
        match store.insert_row(dataset_id, row_data, Some(row_hash)).await {
            Ok(id) => return Ok((id, true)),
            Err(EngineError::DuplicateContent { .. }) => {
                if let Some(id) = store.find_row_by_hash(dataset_id, row_hash).await? {
                    tracing::debug!(dataset_id, row_hash, row_id = id, "duplicate row resolved");
                    return Ok((id, false));
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(EngineError::ConstraintViolation(format!(
        "row {row_hash} in dataset '{dataset_id}' is being concurrently replaced"
    )))
}

/// Result of [`ingest_row_with_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowIngest {
    pub id: RowId,
    /// `false` when the content was already present and its row returned.
    pub created: bool,
}

/// Ingest one row. Identical content (in any key order) yields the same id.
pub async fn ingest_row<S: Store + ?Sized>(
    store: &S,
    dataset_id: &str,
    row_data: &Value,
) -> Result<RowId> {
    Ok(ingest_row_with_status(store, dataset_id, row_data).await?.id)
}

pub async fn ingest_row_with_status<S: Store + ?Sized>(
    store: &S,
    dataset_id: &str,
    row_data: &Value,
) -> Result<RowIngest> {
    require_object(row_data)?;
    let row_hash = hash_value(row_data);
    let (id, created) = insert_hashed(store, dataset_id, row_data, &row_hash).await?;
    Ok(RowIngest { id, created })
}

/// Ordered union of the keys of `rows`, in first-seen order.
pub fn schema_keys(rows: &[Value]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for row in rows {
        require_object(row)?;
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if seen.insert(key.as_str()) {
                    keys.push(key.clone());
                }
            }
        }
    }
    if keys.is_empty() {
        return Err(EngineError::invalid("rows contain no keys"));
    }
    Ok(keys)
}

/// Bring a dataset's rows in line with `rows`.
pub async fn sync_rows<S: Store + ?Sized>(
    store: &S,
    dataset: &NewDataset,
    rows: &[Value],
    mode: SyncMode,
) -> Result<RowSyncReport> {
    let schema = schema_keys(rows)?;

    let mut incoming_hashes = HashSet::new();
    let mut incoming = Vec::new();
    for row in rows {
        let hash = hash_value(row);
        if incoming_hashes.insert(hash.clone()) {
            incoming.push((hash, row));
        }
    }

    store.upsert_dataset(dataset).await?;
    store.set_dataset_schema(&dataset.id, &schema).await?;

    let (deleted, existing) = match mode {
        SyncMode::FullRefresh => (store.delete_all_rows(&dataset.id).await?, HashSet::new()),
        SyncMode::Incremental => {
            let existing: HashSet<String> = store
                .list_rows(&dataset.id)
                .await?
                .into_iter()
                .filter_map(|r| r.row_hash)
                .collect();
            let stale: Vec<String> = existing
                .iter()
                .filter(|h| !incoming_hashes.contains(*h))
                .cloned()
                .collect();
            let deleted = if stale.is_empty() {
                0
            } else {
                store.delete_rows_by_hash(&dataset.id, &stale).await?
            };
            (deleted, existing)
        }
    };

    let mut inserted = 0;
    let mut unchanged = 0;
    for (hash, row) in incoming {
        if existing.contains(&hash) {
            unchanged += 1;
            continue;
        }
        let (_, created) = insert_hashed(store, &dataset.id, row, &hash).await?;
        if created {
            inserted += 1;
        } else {
            unchanged += 1;
        }
    }

    tracing::info!(
        dataset_id = %dataset.id,
        ?mode,
        inserted,
        deleted,
        unchanged,
        "synced rows"
    );

    Ok(RowSyncReport {
        dataset_id: dataset.id.clone(),
        mode,
        inserted,
        deleted,
        unchanged,
        schema,
    })
}

/// Compute and store the hash of every row that lacks one.
///
/// Already-hashed rows are never touched, so re-running is safe. A row
/// whose hash collides with an existing row of its dataset stays unhashed
/// and is reported as a conflict.
pub async fn backfill_row_hashes<S: Store + ?Sized>(
    store: &S,
    batch_size: usize,
) -> Result<BackfillReport> {
    if batch_size == 0 {
        return Err(EngineError::invalid("batch_size must be positive"));
    }

    let mut report = BackfillReport::default();
    let mut after: RowId = 0;
    loop {
        let batch = store.rows_missing_hash(after, batch_size).await?;
        let Some(last) = batch.last() else { break };
        after = last.id;
        let full = batch.len() == batch_size;
        report.batches += 1;

        for row in &batch {
            report.scanned += 1;
            let hash = hash_value(&row.row_data);
            match store.set_row_hash(row.id, &hash).await {
                Ok(true) => report.hashed += 1,
                Ok(false) => report.skipped += 1,
                Err(EngineError::DuplicateContent { dataset_id, .. }) => {
                    tracing::warn!(
                        row_id = row.id,
                        %dataset_id,
                        "row duplicates existing content; left unhashed"
                    );
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            batch = report.batches,
            hashed = report.hashed,
            conflicts = report.conflicts,
            "backfill progress"
        );
        if !full {
            break;
        }
    }
    Ok(report)
}

/// Validate, store and index one document. Returns the new id.
pub async fn ingest_document<S: Store + ?Sized>(
    store: &S,
    index: &IvfIndex,
    doc: NewDocument,
) -> Result<String> {
    validate_embedding(&doc.embedding, index.dims())?;
    let record = Document {
        id: Uuid::new_v4().to_string(),
        dataset_id: doc.dataset_id,
        content: doc.content,
        metadata: doc.metadata,
        embedding: doc.embedding,
        created_at: now_ts(),
    };
    store.put_document(&record).await?;
    if let Some((generation, list)) = index.insert(&record.id, &record.embedding) {
        store
            .save_list_members(generation, &[(record.id.clone(), list)])
            .await?;
    }
    Ok(record.id)
}

fn chunk_metadata(dataset: &NewDataset, chunk_index: usize) -> Metadata {
    let value = json!({
        "dataset_id": dataset.id,
        "dataset_title": dataset.title,
        "dataset_url": dataset.url,
        "content_type": "text",
        "chunk_index": chunk_index,
    });
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

/// Chunk, embed and store `content` as the dataset's documents,
/// replacing any it had before.
///
/// Embedding happens before anything is written, so a failing embedder
/// leaves the dataset untouched.
pub async fn ingest_text<S: Store + ?Sized, E: Embedder + ?Sized>(
    store: &S,
    index: &IvfIndex,
    embedder: &E,
    dataset: &NewDataset,
    content: &str,
    options: TextIngestOptions,
) -> Result<TextIngestReport> {
    let chunks = chunk_text(content, options.chunk)?;
    if chunks.is_empty() {
        return Err(EngineError::invalid("no chunks produced from content"));
    }
    if embedder.dims() != index.dims() {
        return Err(EngineError::DimensionMismatch {
            expected: index.dims(),
            actual: embedder.dims(),
        });
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(options.embed_batch_size.max(1)) {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EngineError::Storage(anyhow::anyhow!(
                "embedder {} returned {} vectors for {} texts",
                embedder.model_name(),
                vectors.len(),
                batch.len()
            )));
        }
        for v in &vectors {
            validate_embedding(v, index.dims())?;
        }
        embeddings.extend(vectors);
    }

    store.upsert_dataset(dataset).await?;
    let replaced = store.delete_documents_by_dataset(&dataset.id).await?;
    for id in &replaced {
        index.remove(id);
    }

    let mut document_ids = Vec::with_capacity(chunks.len());
    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        let doc = NewDocument {
            dataset_id: Some(dataset.id.clone()),
            content: chunk.text.clone(),
            metadata: chunk_metadata(dataset, chunk.index),
            embedding,
        };
        document_ids.push(ingest_document(store, index, doc).await?);
    }

    tracing::info!(
        dataset_id = %dataset.id,
        model = embedder.model_name(),
        chunks = chunks.len(),
        replaced = replaced.len(),
        "ingested text"
    );

    Ok(TextIngestReport {
        dataset_id: dataset.id.clone(),
        chunks: chunks.len(),
        replaced: replaced.len(),
        document_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivf::IvfParams;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct CharCountEmbedder;

    #[async_trait]
    impl Embedder for CharCountEmbedder {
        fn model_name(&self) -> &str {
            "char-count"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.chars().count() as f32, 1.0, 0.0])
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("provider offline")
        }
    }

    async fn store_with(dataset: &str) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .upsert_dataset(&NewDataset::new(dataset, dataset, "local://test"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let store = store_with("D1").await;
        let r1 = ingest_row(&store, "D1", &json!({"a": 1, "b": 2})).await.unwrap();
        let again = ingest_row(&store, "D1", &json!({"b": 2, "a": 1})).await.unwrap();
        assert_eq!(r1, again);
        assert_eq!(store.count_rows("D1").await.unwrap(), 1);

        let r2 = ingest_row(&store, "D1", &json!({"a": 1, "b": 3})).await.unwrap();
        assert_ne!(r1, r2);
        assert_eq!(store.count_rows("D1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_row_status_reports_creation() {
        let store = store_with("D1").await;
        let first = ingest_row_with_status(&store, "D1", &json!({"a": 1})).await.unwrap();
        let again = ingest_row_with_status(&store, "D1", &json!({"a": 1})).await.unwrap();
        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.id, again.id);
    }

    #[tokio::test]
    async fn test_same_content_in_other_dataset_is_new_row() {
        let store = store_with("D1").await;
        store
            .upsert_dataset(&NewDataset::new("D2", "D2", ""))
            .await
            .unwrap();
        let a = ingest_row(&store, "D1", &json!({"k": "v"})).await.unwrap();
        let b = ingest_row(&store, "D2", &json!({"k": "v"})).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_ingest_row_validation() {
        let store = store_with("D1").await;
        let err = ingest_row(&store, "D1", &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(ref m) if m.contains("an array")));

        let err = ingest_row(&store, "nope", &json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn test_schema_keys_first_seen_order() {
        let rows = vec![json!({"a": 2, "b": 1}), json!({"c": 3, "a": 4})];
        assert_eq!(schema_keys(&rows).unwrap(), ["a", "b", "c"]);
        assert!(schema_keys(&[json!({})]).is_err());
        assert!(schema_keys(&[json!({"a": 1}), json!(3)]).is_err());
    }

    #[tokio::test]
    async fn test_incremental_sync() {
        let store = InMemoryStore::new();
        let ds = NewDataset::new("sales", "Sales", "file://sales.csv");
        let first = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 2})];
        let report = sync_rows(&store, &ds, &first, SyncMode::Incremental).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.schema, ["id"]);

        let second = vec![json!({"id": 2}), json!({"id": 3})];
        let report = sync_rows(&store, &ds, &second, SyncMode::Incremental).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.unchanged, 1);

        let rows: Vec<Value> = store
            .list_rows("sales")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.row_data)
            .collect();
        assert_eq!(rows, [json!({"id": 2}), json!({"id": 3})]);
        let stored = store.get_dataset("sales").await.unwrap().unwrap();
        assert_eq!(stored.schema, ["id"]);
    }

    #[tokio::test]
    async fn test_full_refresh_sync() {
        let store = InMemoryStore::new();
        let ds = NewDataset::new("sales", "Sales", "");
        sync_rows(&store, &ds, &[json!({"id": 1}), json!({"id": 2})], SyncMode::Incremental)
            .await
            .unwrap();
        let report = sync_rows(&store, &ds, &[json!({"id": 2, "x": true})], SyncMode::FullRefresh)
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.schema, ["id", "x"]);
        assert_eq!(store.count_rows("sales").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_backfill_hashes_legacy_rows() {
        let store = store_with("D1").await;
        let hashed = ingest_row(&store, "D1", &json!({"n": 0})).await.unwrap();
        let mut legacy = Vec::new();
        for n in 1..=5 {
            legacy.push(store.insert_row("D1", &json!({"n": n}), None).await.unwrap());
        }
        // Same content as the hashed row.
        let dup = store.insert_row("D1", &json!({"n": 0}), None).await.unwrap();

        let report = backfill_row_hashes(&store, 2).await.unwrap();
        assert_eq!(report.scanned, 6);
        assert_eq!(report.hashed, 5);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.batches, 3);

        for id in legacy {
            let row = store.get_row(id).await.unwrap().unwrap();
            assert_eq!(row.row_hash, Some(hash_value(&row.row_data)));
        }
        assert_eq!(store.get_row(dup).await.unwrap().unwrap().row_hash, None);
        let original = store.get_row(hashed).await.unwrap().unwrap();
        assert_eq!(original.row_hash, Some(hash_value(&json!({"n": 0}))));

        let rerun = backfill_row_hashes(&store, 2).await.unwrap();
        assert_eq!(rerun.hashed, 0);
        assert_eq!(rerun.conflicts, 1);
        assert!(backfill_row_hashes(&store, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_document_validates_before_writing() {
        let store = store_with("D1").await;
        let index = IvfIndex::new(3, IvfParams::default());

        let bad = NewDocument {
            embedding: vec![1.0, 0.0],
            ..NewDocument::default()
        };
        assert!(matches!(
            ingest_document(&store, &index, bad).await,
            Err(EngineError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        let nan = NewDocument {
            embedding: vec![1.0, f32::NAN, 0.0],
            ..NewDocument::default()
        };
        assert!(matches!(
            ingest_document(&store, &index, nan).await,
            Err(EngineError::InvalidArgument(_))
        ));
        let orphan = NewDocument {
            dataset_id: Some("missing".into()),
            embedding: vec![1.0, 0.0, 0.0],
            ..NewDocument::default()
        };
        assert!(matches!(
            ingest_document(&store, &index, orphan).await,
            Err(EngineError::ConstraintViolation(_))
        ));
        assert_eq!(store.count_documents().await.unwrap(), 0);

        let ok = NewDocument {
            dataset_id: Some("D1".into()),
            content: "hello".into(),
            embedding: vec![1.0, 0.0, 0.0],
            ..NewDocument::default()
        };
        let id = ingest_document(&store, &index, ok).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(store.get_document(&id).await.unwrap().unwrap().content, "hello");
    }

    #[tokio::test]
    async fn test_ingest_text_replaces_documents() {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(3, IvfParams::default());
        let ds = NewDataset::new("guide", "User Guide", "https://example.com/guide");
        let options = TextIngestOptions {
            chunk: ChunkParams { size: 4, overlap: 1 },
            embed_batch_size: 2,
        };

        let report = ingest_text(&store, &index, &CharCountEmbedder, &ds, "abcdefghij", options)
            .await
            .unwrap();
        assert_eq!(report.chunks, 4);
        assert_eq!(report.replaced, 0);

        let doc = store.get_document(&report.document_ids[1]).await.unwrap().unwrap();
        assert_eq!(doc.content, "defg");
        assert_eq!(doc.metadata["chunk_index"], json!(1));
        assert_eq!(doc.metadata["dataset_title"], json!("User Guide"));
        assert_eq!(doc.metadata["content_type"], json!("text"));

        let report = ingest_text(&store, &index, &CharCountEmbedder, &ds, "short", options)
            .await
            .unwrap();
        assert_eq!(report.replaced, 4);
        assert_eq!(store.count_documents().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ingest_text_failures_leave_store_untouched() {
        let store = InMemoryStore::new();
        let index = IvfIndex::new(3, IvfParams::default());
        let ds = NewDataset::new("guide", "Guide", "");

        let err = ingest_text(&store, &index, &CharCountEmbedder, &ds, "", TextIngestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: no chunks produced from content");

        let err = ingest_text(&store, &index, &BrokenEmbedder, &ds, "text", TextIngestOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider offline"));
        assert!(store.get_dataset("guide").await.unwrap().is_none());

        let wide = IvfIndex::new(8, IvfParams::default());
        let err = ingest_text(&store, &wide, &CharCountEmbedder, &ds, "text", TextIngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { expected: 8, actual: 3 }));
    }
}
