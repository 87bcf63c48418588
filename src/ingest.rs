//! Ingest commands.
//!
//! `rvault row add | sync | backfill` drive the dedup row pipeline and
//! `rvault doc add` stores one pre-embedded document. After a document
//! lands, the IVF index is rebuilt when `[index].auto_rebuild` is on and
//! the corpus has outgrown it.

use anyhow::{bail, Context, Result};
use ragvault_core::ingest::SyncMode;
use ragvault_core::models::{NewDataset, NewDocument};
use ragvault_core::Engine;
use serde_json::Value;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::input::{parse_embedding, parse_json_arg, parse_object_arg};
use crate::sqlite_store::SqliteStore;

pub async fn run_row_add(config: &Config, dataset: &str, row_json: &str) -> Result<()> {
    let row_data = parse_json_arg(row_json, "row")?;
    let engine = db::open_engine(config).await?;
    let outcome = engine.ingest_row_with_status(dataset, &row_data).await?;

    println!("row {}", outcome.id);
    if !outcome.created {
        println!("  duplicate: existing row returned");
    }
    Ok(())
}

pub async fn run_row_sync(
    config: &Config,
    dataset: &str,
    file: &Path,
    full_refresh: bool,
    title: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read rows file: {}", file.display()))?;
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Rows file is not valid JSON: {}", file.display()))?;
    let Value::Array(rows) = parsed else {
        bail!("rows file must contain a JSON array of objects");
    };

    let engine = db::open_engine(config).await?;
    let existing = engine.get_dataset(dataset).await?;
    let title = title
        .or_else(|| existing.as_ref().map(|d| d.title.clone()))
        .unwrap_or_else(|| dataset.to_string());
    let url = url
        .or_else(|| existing.as_ref().map(|d| d.url.clone()))
        .unwrap_or_default();

    let mode = if full_refresh {
        SyncMode::FullRefresh
    } else {
        SyncMode::Incremental
    };
    let report = engine
        .sync_rows(&NewDataset::new(dataset, title, url), &rows, mode)
        .await?;

    println!(
        "row sync {} ({})",
        report.dataset_id,
        if full_refresh { "full refresh" } else { "incremental" }
    );
    println!("  rows in file: {}", rows.len());
    println!("  inserted: {}", report.inserted);
    println!("  deleted: {}", report.deleted);
    println!("  unchanged: {}", report.unchanged);
    println!("  schema: {}", report.schema.join(", "));
    println!("ok");
    Ok(())
}

pub async fn run_row_backfill(config: &Config, batch_size: Option<usize>) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let batch_size = batch_size.unwrap_or(config.ingest.backfill_batch_size);
    let report = engine.backfill_row_hashes(batch_size).await?;

    println!("row backfill");
    println!("  scanned: {}", report.scanned);
    println!("  hashed: {}", report.hashed);
    println!("  conflicts: {}", report.conflicts);
    if report.skipped > 0 {
        println!("  skipped: {}", report.skipped);
    }
    println!("ok");
    Ok(())
}

pub async fn run_doc_add(
    config: &Config,
    content: &str,
    metadata: Option<&str>,
    embedding: &str,
    dataset: Option<String>,
) -> Result<()> {
    let doc = NewDocument {
        dataset_id: dataset,
        content: content.to_string(),
        metadata: parse_object_arg(metadata, "metadata")?,
        embedding: parse_embedding(embedding)?,
    };
    let engine = db::open_engine(config).await?;
    let id = engine.ingest_document(doc).await?;

    println!("document {}", id);
    maybe_rebuild(config, &engine).await;
    Ok(())
}

/// Rebuild the index if configured and warranted. Failures are reported
/// but never fail the ingest that triggered them.
async fn maybe_rebuild(config: &Config, engine: &Engine<SqliteStore>) {
    if !config.index.auto_rebuild {
        return;
    }
    match engine.rebuild_if_needed().await {
        Ok(Some(stats)) => println!(
            "  index rebuilt: generation {} ({} lists, {} documents)",
            stats.generation, stats.lists, stats.indexed
        ),
        Ok(None) => {}
        Err(e) => eprintln!("Warning: automatic index rebuild failed: {}", e),
    }
}

pub async fn run_doc_delete(config: &Config, id: &str) -> Result<()> {
    let engine = db::open_engine(config).await?;
    if !engine.delete_document(id).await? {
        bail!("document not found: {}", id);
    }
    println!("document delete {}", id);
    println!("ok");
    Ok(())
}
