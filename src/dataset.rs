//! Dataset lifecycle commands: `rvault dataset create | show | delete`.

use anyhow::{bail, Result};
use ragvault_core::models::{format_ts_iso, NewDataset};
use ragvault_core::store::Store;

use crate::config::Config;
use crate::db;

pub async fn run_create(config: &Config, id: &str, title: Option<String>, url: Option<String>) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let title = title.unwrap_or_else(|| id.to_string());
    let dataset = engine
        .create_dataset(&NewDataset::new(id, title, url.unwrap_or_default()))
        .await?;

    println!("dataset {}", dataset.id);
    println!("  title: {}", dataset.title);
    if !dataset.url.is_empty() {
        println!("  url: {}", dataset.url);
    }
    println!("ok");
    Ok(())
}

pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let Some(dataset) = engine.get_dataset(id).await? else {
        bail!("dataset not found: {}", id);
    };
    let rows = engine.store().count_rows(id).await?;

    println!("--- Dataset ---");
    println!("id:         {}", dataset.id);
    println!("title:      {}", dataset.title);
    println!("url:        {}", if dataset.url.is_empty() { "-" } else { dataset.url.as_str() });
    println!("created_at: {}", format_ts_iso(dataset.created_at));
    println!("rows:       {}", rows);
    if dataset.schema.is_empty() {
        println!("schema:     (none)");
    } else {
        println!("schema:     {}", dataset.schema.join(", "));
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let Some(deletion) = engine.delete_dataset(id).await? else {
        bail!("dataset not found: {}", id);
    };

    println!("dataset delete {}", id);
    println!("  rows deleted: {}", deletion.rows_deleted);
    println!("  documents deleted: {}", deletion.document_ids.len());
    println!("ok");
    Ok(())
}
