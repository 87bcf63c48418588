//! Database statistics and health overview.
//!
//! Provides a quick summary of what's stored: datasets, rows (and how many
//! still lack a content hash), documents, and index coverage. Used by
//! `rvault stats`.

use anyhow::Result;
use ragvault_core::store::Store;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-dataset breakdown of row and document counts.
struct DatasetStats {
    id: String,
    rows: i64,
    documents: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let engine = db::open_engine(config).await?;
    let store = engine.store();

    let datasets = store.count_datasets().await?;
    let (rows, unhashed) = store.count_all_rows().await?;
    let documents = store.count_documents().await?;
    let index = engine.index_stats();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("RagVault — Database Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Datasets:    {}", datasets);
    println!("  Rows:        {} ({} unhashed)", rows, unhashed);
    println!("  Documents:   {}", documents);
    println!(
        "  Indexed:     {} / {} ({}%)",
        index.indexed,
        documents,
        if documents > 0 {
            (index.indexed as u64 * 100) / documents
        } else {
            0
        }
    );

    let dataset_rows = sqlx::query(
        r#"
        SELECT
            d.id,
            (SELECT COUNT(*) FROM dataset_rows r WHERE r.dataset_id = d.id) AS row_count,
            (SELECT COUNT(*) FROM documents doc WHERE doc.dataset_id = d.id) AS doc_count
        FROM datasets d
        ORDER BY row_count + doc_count DESC, d.id ASC
        "#,
    )
    .fetch_all(store.pool())
    .await?;

    let per_dataset: Vec<DatasetStats> = dataset_rows
        .iter()
        .map(|row| DatasetStats {
            id: row.get("id"),
            rows: row.get("row_count"),
            documents: row.get("doc_count"),
        })
        .collect();

    if !per_dataset.is_empty() {
        println!();
        println!("  By dataset:");
        println!("  {:<32} {:>8} {:>10}", "DATASET", "ROWS", "DOCUMENTS");
        println!("  {}", "-".repeat(52));
        for s in &per_dataset {
            println!("  {:<32} {:>8} {:>10}", s.id, s.rows, s.documents);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
