use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            schema_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // NULL row_hash marks rows imported before hashing; SQLite lets any
    // number of them coexist under the UNIQUE constraint.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset_rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id TEXT NOT NULL,
            row_data TEXT NOT NULL,
            row_hash TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(dataset_id, row_hash),
            FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            dataset_id TEXT,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            ivf_generation INTEGER,
            ivf_list INTEGER,
            FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before list placements were persisted.
    for column in ["ivf_generation", "ivf_list"] {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name = ?",
        )
        .bind(column)
        .fetch_one(pool)
        .await?;
        if present == 0 {
            sqlx::query(&format!("ALTER TABLE documents ADD COLUMN {column} INTEGER"))
                .execute(pool)
                .await?;
        }
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ivf_centroids (
            generation INTEGER NOT NULL,
            list_no INTEGER NOT NULL,
            centroid BLOB NOT NULL,
            PRIMARY KEY (generation, list_no)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_dataset_id ON documents(dataset_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_ivf ON documents(ivf_generation, ivf_list)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dataset_rows_missing_hash ON dataset_rows(id) WHERE row_hash IS NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}
