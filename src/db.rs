use anyhow::{Context, Result};
use ragvault_core::Engine;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Connect and open an engine over the database, restoring the IVF index.
pub async fn open_engine(config: &Config) -> Result<Engine<SqliteStore>> {
    let pool = connect(config).await?;
    let engine = Engine::open(SqliteStore::new(pool), config.engine_config())
        .await
        .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
    tracing::debug!(
        path = %config.db.path.display(),
        generation = engine.index_stats().generation,
        "engine ready"
    );
    Ok(engine)
}
