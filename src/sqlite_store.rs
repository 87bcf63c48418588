//! SQLite-backed [`Store`] implementation.
//!
//! Rows, documents and centroids live in the tables created by
//! [`crate::migrate`]. A document's IVF placement is kept in its own row
//! (`ivf_generation`, `ivf_list`), so a reopened index needs no embedding
//! scan. Embeddings are stored as little-endian `f32` BLOBs
//! (see [`vec_to_blob`]). The `(dataset_id, row_hash)` uniqueness
//! constraint is enforced by SQLite itself, and constraint failures are
//! translated into the engine's error taxonomy:
//!
//! | SQLite failure | Engine error |
//! |----------------|--------------|
//! | `UNIQUE` on `dataset_rows` | [`EngineError::DuplicateContent`] |
//! | `FOREIGN KEY` | [`EngineError::ConstraintViolation`] |
//! | anything else | [`EngineError::Storage`] |

use async_trait::async_trait;
use ragvault_core::embedding::{blob_to_vec, vec_to_blob};
use ragvault_core::models::{
    Dataset, DatasetDeletion, Document, Metadata, NewDataset, Row as DataRow, RowId,
};
use ragvault_core::store::Store;
use ragvault_core::{EngineError, Result};
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_IN_PARAMS: usize = 500;

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.into())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_fk_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| EngineError::Serialization(format!("corrupt {what} column: {e}")))
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

const DATASET_COLUMNS: &str = "id, title, url, created_at, schema_json";
const ROW_COLUMNS: &str = "id, dataset_id, row_data, row_hash, created_at";
const DOCUMENT_COLUMNS: &str = "id, dataset_id, content, metadata_json, embedding, created_at";

fn dataset_from_row(row: &SqliteRow) -> Result<Dataset> {
    let schema_json: String = row.get("schema_json");
    Ok(Dataset {
        id: row.get("id"),
        title: row.get("title"),
        url: row.get("url"),
        created_at: row.get("created_at"),
        schema: parse_json(&schema_json, "schema_json")?,
    })
}

fn data_row_from_row(row: &SqliteRow) -> Result<DataRow> {
    let row_data: String = row.get("row_data");
    Ok(DataRow {
        id: row.get("id"),
        dataset_id: row.get("dataset_id"),
        row_data: parse_json(&row_data, "row_data")?,
        row_hash: row.get("row_hash"),
        created_at: row.get("created_at"),
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let metadata_json: String = row.get("metadata_json");
    let blob: Vec<u8> = row.get("embedding");
    let metadata: Metadata = parse_json(&metadata_json, "metadata_json")?;
    Ok(Document {
        id: row.get("id"),
        dataset_id: row.get("dataset_id"),
        content: row.get("content"),
        metadata,
        embedding: blob_to_vec(&blob),
        created_at: row.get("created_at"),
    })
}

/// [`Store`] over a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count_datasets(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM datasets")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as u64)
    }

    pub async fn count_all_rows(&self) -> Result<(u64, u64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(*) - COUNT(row_hash) AS unhashed FROM dataset_rows",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let total: i64 = row.get("total");
        let unhashed: i64 = row.get("unhashed");
        Ok((total as u64, unhashed as u64))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_dataset(&self, dataset: &NewDataset) -> Result<Dataset> {
        sqlx::query(
            r#"
            INSERT INTO datasets (id, title, url, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url
            "#,
        )
        .bind(&dataset.id)
        .bind(&dataset.title)
        .bind(&dataset.url)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_dataset(&dataset.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("dataset '{}'", dataset.id)))
    }

    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(dataset_from_row).transpose()
    }

    async fn set_dataset_schema(&self, id: &str, schema: &[String]) -> Result<()> {
        let schema_json =
            serde_json::to_string(schema).map_err(|e| EngineError::Serialization(e.to_string()))?;
        let result = sqlx::query("UPDATE datasets SET schema_json = ? WHERE id = ?")
            .bind(schema_json)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("dataset '{id}'")));
        }
        Ok(())
    }

    async fn delete_dataset(&self, id: &str) -> Result<Option<DatasetDeletion>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM datasets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Ok(None);
        }

        let document_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE dataset_id = ? ORDER BY id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?;

        sqlx::query("DELETE FROM documents WHERE dataset_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let rows_deleted = sqlx::query("DELETE FROM dataset_rows WHERE dataset_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(DatasetDeletion {
            rows_deleted,
            document_ids,
        }))
    }

    async fn insert_row(
        &self,
        dataset_id: &str,
        row_data: &Value,
        row_hash: Option<&str>,
    ) -> Result<RowId> {
        let data = serde_json::to_string(row_data)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let result = sqlx::query(
            "INSERT INTO dataset_rows (dataset_id, row_data, row_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(dataset_id)
        .bind(data)
        .bind(row_hash)
        .bind(now_ts())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(EngineError::DuplicateContent {
                dataset_id: dataset_id.to_string(),
                row_hash: row_hash.unwrap_or_default().to_string(),
            }),
            Err(e) if is_fk_violation(&e) => Err(EngineError::ConstraintViolation(format!(
                "dataset '{dataset_id}' does not exist"
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find_row_by_hash(&self, dataset_id: &str, row_hash: &str) -> Result<Option<RowId>> {
        sqlx::query_scalar("SELECT id FROM dataset_rows WHERE dataset_id = ? AND row_hash = ?")
            .bind(dataset_id)
            .bind(row_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn get_row(&self, id: RowId) -> Result<Option<DataRow>> {
        let row = sqlx::query(&format!("SELECT {ROW_COLUMNS} FROM dataset_rows WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(data_row_from_row).transpose()
    }

    async fn list_rows(&self, dataset_id: &str) -> Result<Vec<DataRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM dataset_rows WHERE dataset_id = ? ORDER BY id"
        ))
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(data_row_from_row).collect()
    }

    async fn count_rows(&self, dataset_id: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dataset_rows WHERE dataset_id = ?")
            .bind(dataset_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as u64)
    }

    async fn delete_rows_by_hash(&self, dataset_id: &str, hashes: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut deleted = 0;
        for batch in hashes.chunks(MAX_IN_PARAMS) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM dataset_rows WHERE dataset_id = ");
            qb.push_bind(dataset_id);
            qb.push(" AND row_hash IN (");
            let mut sep = qb.separated(", ");
            for hash in batch {
                sep.push_bind(hash);
            }
            sep.push_unseparated(")");
            deleted += qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?
                .rows_affected();
        }
        tx.commit().await.map_err(db_err)?;
        Ok(deleted)
    }

    async fn delete_all_rows(&self, dataset_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dataset_rows WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn rows_missing_hash(&self, after: RowId, limit: usize) -> Result<Vec<DataRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM dataset_rows WHERE row_hash IS NULL AND id > ? ORDER BY id LIMIT ?"
        ))
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(data_row_from_row).collect()
    }

    async fn set_row_hash(&self, id: RowId, row_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dataset_rows SET row_hash = ? WHERE id = ? AND row_hash IS NULL",
        )
        .bind(row_hash)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(true),
            Ok(_) => match self.get_row(id).await? {
                Some(_) => Ok(false),
                None => Err(EngineError::NotFound(format!("row {id}"))),
            },
            Err(e) if is_unique_violation(&e) => {
                let dataset_id: String =
                    sqlx::query_scalar("SELECT dataset_id FROM dataset_rows WHERE id = ?")
                        .bind(id)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(db_err)?;
                Err(EngineError::DuplicateContent {
                    dataset_id,
                    row_hash: row_hash.to_string(),
                })
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn put_document(&self, doc: &Document) -> Result<()> {
        let metadata_json = serde_json::to_string(&doc.metadata)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, dataset_id, content, metadata_json, embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.dataset_id)
        .bind(&doc.content)
        .bind(metadata_json)
        .bind(vec_to_blob(&doc.embedding))
        .bind(doc.embedding.len() as i64)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_fk_violation(&e) => Err(EngineError::ConstraintViolation(format!(
                "dataset '{}' does not exist",
                doc.dataset_id.as_deref().unwrap_or_default()
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        let mut out = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_IN_PARAMS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id IN ("
            ));
            let mut sep = qb.separated(", ");
            for id in batch {
                sep.push_bind(id);
            }
            sep.push_unseparated(")");
            let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
            for row in &rows {
                out.push(document_from_row(row)?);
            }
        }
        Ok(out)
    }

    async fn scan_documents(&self, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id > ? ORDER BY id LIMIT ?"
        ))
        .bind(after.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(document_from_row).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_documents_by_dataset(&self, dataset_id: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE dataset_id = ? ORDER BY id")
                .bind(dataset_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?;
        sqlx::query("DELETE FROM documents WHERE dataset_id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(ids)
    }

    async fn count_documents(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as u64)
    }

    async fn scan_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query("SELECT id, embedding FROM documents ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("id"), blob_to_vec(&blob))
            })
            .collect())
    }

    async fn embedding_dims(&self) -> Result<Vec<usize>> {
        let dims: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT dims FROM documents ORDER BY dims")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(dims.into_iter().map(|d| d as usize).collect())
    }

    async fn save_list_members(&self, generation: u64, members: &[(String, usize)]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (id, list_no) in members {
            sqlx::query("UPDATE documents SET ivf_generation = ?, ivf_list = ? WHERE id = ?")
                .bind(generation as i64)
                .bind(*list_no as i64)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn load_list_members(&self, generation: u64) -> Result<Vec<(String, usize)>> {
        let rows = sqlx::query(
            "SELECT id, ivf_list FROM documents WHERE ivf_generation = ? AND ivf_list IS NOT NULL",
        )
        .bind(generation as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| {
                let list_no: i64 = row.get("ivf_list");
                (row.get("id"), list_no as usize)
            })
            .collect())
    }

    async fn unplaced_embeddings(&self, generation: u64) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, embedding FROM documents
            WHERE ivf_generation IS NULL OR ivf_generation != ? OR ivf_list IS NULL
            ORDER BY id
            "#,
        )
        .bind(generation as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("id"), blob_to_vec(&blob))
            })
            .collect())
    }

    async fn save_centroids(&self, generation: u64, centroids: &[Vec<f32>]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM ivf_centroids")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for (list_no, centroid) in centroids.iter().enumerate() {
            sqlx::query("INSERT INTO ivf_centroids (generation, list_no, centroid) VALUES (?, ?, ?)")
                .bind(generation as i64)
                .bind(list_no as i64)
                .bind(vec_to_blob(centroid))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn load_centroids(&self) -> Result<Option<(u64, Vec<Vec<f32>>)>> {
        let rows = sqlx::query(
            r#"
            SELECT generation, centroid FROM ivf_centroids
            WHERE generation = (SELECT MAX(generation) FROM ivf_centroids)
            ORDER BY list_no
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let generation: i64 = first.get("generation");
        let centroids = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("centroid");
                blob_to_vec(&blob)
            })
            .collect();
        Ok(Some((generation as u64, centroids)))
    }
}
