//! SQLite-backed [`VectorIndex`].
//!
//! One WAL-mode database file holds every collection in a single `records`
//! table; each [`SqliteIndex`] is scoped to one collection name. Embeddings
//! are little-endian `f32` BLOBs and nearest-neighbour search is a
//! brute-force cosine scan in Rust.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::StoreError;
use crate::models::{RecordMetadata, ScoredRecord};

use super::{build_records, nearest, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
}

impl SqliteIndex {
    /// Open (creating if missing) the database at `db_path` and run
    /// migrations.
    pub async fn open(db_path: &Path, collection: &str) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let index = Self {
            pool,
            collection: collection.to_string(),
        };
        index.migrate().await?;
        Ok(index)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT NOT NULL,
                collection TEXT NOT NULL,
                source TEXT NOT NULL,
                chunk INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                ingested_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_source ON records(collection, source)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert_source(
        &self,
        source_key: &str,
        chunks: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, StoreError> {
        let records = build_records(source_key, chunks, embeddings)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM records WHERE collection = ? AND source = ?")
            .bind(&self.collection)
            .bind(source_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO records (id, collection, source, chunk, text, embedding, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&self.collection)
            .bind(&record.metadata.source)
            .bind(record.metadata.chunk as i64)
            .bind(&record.text)
            .bind(vec_to_blob(&record.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(records.len())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, source, chunk, text, embedding FROM records WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let chunk: i64 = row.get("chunk");
                ScoredRecord {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata: RecordMetadata {
                        source: row.get("source"),
                        chunk: chunk.max(0) as usize,
                    },
                    distance: Some(cosine_distance(embedding, &blob_to_vec(&blob))),
                }
            })
            .collect();

        Ok(nearest(hits, k))
    }

    async fn delete_source(&self, source_key: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND source = ?")
            .bind(&self.collection)
            .bind(source_key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM records WHERE collection = ? ORDER BY id")
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn sources(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source, COUNT(*) AS n
            FROM records
            WHERE collection = ?
            GROUP BY source
            ORDER BY source
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get("source"), n as usize)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp(dir: &tempfile::TempDir, collection: &str) -> SqliteIndex {
        SqliteIndex::open(&dir.path().join("nested/index.sqlite"), collection)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = open_temp(&dir, "knowledge").await;
            index
                .upsert_source("texts/a.txt", &["one".into(), "two".into()], &[vec![1.0, 0.0], vec![0.0, 1.0]])
                .await
                .unwrap();
            index.close().await;
        }
        let index = open_temp(&dir, "knowledge").await;
        assert_eq!(index.ids().await.unwrap(), vec!["texts/a.txt#0", "texts/a.txt#1"]);
        let hits = index.query(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].text, "two");
        assert_eq!(hits[0].metadata.chunk, 1);
        assert!(hits[0].distance.unwrap().abs() < 1e-6);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = open_temp(&dir, "a").await;
        let b = open_temp(&dir, "b").await;
        a.upsert_source("s", &["x".into()], &[vec![1.0]]).await.unwrap();
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reupsert_shrinks_record_set() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_temp(&dir, "knowledge").await;
        let three: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        index
            .upsert_source("s", &three, &[vec![1.0], vec![1.0], vec![1.0]])
            .await
            .unwrap();
        index
            .upsert_source("s", &three[..1], &[vec![1.0]])
            .await
            .unwrap();
        assert_eq!(index.ids().await.unwrap(), vec!["s#0"]);
        assert_eq!(index.sources().await.unwrap(), vec![("s".to_string(), 1)]);
        assert_eq!(index.delete_source("s").await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
