//! # Entry Repository
//!
//! Rows of the `offline_entries` table, one per `(collection, key)`.
//!
//! ## Row Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  collection │ key          │ path    │ value │ data │ sync_options │ .. │
//! │─────────────┼──────────────┼─────────┼───────┼──────┼──────────────┼────│
//! │  users      │ users/1      │ users/1 │ {..}  │ {..} │ none         │    │
//! │  users      │ users/1/name │ users/1 │ "Ada" │ {..} │ patch        │    │
//! │  users:eu   │ users/7      │ users/7 │ null  │ null │ pull         │    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tideline_core::{Entry, SyncOptions};

/// A raw `offline_entries` row.
#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    key: String,
    path: String,
    value: String,
    data: String,
    priority: i64,
    sync_options: String,
    is_partial: bool,
    revision: i64,
    timestamp: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self, collection: &str) -> DbResult<Entry> {
        let corrupt = |reason: String| DbError::corrupt(collection, &self.key, reason);

        let value = serde_json::from_str(&self.value).map_err(|e| corrupt(e.to_string()))?;
        let sync_options = self
            .sync_options
            .parse::<SyncOptions>()
            .map_err(|e| corrupt(e.to_string()))?;
        let priority = i32::try_from(self.priority).map_err(|e| corrupt(e.to_string()))?;
        let revision = u64::try_from(self.revision).map_err(|e| corrupt(e.to_string()))?;

        Ok(Entry {
            key: self.key,
            path: self.path,
            value,
            data: self.data,
            priority,
            sync_options,
            is_partial: self.is_partial,
            timestamp: self.timestamp,
            revision,
        })
    }
}

/// Repository for `offline_entries`.
#[derive(Debug, Clone)]
pub struct EntryRepository {
    pool: SqlitePool,
}

impl EntryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EntryRepository { pool }
    }

    /// Loads every entry of a collection, ordered by key.
    pub async fn load(&self, collection: &str) -> DbResult<Vec<Entry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT key, path, value, data, priority, sync_options,
                   is_partial, revision, timestamp
            FROM offline_entries
            WHERE collection = ?1
            ORDER BY key ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        debug!(collection = %collection, rows = rows.len(), "Loaded entries");

        rows.into_iter()
            .map(|row| row.into_entry(collection))
            .collect()
    }

    /// Inserts or replaces one entry.
    pub async fn upsert(&self, collection: &str, entry: &Entry) -> DbResult<()> {
        let revision = i64::try_from(entry.revision)
            .map_err(|e| DbError::corrupt(collection, &entry.key, e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO offline_entries (
                collection, key, path, value, data, priority,
                sync_options, is_partial, revision, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (collection, key) DO UPDATE SET
                path = excluded.path,
                value = excluded.value,
                data = excluded.data,
                priority = excluded.priority,
                sync_options = excluded.sync_options,
                is_partial = excluded.is_partial,
                revision = excluded.revision,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(collection)
        .bind(&entry.key)
        .bind(&entry.path)
        .bind(entry.value.to_string())
        .bind(&entry.data)
        .bind(i64::from(entry.priority))
        .bind(entry.sync_options.as_str())
        .bind(entry.is_partial)
        .bind(revision)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes one entry. Returns whether a row existed.
    pub async fn delete(&self, collection: &str, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM offline_entries WHERE collection = ?1 AND key = ?2")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts entries of a collection with a pending action.
    pub async fn count_pending(&self, collection: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offline_entries WHERE collection = ?1 AND sync_options != 'none'",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Deletes every entry of a collection.
    pub async fn clear(&self, collection: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM offline_entries WHERE collection = ?1")
            .bind(collection)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn repo() -> EntryRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().entries()
    }

    #[tokio::test]
    async fn test_upsert_and_load() {
        let repo = repo().await;

        let mut entry = Entry::partial(
            "users/1/name",
            "users/1",
            json!("Ada"),
            r#"{"name":"Ada"}"#,
            7,
            SyncOptions::Patch,
        );
        entry.revision = 3;
        repo.upsert("users", &entry).await.unwrap();

        let loaded = repo.load("users").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "users/1/name");
        assert_eq!(loaded[0].path, "users/1");
        assert_eq!(loaded[0].value, json!("Ada"));
        assert_eq!(loaded[0].priority, 7);
        assert_eq!(loaded[0].sync_options, SyncOptions::Patch);
        assert!(loaded[0].is_partial);
        assert_eq!(loaded[0].revision, 3);

        entry.sync_options = SyncOptions::None;
        entry.revision = 4;
        repo.upsert("users", &entry).await.unwrap();
        let loaded = repo.load("users").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sync_options, SyncOptions::None);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let repo = repo().await;
        let entry = Entry::new("1", json!({}), 1, SyncOptions::Put);

        repo.upsert("users", &entry).await.unwrap();
        repo.upsert("users:eu", &entry).await.unwrap();

        assert_eq!(repo.count_pending("users").await.unwrap(), 1);
        assert!(repo.delete("users", "1").await.unwrap());
        assert!(!repo.delete("users", "1").await.unwrap());
        assert_eq!(repo.load("users:eu").await.unwrap().len(), 1);

        assert_eq!(repo.clear("users:eu").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let repo = repo().await;
        sqlx::query(
            "INSERT INTO offline_entries (collection, key, path, value, timestamp)
             VALUES ('users', 'bad', 'bad', '{not json', '2024-01-01T00:00:00Z')",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        assert!(matches!(
            repo.load("users").await,
            Err(DbError::CorruptEntry { .. })
        ));
    }
}
