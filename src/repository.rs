use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::types::{Post, ProcessedPost, StoreError};

/// Persistence contract for the dedup state. Keyed by content hash; records
/// are created once and mutated in place afterwards, never re-created.
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn exists(&self, content_hash: &str) -> Result<bool, StoreError>;

    /// Inserts a new record for a hash never seen before. The UNIQUE
    /// constraint backstops the caller's `exists` check; a collision comes
    /// back as [`StoreError::DuplicateHash`].
    async fn create(&self, post: &Post, content_hash: &str) -> Result<i64, StoreError>;

    async fn mark_published(
        &self,
        content_hash: &str,
        target_message_id: i64,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&self, content_hash: &str, error: &str) -> Result<(), StoreError>;

    /// Records that were created but neither published nor failed, oldest
    /// first. Covers crash recovery and operator inspection.
    async fn list_unpublished(&self, limit: i64) -> Result<Vec<ProcessedPost>, StoreError>;

    async fn find(&self, content_hash: &str) -> Result<Option<ProcessedPost>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

pub struct SqlitePostRepository {
    pool: SqlitePool,
}

impl SqlitePostRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // one writer is all the sequential cycle needs, and it keeps
        // in-memory databases visible to every caller
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                source_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                published INTEGER NOT NULL DEFAULT 0,
                published_at TEXT,
                target_message_id INTEGER,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_processed_posts_origin
            ON processed_posts (platform, source_id, post_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_processed_posts_published
            ON processed_posts (published)
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Schema ready");
        Ok(())
    }
}

#[async_trait]
impl PostRepository for SqlitePostRepository {
    async fn exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM processed_posts WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn create(&self, post: &Post, content_hash: &str) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_posts
                (platform, source_id, post_id, content_hash, url, created_at, processed_at, published)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING id
            "#,
        )
        .bind(post.platform.as_str())
        .bind(&post.source_id)
        .bind(&post.post_id)
        .bind(content_hash)
        .bind(&post.url)
        .bind(post.created_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.get("id")),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateHash(content_hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_published(
        &self,
        content_hash: &str,
        target_message_id: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE processed_posts
            SET published = 1, published_at = ?, target_message_id = ?, error_message = NULL
            WHERE content_hash = ?
            "#,
        )
        .bind(Utc::now())
        .bind(target_message_id)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("mark_published found no record for hash {}", content_hash);
        }
        Ok(())
    }

    async fn mark_failed(&self, content_hash: &str, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE processed_posts SET error_message = ? WHERE content_hash = ?",
        )
        .bind(error)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("mark_failed found no record for hash {}", content_hash);
        }
        Ok(())
    }

    async fn list_unpublished(&self, limit: i64) -> Result<Vec<ProcessedPost>, StoreError> {
        let posts = sqlx::query_as::<_, ProcessedPost>(
            r#"
            SELECT id, platform, source_id, post_id, content_hash, url,
                   created_at, processed_at, published, published_at,
                   target_message_id, error_message
            FROM processed_posts
            WHERE published = 0 AND error_message IS NULL
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    async fn find(&self, content_hash: &str) -> Result<Option<ProcessedPost>, StoreError> {
        let post = sqlx::query_as::<_, ProcessedPost>(
            r#"
            SELECT id, platform, source_id, post_id, content_hash, url,
                   created_at, processed_at, published, published_at,
                   target_message_id, error_message
            FROM processed_posts
            WHERE content_hash = ?
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(post)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
