//! Record store: which wall posts have already been handled
//!
//! One row per publish attempt, keyed in practice by the post text. Rows are
//! only ever inserted.

use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::PostRecord;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first start
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        // A single connection, otherwise every pooled connection gets its own empty database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Whether any record carries exactly this text
    pub async fn post_exists(&self, post_text: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT id FROM posts WHERE post_text = ? LIMIT 1
            "#,
        )
        .bind(post_text)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.is_some())
    }

    /// Append a record of a publish attempt, returning its id
    pub async fn save_post(&self, post_text: &str, published: bool) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (post_text, published_in_telegram) VALUES (?, ?)
            "#,
        )
        .bind(post_text)
        .bind(published)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent records first
    pub async fn get_records(&self, limit: usize) -> Result<Vec<PostRecord>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT id, post_text, published_in_telegram
            FROM posts
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| PostRecord {
                id: r.get("id"),
                post_text: r.get::<Option<String>, _>("post_text").unwrap_or_default(),
                published_in_telegram: r
                    .get::<Option<bool>, _>("published_in_telegram")
                    .unwrap_or(false),
            })
            .collect())
    }

    pub async fn count_records(&self) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    /// Close the pool; later operations fail with a database error
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
