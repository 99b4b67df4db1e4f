use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{keywords, score, SessionSnapshot, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::generation::DocumentChunk;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Rows scanned per keyword search.
const SEARCH_WINDOW: i64 = 500;

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database (single pooled connection).
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        // An in-memory database lives as long as its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_tree(&self, snapshot: &SessionSnapshot) -> StorageResult<()> {
        let body = serde_json::to_string(snapshot).map_err(|e| StorageError::Snapshot {
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO tree_snapshots (session_id, problem_statement, snapshot, node_count, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                problem_statement = excluded.problem_statement,
                snapshot = excluded.snapshot,
                node_count = excluded.node_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&snapshot.session_id)
        .bind(&snapshot.problem_statement)
        .bind(&body)
        .bind(snapshot.tree.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            session_id = %snapshot.session_id,
            nodes = snapshot.tree.len(),
            "Saved session snapshot"
        );
        Ok(())
    }

    async fn load_tree(&self, session_id: &str) -> StorageResult<Option<SessionSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT snapshot
            FROM tree_snapshots
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            serde_json::from_str(&r.snapshot).map_err(|e| StorageError::Snapshot {
                message: format!("Corrupt snapshot for session {}: {}", session_id, e),
            })
        })
        .transpose()
    }

    async fn list_sessions(&self) -> StorageResult<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT session_id
            FROM tree_snapshots
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn add_learning(&self, content: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO learnings (id, content, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn search_learnings(&self, query: &str, limit: usize) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT content
            FROM learnings
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(SEARCH_WINDOW)
        .fetch_all(&self.pool)
        .await?;

        let words = keywords(query);
        let mut ranked: Vec<(usize, String)> = rows
            .into_iter()
            .map(|(content,)| (score(&content, &words), content))
            .filter(|(s, _)| *s > 0)
            .collect();
        // Stable sort keeps newest first among equal scores
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(ranked.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn add_document(
        &self,
        session_id: &str,
        filename: &str,
        content: &str,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, session_id, filename, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(filename)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(session_id = %session_id, filename = %filename, "Document added");
        Ok(())
    }

    async fn search_documents(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> StorageResult<Vec<DocumentChunk>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT filename, content
            FROM documents
            WHERE session_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(SEARCH_WINDOW)
        .fetch_all(&self.pool)
        .await?;

        let words = keywords(query);
        let mut ranked: Vec<(usize, DocumentChunk)> = rows
            .into_iter()
            .map(|r| {
                let s = score(&r.content, &words) + score(&r.filename, &words);
                (s, r.into())
            })
            .filter(|(s, _)| *s > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(ranked.into_iter().take(limit).map(|(_, c)| c).collect())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SnapshotRow {
    snapshot: String,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    filename: String,
    content: String,
}

impl From<DocumentRow> for DocumentChunk {
    fn from(row: DocumentRow) -> Self {
        Self {
            filename: row.filename,
            content: row.content,
        }
    }
}
