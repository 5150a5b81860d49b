//! SQLite-backed checkpointer.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS checkpoints (
//!     thread_id TEXT NOT NULL,
//!     version INTEGER NOT NULL,
//!     state TEXT NOT NULL,
//!     created_at TEXT NOT NULL,
//!     PRIMARY KEY (thread_id, version)
//! );
//! ```
//!
//! Each save inserts one row whose version is computed inside the same
//! statement, so a committed row is always complete and versions never repeat.

use anyhow::Context;
use async_trait::async_trait;
use chatloop_core::error::StorageError;
use chatloop_core::persistence::Checkpointer;
use chatloop_core::state::{Checkpoint, CheckpointVersion, ConversationState, ThreadId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_TABLE: &str = "checkpoints";

/// SQLite-backed checkpointer with connection pooling.
///
/// ```rust,no_run
/// use chatloop_persistence::SqliteCheckpointer;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let checkpointer = SqliteCheckpointer::builder()
///         .url("sqlite://chatbot.db")
///         .table_name("chat_checkpoints")
///         .max_history(50)
///         .build()
///         .await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SqliteCheckpointer {
    pool: SqlitePool,
    table_name: String,
    max_history: Option<usize>,
}

impl SqliteCheckpointer {
    /// Open (creating if missing) a database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::builder().path(path).build().await
    }

    /// Private in-memory database; contents vanish with the checkpointer.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::builder().url("sqlite::memory:").build().await
    }

    pub fn builder() -> SqliteCheckpointerBuilder {
        SqliteCheckpointerBuilder::default()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_table(&self) -> anyhow::Result<()> {
        let create_table_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                thread_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, version)
            )
            "#,
            self.table_name
        );

        sqlx::query(&create_table_sql)
            .execute(&self.pool)
            .await
            .context("Failed to create checkpoints table")?;

        Ok(())
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError> {
        let query = format!(
            r#"
            SELECT version, state, created_at FROM {}
            WHERE thread_id = ?1
            ORDER BY version DESC
            LIMIT 1
            "#,
            self.table_name
        );

        let row: Option<(i64, String, DateTime<Utc>)> = sqlx::query_as(&query)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load checkpoint from SQLite")?;

        let Some((version, state, created_at)) = row else {
            tracing::debug!(thread_id = %thread_id, "No checkpoint found in SQLite");
            return Ok(None);
        };

        let state: ConversationState = serde_json::from_str(&state)
            .map_err(|e| StorageError::corrupt(thread_id.clone(), e))?;
        let version = u64::try_from(version)
            .map(CheckpointVersion)
            .map_err(|_| StorageError::corrupt(thread_id.clone(), format!("negative version {version}")))?;

        tracing::debug!(thread_id = %thread_id, version = %version, "Loaded checkpoint from SQLite");
        Ok(Some(Checkpoint {
            thread_id: thread_id.clone(),
            version,
            created_at,
            state,
        }))
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
    ) -> Result<CheckpointVersion, StorageError> {
        let json = serde_json::to_string(state).context("Failed to serialize state to JSON")?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin SQLite transaction")?;

        let insert = format!(
            r#"
            INSERT INTO {table} (thread_id, version, state, created_at)
            SELECT ?1, COALESCE(MAX(version), 0) + 1, ?2, ?3
            FROM {table} WHERE thread_id = ?1
            RETURNING version
            "#,
            table = self.table_name
        );
        let version: i64 = sqlx::query(&insert)
            .bind(thread_id)
            .bind(&json)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .context("Failed to save checkpoint to SQLite")?
            .try_get("version")
            .context("Failed to read saved checkpoint version")?;

        if let Some(max) = self.max_history {
            let prune = format!(
                "DELETE FROM {} WHERE thread_id = ?1 AND version <= ?2",
                self.table_name
            );
            sqlx::query(&prune)
                .bind(thread_id)
                .bind(version - max as i64)
                .execute(&mut *tx)
                .await
                .context("Failed to prune old checkpoints")?;
        }

        tx.commit()
            .await
            .context("Failed to commit SQLite transaction")?;

        let version = CheckpointVersion(version as u64);
        tracing::debug!(
            thread_id = %thread_id,
            version = %version,
            table = %self.table_name,
            "Saved checkpoint to SQLite"
        );
        Ok(version)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), StorageError> {
        let query = format!("DELETE FROM {} WHERE thread_id = ?1", self.table_name);

        sqlx::query(&query)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete thread from SQLite")?;

        tracing::debug!(thread_id = %thread_id, "Deleted thread from SQLite");
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, StorageError> {
        let query = format!(
            "SELECT thread_id FROM {} GROUP BY thread_id ORDER BY MAX(created_at) DESC",
            self.table_name
        );

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list threads from SQLite")?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("thread_id")
                    .context("Failed to read thread id")
                    .map_err(StorageError::from)
            })
            .collect()
    }
}

/// Builder for configuring a SQLite checkpointer.
#[derive(Default)]
pub struct SqliteCheckpointerBuilder {
    url: Option<String>,
    table_name: Option<String>,
    max_connections: Option<u32>,
    max_history: Option<usize>,
}

impl SqliteCheckpointerBuilder {
    /// Connection URL such as `sqlite://chatbot.db` or `sqlite::memory:`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn path(self, path: impl AsRef<Path>) -> Self {
        let url = format!("sqlite://{}", path.as_ref().display());
        self.url(url)
    }

    /// Set the table name (default: "checkpoints").
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Set the maximum number of pooled connections (default: 5).
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Keep only the newest `versions` checkpoints per thread (at least one).
    pub fn max_history(mut self, versions: usize) -> Self {
        self.max_history = Some(versions.max(1));
        self
    }

    /// Connect, creating the database file and table when missing.
    pub async fn build(self) -> anyhow::Result<SqliteCheckpointer> {
        let url = self
            .url
            .ok_or_else(|| anyhow::anyhow!("SQLite URL is required"))?;
        let table_name = self
            .table_name
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        crate::validate_table_name(&table_name)?;

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid SQLite URL: {url}"))?
            .create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so keep exactly one alive.
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(self.max_connections.unwrap_or(5));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        let checkpointer = SqliteCheckpointer {
            pool,
            table_name,
            max_history: self.max_history,
        };

        checkpointer
            .ensure_table()
            .await
            .context("Failed to initialize database schema")?;

        Ok(checkpointer)
    }
}
