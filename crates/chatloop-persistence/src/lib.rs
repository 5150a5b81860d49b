//! Durable checkpointer implementations for conversation threads.
//!
//! Every backend keeps an append-only history of versioned checkpoints per
//! thread and serves the latest one on load.
//!
//! ## Available Backends
//!
//! - **File**: one JSON file per checkpoint, written atomically (always available)
//! - **SQLite**: single-file embedded database (default)
//! - **PostgreSQL**: shared relational database with ACID guarantees
//!
//! ## Feature Flags
//!
//! - `sqlite`: Enable the SQLite checkpointer (default)
//! - `postgres`: Enable the PostgreSQL checkpointer
//! - `all`: Enable all backends
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatloop_persistence::SqliteCheckpointer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let checkpointer = SqliteCheckpointer::open("chatbot.db").await?;
//!     // Hand it to ConfigurableAgentBuilder::with_checkpointer
//!     Ok(())
//! }
//! ```

pub mod file_checkpointer;

#[cfg(feature = "sqlite")]
pub mod sqlite_checkpointer;

#[cfg(feature = "postgres")]
pub mod postgres_checkpointer;

pub use file_checkpointer::FileCheckpointer;

#[cfg(feature = "sqlite")]
pub use sqlite_checkpointer::SqliteCheckpointer;

#[cfg(feature = "postgres")]
pub use postgres_checkpointer::PostgresCheckpointer;

// Re-export core types for convenience
pub use chatloop_core::persistence::{Checkpointer, InMemoryCheckpointer};
pub use chatloop_core::state::{Checkpoint, CheckpointVersion, ConversationState, ThreadId};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn validate_table_name(table_name: &str) -> anyhow::Result<()> {
    let valid = !table_name.is_empty()
        && !table_name.starts_with(|c: char| c.is_ascii_digit())
        && table_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        anyhow::bail!("invalid table name: {table_name:?}");
    }
    Ok(())
}
