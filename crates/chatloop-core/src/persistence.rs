//! Persistence traits for checkpointing conversation state between turns.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StorageError;
use crate::state::{Checkpoint, CheckpointVersion, ConversationState, ThreadId};

/// Durable, versioned storage of conversation state keyed by thread.
///
/// Implementations must make `save` atomic: a concurrent or later `load` sees
/// either the previous checkpoint or the new one, never a partial write, and a
/// failed `save` leaves the previous checkpoint readable.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Load the latest checkpoint for a thread, or `None` for a new thread.
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError>;

    /// Append a new checkpoint and return its version.
    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
    ) -> Result<CheckpointVersion, StorageError>;

    /// Delete every checkpoint of a thread. Deleting an unknown thread is a no-op.
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), StorageError>;

    /// List all thread IDs that have at least one checkpoint.
    async fn list_threads(&self) -> Result<Vec<ThreadId>, StorageError>;
}

/// In-memory checkpointer for testing and development.
/// State is not persisted between process restarts.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    threads: std::sync::RwLock<HashMap<ThreadId, Vec<Checkpoint>>>,
    max_history: Option<usize>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the newest `versions` checkpoints per thread (at least one).
    pub fn with_max_history(mut self, versions: usize) -> Self {
        self.max_history = Some(versions.max(1));
        self
    }

    /// Every retained checkpoint of a thread, oldest first.
    pub fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, StorageError> {
        let threads = self.threads.read().map_err(|_| {
            anyhow::anyhow!("Failed to acquire read lock on in-memory checkpointer")
        })?;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError> {
        let threads = self.threads.read().map_err(|_| {
            anyhow::anyhow!("Failed to acquire read lock on in-memory checkpointer")
        })?;
        let latest = threads.get(thread_id).and_then(|h| h.last()).cloned();
        if let Some(checkpoint) = &latest {
            tracing::debug!(thread_id = %thread_id, version = %checkpoint.version, "Loaded checkpoint from memory");
        }
        Ok(latest)
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
    ) -> Result<CheckpointVersion, StorageError> {
        let mut threads = self.threads.write().map_err(|_| {
            anyhow::anyhow!("Failed to acquire write lock on in-memory checkpointer")
        })?;
        let history = threads.entry(thread_id.clone()).or_default();
        let version = history
            .last()
            .map(|c| c.version.next())
            .unwrap_or(CheckpointVersion::INITIAL);
        history.push(Checkpoint::new(thread_id.clone(), version, state.clone()));
        if let Some(max) = self.max_history {
            if history.len() > max {
                let excess = history.len() - max;
                history.drain(..excess);
            }
        }
        tracing::debug!(thread_id = %thread_id, version = %version, "Saved checkpoint to memory");
        Ok(version)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), StorageError> {
        let mut threads = self.threads.write().map_err(|_| {
            anyhow::anyhow!("Failed to acquire write lock on in-memory checkpointer")
        })?;
        threads.remove(thread_id);
        tracing::debug!(thread_id = %thread_id, "Deleted thread from memory");
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, StorageError> {
        let threads = self.threads.read().map_err(|_| {
            anyhow::anyhow!("Failed to acquire read lock on in-memory checkpointer")
        })?;
        Ok(threads.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Message;

    fn sample_state(text: &str) -> ConversationState {
        let mut state = ConversationState::new();
        state.append(Message::user(text));
        state.append(Message::assistant("ok"));
        state
    }

    #[tokio::test]
    async fn in_memory_checkpointer_save_and_load() {
        let checkpointer = InMemoryCheckpointer::new();
        let thread_id = "test-thread".to_string();
        let state = sample_state("hello");

        let version = checkpointer.save(&thread_id, &state).await.unwrap();
        assert_eq!(version, CheckpointVersion::INITIAL);

        let loaded = checkpointer.load(&thread_id).await.unwrap().unwrap();
        assert_eq!(loaded.version, version);
        assert_eq!(loaded.thread_id, thread_id);
        assert_eq!(loaded.state, state);
    }

    #[tokio::test]
    async fn in_memory_checkpointer_nonexistent_thread() {
        let checkpointer = InMemoryCheckpointer::new();
        let result = checkpointer.load(&"nonexistent".to_string()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn versions_increase_and_latest_wins() {
        let checkpointer = InMemoryCheckpointer::new();
        let thread_id = "t".to_string();
        let v1 = checkpointer.save(&thread_id, &sample_state("one")).await.unwrap();
        let v2 = checkpointer.save(&thread_id, &sample_state("two")).await.unwrap();
        assert!(v2 > v1);

        let loaded = checkpointer.load(&thread_id).await.unwrap().unwrap();
        assert_eq!(loaded.version, v2);
        assert_eq!(loaded.state.messages()[0].text(), Some("two"));
        assert_eq!(checkpointer.history(&thread_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn max_history_prunes_old_versions() {
        let checkpointer = InMemoryCheckpointer::new().with_max_history(1);
        let thread_id = "t".to_string();
        checkpointer.save(&thread_id, &sample_state("one")).await.unwrap();
        let v2 = checkpointer.save(&thread_id, &sample_state("two")).await.unwrap();

        let history = checkpointer.history(&thread_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, v2);
    }

    #[tokio::test]
    async fn in_memory_checkpointer_delete_and_list() {
        let checkpointer = InMemoryCheckpointer::new();
        let state = sample_state("x");
        checkpointer.save(&"thread1".to_string(), &state).await.unwrap();
        checkpointer.save(&"thread2".to_string(), &state).await.unwrap();

        let threads = checkpointer.list_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.contains(&"thread1".to_string()));

        checkpointer.delete_thread(&"thread1".to_string()).await.unwrap();
        assert!(checkpointer.load(&"thread1".to_string()).await.unwrap().is_none());
        assert_eq!(checkpointer.list_threads().await.unwrap(), vec!["thread2".to_string()]);
    }
}
