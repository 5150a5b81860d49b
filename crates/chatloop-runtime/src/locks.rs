//! Per-thread execution locks.
//!
//! At most one turn runs per thread. Acquisition never waits: a second turn on a
//! busy thread fails immediately with [`AgentError::Busy`]. Turns on different
//! threads never contend beyond the brief map update.

use chatloop_core::error::AgentError;
use chatloop_core::state::ThreadId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Where a running turn currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Reasoning,
    ToolDispatch,
    Finalizing,
}

#[derive(Debug)]
struct LockState {
    acquired_at: DateTime<Utc>,
    phase: TurnPhase,
    cancel: CancellationToken,
}

/// Snapshot of one held lock, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTurn {
    pub thread_id: ThreadId,
    pub phase: TurnPhase,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadLocks {
    inner: Arc<Mutex<HashMap<ThreadId, LockState>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<ThreadId, LockState>> {
        // The map is only mutated by single inserts/removes, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `thread_id`, or fail with [`AgentError::Busy`].
    ///
    /// `cancel` is the token of the turn that will hold the lock; [`ThreadLocks::cancel`]
    /// triggers it.
    pub fn try_acquire(
        &self,
        thread_id: &ThreadId,
        cancel: CancellationToken,
    ) -> Result<ThreadGuard, AgentError> {
        let mut map = self.map();
        if map.contains_key(thread_id) {
            tracing::debug!(thread_id = %thread_id, "thread is busy");
            return Err(AgentError::Busy(thread_id.clone()));
        }
        map.insert(
            thread_id.clone(),
            LockState {
                acquired_at: Utc::now(),
                phase: TurnPhase::Idle,
                cancel,
            },
        );
        Ok(ThreadGuard {
            locks: self.clone(),
            thread_id: thread_id.clone(),
        })
    }

    pub fn is_locked(&self, thread_id: &ThreadId) -> bool {
        self.map().contains_key(thread_id)
    }

    pub fn phase(&self, thread_id: &ThreadId) -> Option<TurnPhase> {
        self.map().get(thread_id).map(|state| state.phase)
    }

    /// Request cancellation of the turn running on `thread_id`. Returns false when idle.
    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        match self.map().get(thread_id) {
            Some(state) => {
                state.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Currently running turns, oldest first.
    pub fn active_turns(&self) -> Vec<ActiveTurn> {
        let mut turns: Vec<ActiveTurn> = self
            .map()
            .iter()
            .map(|(thread_id, state)| ActiveTurn {
                thread_id: thread_id.clone(),
                phase: state.phase,
                started_at: state.acquired_at,
            })
            .collect();
        turns.sort_by_key(|turn| turn.started_at);
        turns
    }
}

/// Exclusive hold on one thread. Released on drop, including when the turn panics or is aborted.
#[derive(Debug)]
pub struct ThreadGuard {
    locks: ThreadLocks,
    thread_id: ThreadId,
}

impl ThreadGuard {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn set_phase(&self, phase: TurnPhase) {
        if let Some(state) = self.locks.map().get_mut(&self.thread_id) {
            state.phase = phase;
        }
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.locks.map().remove(&self.thread_id);
        tracing::trace!(thread_id = %self.thread_id, "released thread lock");
    }
}
