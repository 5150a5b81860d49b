//! Consumer side of a running turn.

use chatloop_core::error::AgentError;
use chatloop_core::events::StreamEvent;
use chatloop_core::state::{CheckpointVersion, ThreadId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The answer was produced and checkpointed as `version`.
    Completed {
        answer: String,
        version: CheckpointVersion,
    },
    /// Cancelled before its checkpoint was written; the thread is unchanged.
    Aborted,
    /// Failed without writing a checkpoint.
    Failed(AgentError),
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            TurnOutcome::Completed { answer, .. } => Some(answer),
            _ => None,
        }
    }
}

/// Handle to one in-flight turn: its ordered event stream, a cancel switch
/// and the final outcome.
///
/// Dropping the session (or the stream from [`StreamingSession::into_stream`])
/// before the turn finishes cancels it.
pub struct StreamingSession {
    thread_id: ThreadId,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<TurnOutcome>,
}

impl StreamingSession {
    pub(crate) fn new(
        thread_id: ThreadId,
        events: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
        task: JoinHandle<TurnOutcome>,
    ) -> Self {
        Self {
            thread_id,
            events,
            cancel,
            task,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Request cancellation. The turn stops at its next step boundary and
    /// persists nothing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this turn, usable after the session is consumed.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Hand the events to a stream consumer. The turn keeps running in the
    /// background; its outcome is only observable through the events.
    pub fn into_stream(self) -> ReceiverStream<StreamEvent> {
        ReceiverStream::new(self.events)
    }

    /// Wait for the turn to end, discarding its remaining events.
    pub async fn outcome(self) -> TurnOutcome {
        self.collect().await.1
    }

    /// Drain every event, then return them with the outcome.
    pub async fn collect(mut self) -> (Vec<StreamEvent>, TurnOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, join_outcome(self.task).await)
    }
}

async fn join_outcome(task: JoinHandle<TurnOutcome>) -> TurnOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, "turn task did not complete");
            TurnOutcome::Failed(AgentError::Reasoning(anyhow::anyhow!(
                "turn task did not complete: {err}"
            )))
        }
    }
}
