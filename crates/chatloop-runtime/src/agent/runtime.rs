//! Chat agent runtime
//!
//! This module contains the [`ChatAgent`] and the turn state machine it runs:
//! reasoning, concurrent tool dispatch, finalization and checkpointing, with
//! every observable step streamed to the caller's [`StreamingSession`].

use std::sync::Arc;

use chatloop_core::error::AgentError;
use chatloop_core::events::StreamEvent;
use chatloop_core::llm::{LanguageModel, LlmRequest, ModelDecision, StreamChunk};
use chatloop_core::messaging::{Message, ToolCall, ToolOutcome};
use chatloop_core::persistence::Checkpointer;
use chatloop_core::state::{CheckpointVersion, ConversationState, ThreadId};
use chatloop_core::tools::{ToolRegistry, ToolSchema};
use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::config::{AgentConfig, ROUND_LIMIT_ANSWER};
use crate::locks::{ActiveTurn, ThreadGuard, ThreadLocks, TurnPhase};
use crate::session::{StreamingSession, TurnOutcome};

/// A thread as listed to users.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub name: String,
}

/// Tool-using conversational agent. Cheap to clone; clones share the model,
/// tools, store and lock table.
#[derive(Clone)]
pub struct ChatAgent {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    checkpointer: Arc<dyn Checkpointer>,
    locks: ThreadLocks,
    config: Arc<AgentConfig>,
}

impl ChatAgent {
    pub(crate) fn new(
        model: Arc<dyn LanguageModel>,
        tools: ToolRegistry,
        checkpointer: Arc<dyn Checkpointer>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            tools: Arc::new(tools),
            checkpointer,
            locks: ThreadLocks::new(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn locks(&self) -> &ThreadLocks {
        &self.locks
    }

    pub fn active_turns(&self) -> Vec<ActiveTurn> {
        self.locks.active_turns()
    }

    /// Start a turn on `thread_id` and return its event session.
    ///
    /// The thread lock is taken before this returns, so a concurrent turn on the
    /// same thread fails here with [`AgentError::Busy`] and no events are produced.
    /// Must be called from within a tokio runtime.
    pub fn start_turn(
        &self,
        thread_id: impl Into<ThreadId>,
        message: impl Into<String>,
    ) -> Result<StreamingSession, AgentError> {
        let thread_id = thread_id.into();
        let cancel = CancellationToken::new();
        let guard = self.locks.try_acquire(&thread_id, cancel.clone())?;
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));

        let turn = Turn {
            agent: self.clone(),
            events: tx,
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("turn", thread_id = %thread_id);
        let task = tokio::spawn(turn.drive(guard, message.into()).instrument(span));

        Ok(StreamingSession::new(thread_id, rx, cancel, task))
    }

    /// Run a turn to completion, discarding its events.
    pub async fn run_turn(
        &self,
        thread_id: impl Into<ThreadId>,
        message: impl Into<String>,
    ) -> Result<TurnOutcome, AgentError> {
        Ok(self.start_turn(thread_id, message)?.outcome().await)
    }

    /// Request cancellation of the running turn on `thread_id`. False when the thread is idle.
    pub fn cancel_turn(&self, thread_id: &ThreadId) -> bool {
        let cancelled = self.locks.cancel(thread_id);
        if cancelled {
            tracing::info!(thread_id = %thread_id, "cancellation requested");
        }
        cancelled
    }

    /// Latest committed state of a thread; empty for unknown threads.
    pub async fn load_thread(&self, thread_id: &ThreadId) -> Result<ConversationState, AgentError> {
        Ok(self
            .checkpointer
            .load(thread_id)
            .await?
            .map(|checkpoint| checkpoint.state)
            .unwrap_or_default())
    }

    /// Every stored thread with its display name, newest id first.
    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>, AgentError> {
        let mut summaries = Vec::new();
        for thread_id in self.checkpointer.list_threads().await? {
            let name = self.load_thread(&thread_id).await?.title();
            summaries.push(ThreadSummary { thread_id, name });
        }
        summaries.sort_by(|a, b| b.thread_id.cmp(&a.thread_id));
        Ok(summaries)
    }

    /// Remove a thread and all its checkpoints. Fails with Busy while a turn runs on it.
    pub async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), AgentError> {
        let _guard = self
            .locks
            .try_acquire(thread_id, CancellationToken::new())?;
        self.checkpointer.delete_thread(thread_id).await?;
        tracing::info!(thread_id = %thread_id, "deleted thread");
        Ok(())
    }
}

/// Why a turn stopped before producing its answer.
enum Stop {
    Cancelled,
    Failed(AgentError),
}

impl From<AgentError> for Stop {
    fn from(err: AgentError) -> Self {
        Stop::Failed(err)
    }
}

struct Turn {
    agent: ChatAgent,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl Turn {
    async fn drive(self, guard: ThreadGuard, message: String) -> TurnOutcome {
        let result = self.execute(&guard, message).await;
        // Release before the terminal event so a caller reacting to it can start the next turn.
        drop(guard);

        match result {
            Ok((answer, version)) => {
                tracing::info!(version = %version, "turn completed");
                self.deliver(StreamEvent::FinalAnswer {
                    content: answer.clone(),
                    version,
                })
                .await;
                TurnOutcome::Completed { answer, version }
            }
            Err(Stop::Cancelled) => {
                tracing::info!("turn cancelled; nothing persisted");
                let _ = self
                    .events
                    .try_send(StreamEvent::from_error(&AgentError::Cancelled));
                TurnOutcome::Aborted
            }
            Err(Stop::Failed(err)) => {
                tracing::warn!(error = %err, kind = err.kind().as_str(), "turn failed");
                self.deliver(StreamEvent::from_error(&err)).await;
                TurnOutcome::Failed(err)
            }
        }
    }

    async fn execute(
        &self,
        guard: &ThreadGuard,
        message: String,
    ) -> Result<(String, CheckpointVersion), Stop> {
        let thread_id = guard.thread_id();
        let mut state = match self.agent.checkpointer.load(thread_id).await {
            Ok(Some(checkpoint)) => {
                tracing::debug!(version = %checkpoint.version, messages = checkpoint.state.len(), "resuming thread");
                checkpoint.state
            }
            Ok(None) => ConversationState::new(),
            Err(err) => return Err(AgentError::from(err).into()),
        };
        state.append(Message::user(message));

        let schemas = self.agent.tools.schemas();
        let max_rounds = self.agent.config.max_tool_rounds;
        let mut rounds = 0;

        let answer = loop {
            self.ensure_active()?;
            guard.set_phase(TurnPhase::Reasoning);

            match self.reason(&state, &schemas).await? {
                ModelDecision::FinalAnswer { content } => break content,
                ModelDecision::ToolCalls { calls } => {
                    if rounds >= max_rounds {
                        tracing::warn!(rounds, "tool round limit reached; forcing final answer");
                        break ROUND_LIMIT_ANSWER.to_string();
                    }
                    rounds += 1;
                    guard.set_phase(TurnPhase::ToolDispatch);
                    self.dispatch(&mut state, calls).await?;
                }
            }
        };

        self.ensure_active()?;
        guard.set_phase(TurnPhase::Finalizing);
        state.append(Message::assistant(answer.clone()));

        let version = self
            .agent
            .checkpointer
            .save(thread_id, &state)
            .await
            .map_err(AgentError::from)?;
        Ok((answer, version))
    }

    /// One reasoning step. Text deltas are forwarded as partial tokens.
    async fn reason(
        &self,
        state: &ConversationState,
        schemas: &[ToolSchema],
    ) -> Result<ModelDecision, Stop> {
        let request = LlmRequest::new(
            self.agent.config.system_prompt.clone(),
            state.messages().to_vec(),
        )
        .with_tools(schemas.to_vec());

        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
            started = self.agent.model.generate_stream(request) => {
                started.map_err(AgentError::Reasoning)?
            }
        };

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(StreamChunk::TextDelta(text))) => {
                    if !text.is_empty() {
                        self.emit(StreamEvent::PartialToken { content: text }).await?;
                    }
                }
                Some(Ok(StreamChunk::Done(response))) => return Ok(response.decision),
                Some(Err(err)) => return Err(AgentError::Reasoning(err).into()),
                None => {
                    return Err(AgentError::Reasoning(anyhow::anyhow!(
                        "model stream ended without a final response"
                    ))
                    .into())
                }
            }
        }
    }

    /// Run one round of tool calls concurrently and fold every outcome into history.
    async fn dispatch(&self, state: &mut ConversationState, calls: Vec<ToolCall>) -> Result<(), Stop> {
        state.set_pending_tool_calls(calls.clone());
        for call in &calls {
            tracing::info!(tool = %call.name, call_id = %call.id, "dispatching tool call");
            self.emit(StreamEvent::ToolCallStarted { call: call.clone() })
                .await?;
        }

        let tools = &self.agent.tools;
        let results = join_all(
            calls
                .iter()
                .map(|call| tools.invoke(&call.name, call.arguments.clone())),
        )
        .await;
        state.clear_pending_tool_calls();

        let mut finished = Vec::with_capacity(calls.len());
        for (call, result) in calls.into_iter().zip(results) {
            let outcome = ToolOutcome::from_result(result);
            tracing::debug!(
                tool = %call.name,
                call_id = %call.id,
                success = outcome.is_success(),
                "tool call finished"
            );
            finished.push(StreamEvent::ToolCallResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                outcome: outcome.clone(),
            });
            state.append(Message::tool_result(call, outcome));
        }

        for event in finished {
            self.emit(event).await?;
        }
        Ok(())
    }

    /// Stop at a step boundary when cancelled or when nobody is listening anymore.
    fn ensure_active(&self) -> Result<(), Stop> {
        if self.cancel.is_cancelled() || self.events.is_closed() {
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    async fn emit(&self, event: StreamEvent) -> Result<(), Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| {
                tracing::info!("event consumer disconnected");
                Stop::Cancelled
            }),
        }
    }

    /// Best-effort delivery of the terminal event.
    async fn deliver(&self, event: StreamEvent) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let _ = self.events.try_send(event);
            }
            _ = self.events.send(event.clone()) => {}
        }
    }
}
