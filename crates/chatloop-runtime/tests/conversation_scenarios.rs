//! End-to-end turns against scripted models.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatloop_core::error::{AgentError, ErrorKind};
use chatloop_core::events::StreamEvent;
use chatloop_core::llm::{ChunkStream, LanguageModel, LlmRequest, LlmResponse, ModelDecision, StreamChunk};
use chatloop_core::messaging::{MessageRole, ToolCall, ToolFailureKind, ToolOutcome};
use chatloop_core::persistence::{Checkpointer, InMemoryCheckpointer};
use chatloop_core::state::{CheckpointVersion, ThreadId};
use chatloop_core::tools::ToolParameterSchema;
use chatloop_persistence::FileCheckpointer;
use chatloop_runtime::{ChatAgent, ConfigurableAgentBuilder, TurnOutcome};
use chatloop_toolkit::{tool, Calculator};
use serde_json::json;
use tokio::sync::Semaphore;

/// Replays a fixed list of steps, each with optional streamed text.
struct ScriptedModel {
    steps: Mutex<VecDeque<(Vec<&'static str>, ModelDecision)>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedModel {
    fn new(decisions: impl IntoIterator<Item = ModelDecision>) -> Self {
        Self::streaming(decisions.into_iter().map(|d| (Vec::new(), d)))
    }

    fn streaming(steps: impl IntoIterator<Item = (Vec<&'static str>, ModelDecision)>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::default(),
        }
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, request: LlmRequest) -> anyhow::Result<(Vec<&'static str>, ModelDecision)> {
        self.requests.lock().unwrap().push(request);
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        Ok(self.next_step(request)?.1.into())
    }

    async fn generate_stream(&self, request: LlmRequest) -> anyhow::Result<ChunkStream> {
        let (deltas, decision) = self.next_step(request)?;
        let chunks: Vec<anyhow::Result<StreamChunk>> = deltas
            .into_iter()
            .map(|text| Ok(StreamChunk::TextDelta(text.to_string())))
            .chain(std::iter::once(Ok(StreamChunk::Done(decision.into()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Always asks for another calculation.
struct RelentlessModel;

#[async_trait]
impl LanguageModel for RelentlessModel {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        let id = format!("call-{}", request.messages.len());
        Ok(ModelDecision::tool_calls(vec![calc(&id, "1+1")]).into())
    }
}

/// Answers once per released permit.
struct GatedModel {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl LanguageModel for GatedModel {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        self.gate.acquire().await?.forget();
        let count = request.messages.len();
        Ok(ModelDecision::answer(format!("seen {count} messages")).into())
    }
}

struct BrokenModel;

#[async_trait]
impl LanguageModel for BrokenModel {
    async fn generate(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
        anyhow::bail!("upstream returned 500")
    }
}

fn calc(id: &str, expression: &str) -> ToolCall {
    ToolCall::new(id, "calculator", json!({ "expression": expression }))
}

fn agent_with(model: Arc<dyn LanguageModel>, store: Arc<dyn Checkpointer>) -> ChatAgent {
    ConfigurableAgentBuilder::new("You are a test assistant.")
        .with_model(model)
        .with_tool(Arc::new(Calculator::new()))
        .with_checkpointer(store)
        .build()
        .unwrap()
}

async fn wait_until_idle(agent: &ChatAgent, thread_id: &ThreadId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while agent.locks().is_locked(thread_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("turn did not release its lock");
}

#[tokio::test]
async fn arithmetic_turn_records_tool_result_and_answer() {
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::tool_calls(vec![calc("c1", "12*7")]),
        ModelDecision::answer("12 times 7 is 84."),
    ]));
    let store = Arc::new(InMemoryCheckpointer::new());
    let agent = agent_with(model.clone(), store.clone());

    let (events, outcome) = agent.start_turn("t1", "What is 12*7?").unwrap().collect().await;
    match &outcome {
        TurnOutcome::Completed { answer, version } => {
            assert_eq!(answer, "12 times 7 is 84.");
            assert_eq!(*version, CheckpointVersion(1));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let names: Vec<_> = events.iter().map(StreamEvent::event_type_name).collect();
    assert_eq!(names, ["tool_call_started", "tool_call_result", "final_answer"]);

    let state = agent.load_thread(&"t1".to_string()).await.unwrap();
    assert_eq!(state.len(), 3);
    let roles: Vec<_> = state.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, [MessageRole::User, MessageRole::Tool, MessageRole::Assistant]);
    let (call, result) = state.messages()[1].content.as_tool_result().unwrap();
    assert_eq!(call.id, "c1");
    assert_eq!(result, &ToolOutcome::Success { output: json!(84) });
    assert!(state.pending_tool_calls().is_empty());

    // The second reasoning step saw the tool result.
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
}

#[tokio::test]
async fn follow_up_turn_sees_prior_history() {
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::tool_calls(vec![calc("c1", "12*7")]),
        ModelDecision::answer("84"),
        ModelDecision::answer("85"),
    ]));
    let agent = agent_with(model.clone(), Arc::new(InMemoryCheckpointer::new()));

    agent.run_turn("t1", "What is 12*7?").await.unwrap();
    let outcome = agent.run_turn("t1", "Now add one").await.unwrap();
    assert_eq!(outcome.answer(), Some("85"));

    let requests = model.requests();
    assert_eq!(requests.last().unwrap().messages.len(), 4);

    let state = agent.load_thread(&"t1".to_string()).await.unwrap();
    assert_eq!(state.len(), 5);
    let ordinals: Vec<_> = state.messages().iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, [0, 1, 2, 3, 4]);
    assert_eq!(
        state.transcript().map(|(_, text)| text).collect::<Vec<_>>(),
        ["What is 12*7?", "84", "Now add one", "85"]
    );
}

#[tokio::test]
async fn tool_failures_are_folded_and_the_turn_completes() {
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::tool_calls(vec![calc("c1", "2/0")]),
        ModelDecision::answer("Division by zero is undefined."),
    ]));
    let agent = agent_with(model.clone(), Arc::new(InMemoryCheckpointer::new()));

    let (events, outcome) = agent.start_turn("t1", "What is 2/0?").unwrap().collect().await;
    assert!(outcome.is_completed());

    let result = events
        .iter()
        .find_map(|event| match event {
            StreamEvent::ToolCallResult { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
        .unwrap();
    match result {
        ToolOutcome::Failure { kind, message } => {
            assert_eq!(kind, ToolFailureKind::Execution);
            assert!(message.contains("division by zero"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let seen = &model.requests()[1].messages[1];
    assert!(!seen.content.as_tool_result().unwrap().1.is_success());
}

#[tokio::test]
async fn invalid_arguments_and_unknown_tools_are_validation_failures() {
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::tool_calls(vec![
            ToolCall::new("bad-json", "calculator", json!("{\"expression\": ")),
            ToolCall::new("wrong-field", "calculator", json!({"expr": "1+1"})),
            ToolCall::new("ghost", "weather", json!({})),
        ]),
        ModelDecision::answer("Sorry, I could not work that out."),
    ]));
    let agent = agent_with(model, Arc::new(InMemoryCheckpointer::new()));

    let outcome = agent.run_turn("t1", "hmm").await.unwrap();
    assert!(outcome.is_completed());

    let state = agent.load_thread(&"t1".to_string()).await.unwrap();
    assert_eq!(state.len(), 5);
    for message in &state.messages()[1..4] {
        match message.content.as_tool_result().unwrap().1 {
            ToolOutcome::Failure { kind, .. } => assert_eq!(*kind, ToolFailureKind::Validation),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn round_limit_forces_a_final_answer() {
    let agent = ConfigurableAgentBuilder::new("loop")
        .with_model(Arc::new(RelentlessModel))
        .with_tool(Arc::new(Calculator::new()))
        .with_max_tool_rounds(5)
        .build()
        .unwrap();

    let (events, outcome) = agent.start_turn("t1", "count forever").unwrap().collect().await;
    let answer = outcome.answer().unwrap().to_string();
    assert!(answer.contains("allowed number of tool calls"), "{answer}");

    let started = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ToolCallStarted { .. }))
        .count();
    assert_eq!(started, 5);

    let state = agent.load_thread(&"t1".to_string()).await.unwrap();
    assert_eq!(state.len(), 7);
    assert_eq!(state.last().unwrap().text(), Some(answer.as_str()));
}

#[tokio::test]
async fn events_are_ordered_with_a_single_terminal_event() {
    let slow = tool(
        "slow_echo",
        "Echo after a pause",
        ToolParameterSchema::object(
            "input",
            [("text".to_string(), ToolParameterSchema::string("text"))]
                .into_iter()
                .collect(),
            vec!["text".to_string()],
        ),
        |args| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(args["text"].clone())
        },
    );
    let model = Arc::new(ScriptedModel::streaming([
        (
            vec!["Let me ", "check."],
            ModelDecision::tool_calls(vec![
                ToolCall::new("a", "slow_echo", json!({"text": "first"})),
                calc("b", "3+4"),
            ]),
        ),
        (vec!["Both ", "done."], ModelDecision::answer("Both done.")),
    ]));
    let agent = ConfigurableAgentBuilder::new("order")
        .with_model(model)
        .with_tool(Arc::new(Calculator::new()))
        .with_tool(slow)
        .build()
        .unwrap();

    let (events, outcome) = agent.start_turn("t1", "go").unwrap().collect().await;
    assert!(outcome.is_completed());

    let names: Vec<_> = events.iter().map(StreamEvent::event_type_name).collect();
    assert_eq!(
        names,
        [
            "partial_token",
            "partial_token",
            "tool_call_started",
            "tool_call_started",
            "tool_call_result",
            "tool_call_result",
            "partial_token",
            "partial_token",
            "final_answer",
        ]
    );
    let result_ids: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCallResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, ["a", "b"]);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());

    // Final answer text equals the concatenated partial tokens of the last step.
    match events.last().unwrap() {
        StreamEvent::FinalAnswer { content, version } => {
            assert_eq!(content, "Both done.");
            assert_eq!(*version, CheckpointVersion(1));
        }
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_turn_on_same_thread_is_busy() {
    let gate = Arc::new(Semaphore::new(0));
    let agent = agent_with(
        Arc::new(GatedModel { gate: gate.clone() }),
        Arc::new(InMemoryCheckpointer::new()),
    );

    let first = agent.start_turn("t1", "hello").unwrap();
    let err = agent.start_turn("t1", "me too").err().unwrap();
    assert!(matches!(err, AgentError::Busy(ref id) if id == "t1"));
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(matches!(
        agent.delete_thread(&"t1".to_string()).await,
        Err(AgentError::Busy(_))
    ));

    let other = agent.start_turn("t2", "independent").unwrap();
    assert_eq!(agent.active_turns().len(), 2);

    gate.add_permits(2);
    assert!(first.outcome().await.is_completed());
    assert!(other.outcome().await.is_completed());
    assert!(agent.active_turns().is_empty());

    // Released: the next turn on t1 proceeds.
    gate.add_permits(1);
    let third = agent.run_turn("t1", "again").await.unwrap();
    assert_eq!(third.answer(), Some("seen 3 messages"));
}

#[tokio::test]
async fn cancelled_turn_leaves_the_checkpoint_untouched() {
    let gate = Arc::new(Semaphore::new(1));
    let store = Arc::new(InMemoryCheckpointer::new());
    let agent = agent_with(Arc::new(GatedModel { gate: gate.clone() }), store.clone());
    let thread_id = "t1".to_string();

    agent.run_turn("t1", "first").await.unwrap();
    let before = store.load(&thread_id).await.unwrap().unwrap();
    assert_eq!(before.version, CheckpointVersion(1));

    let session = agent.start_turn("t1", "second").unwrap();
    assert!(agent.cancel_turn(&thread_id));
    gate.add_permits(1);

    let (events, outcome) = session.collect().await;
    assert!(matches!(outcome, TurnOutcome::Aborted));
    match events.last() {
        Some(StreamEvent::Error { kind, .. }) => assert_eq!(*kind, ErrorKind::Cancelled),
        other => panic!("expected cancellation event, got {other:?}"),
    }

    let after = store.load(&thread_id).await.unwrap().unwrap();
    assert_eq!(after, before);
    assert!(!agent.locks().is_locked(&thread_id));
    assert!(!agent.cancel_turn(&thread_id));
}

#[tokio::test]
async fn dropping_the_session_cancels_the_turn() {
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryCheckpointer::new());
    let agent = agent_with(Arc::new(GatedModel { gate: gate.clone() }), store.clone());
    let thread_id = "gone".to_string();

    drop(agent.start_turn("gone", "anyone there?").unwrap());
    gate.add_permits(1);
    wait_until_idle(&agent, &thread_id).await;

    assert!(store.load(&thread_id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelling_during_tool_dispatch_lets_the_tool_finish() {
    let finished = Arc::new(AtomicUsize::new(0));
    let slow = {
        let finished = finished.clone();
        tool(
            "slow_lookup",
            "Looks something up, slowly",
            ToolParameterSchema::object("input", Default::default(), Vec::new()),
            move |_args| {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("found it"))
                }
            },
        )
    };
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::answer("Hello."),
        ModelDecision::tool_calls(vec![ToolCall::new("s1", "slow_lookup", json!({}))]),
        ModelDecision::answer("never reached"),
    ]));
    let store = Arc::new(InMemoryCheckpointer::new());
    let agent = ConfigurableAgentBuilder::new("dispatch")
        .with_model(model.clone())
        .with_tool(slow)
        .with_checkpointer(store.clone())
        .build()
        .unwrap();
    let thread_id = "t1".to_string();

    agent.run_turn("t1", "hi").await.unwrap();
    let before = store.load(&thread_id).await.unwrap().unwrap();

    let mut session = agent.start_turn("t1", "look it up").unwrap();
    match session.next_event().await {
        Some(StreamEvent::ToolCallStarted { call }) => assert_eq!(call.name, "slow_lookup"),
        other => panic!("expected tool_call_started, got {other:?}"),
    }
    session.cancel();

    let (rest, outcome) = session.collect().await;
    assert!(matches!(outcome, TurnOutcome::Aborted));
    assert!(!rest.iter().any(|e| matches!(e, StreamEvent::FinalAnswer { .. })));
    match rest.last() {
        Some(StreamEvent::Error { kind, .. }) => assert_eq!(*kind, ErrorKind::Cancelled),
        other => panic!("expected cancellation event, got {other:?}"),
    }

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    // One request for the first turn, one for the cancelled turn.
    assert_eq!(model.requests().len(), 2);
    assert_eq!(store.load(&thread_id).await.unwrap().unwrap(), before);
    assert!(!agent.locks().is_locked(&thread_id));
}

#[tokio::test]
async fn reasoning_failure_emits_error_and_saves_nothing() {
    let store = Arc::new(InMemoryCheckpointer::new());
    let agent = agent_with(Arc::new(BrokenModel), store.clone());

    let (events, outcome) = agent.start_turn("t1", "hi").unwrap().collect().await;
    assert!(matches!(outcome, TurnOutcome::Failed(AgentError::Reasoning(_))));
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::Reasoning);
            assert!(message.contains("upstream returned 500"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(store.load(&"t1".to_string()).await.unwrap().is_none());
    assert!(!agent.locks().is_locked(&"t1".to_string()));
}

#[tokio::test]
async fn file_store_round_trips_across_agents() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::tool_calls(vec![calc("c1", "12*7")]),
        ModelDecision::answer("84"),
        ModelDecision::answer("Still 84."),
    ]));

    let first = agent_with(model.clone(), Arc::new(FileCheckpointer::new(dir.path())));
    first.run_turn("persisted", "What is 12*7?").await.unwrap();
    let saved = first.load_thread(&"persisted".to_string()).await.unwrap();

    // A fresh agent over the same directory, as after a restart.
    let second = agent_with(model.clone(), Arc::new(FileCheckpointer::new(dir.path())));
    let reloaded = second.load_thread(&"persisted".to_string()).await.unwrap();
    assert_eq!(reloaded, saved);

    let outcome = second.run_turn("persisted", "Are you sure?").await.unwrap();
    match outcome {
        TurnOutcome::Completed { version, .. } => assert_eq!(version, CheckpointVersion(2)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(second.load_thread(&"persisted".to_string()).await.unwrap().len(), 5);
}

#[tokio::test]
async fn threads_are_listed_by_title_and_deletable() {
    let model = Arc::new(ScriptedModel::new([
        ModelDecision::answer("a"),
        ModelDecision::answer("b"),
    ]));
    let agent = agent_with(model, Arc::new(InMemoryCheckpointer::new()));

    agent
        .run_turn("thread-a", "Plan a trip to Lisbon next spring")
        .await
        .unwrap();
    agent.run_turn("thread-b", "Hello").await.unwrap();

    let threads = agent.list_threads().await.unwrap();
    let listed: Vec<_> = threads
        .iter()
        .map(|t| (t.thread_id.as_str(), t.name.as_str()))
        .collect();
    assert_eq!(
        listed,
        [("thread-b", "Hello"), ("thread-a", "Plan a trip to Lisbon...")]
    );

    agent.delete_thread(&"thread-a".to_string()).await.unwrap();
    let remaining = agent.list_threads().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(agent
        .load_thread(&"thread-a".to_string())
        .await
        .unwrap()
        .is_empty());
}
