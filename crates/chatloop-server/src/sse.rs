//! Server-Sent Events encoding of turn events.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use chatloop_core::events::StreamEvent;
use chatloop_core::state::ThreadId;
use futures::stream::Stream;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

/// Stream a turn's events. Dropping the response stream (client gone) drops
/// the session receiver, which cancels the turn.
pub fn turn_stream<S>(thread_id: ThreadId, events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let stream = events.map(move |event| Ok(to_sse_event(&thread_id, &event)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// The event's JSON with the thread id added, named after the event type.
pub fn to_sse_event(thread_id: &ThreadId, event: &StreamEvent) -> Event {
    Event::default()
        .event(event.event_type_name())
        .data(event_payload(thread_id, event).to_string())
}

fn event_payload(thread_id: &ThreadId, event: &StreamEvent) -> Value {
    let mut payload = serde_json::to_value(event).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to encode stream event");
        json!({ "type": "error", "kind": "reasoning", "message": "event encoding failed" })
    });
    if let Value::Object(fields) = &mut payload {
        fields.insert("thread_id".to_string(), Value::String(thread_id.clone()));
    }
    payload
}
