//! Event-stream framing shared by both streaming routes.

use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use serde::Serialize;
use std::convert::Infallible;

/// `data: <json>` event. Serialization of our own types cannot fail, an
/// empty payload is sent if it somehow does.
pub fn json_event<T: Serialize>(payload: &T) -> Event {
    Event::default().data(serde_json::to_string(payload).unwrap_or_default())
}

pub fn data_event(data: &str) -> Event {
    Event::default().data(data)
}

/// Sideband `: key=value` line. Generic SSE parsers skip comments, queue-aware
/// clients read them for position feedback.
pub fn sideband(key: &str, value: impl std::fmt::Display) -> Event {
    Event::default().comment(format!("{key}={value}"))
}

pub fn event_stream<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>
where
    S: Stream<Item = Event> + Send + 'static,
{
    use futures_util::StreamExt;
    Sse::new(events.map(Ok::<_, Infallible>))
}
