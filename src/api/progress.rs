use super::AppState;
use crate::env::progress::KEEPALIVE;
use crate::error::Result;
use crate::progress::{FeedItem, drain};
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};

/// Server-sent events for one start request.
///
/// Each event is a `{percent, message, error}` JSON frame; silence is broken
/// by a `: keepalive` comment every 30 s.
pub async fn stream(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let subscription = state.orchestrator.hub().attach(&request_id)?;

    let events = drain(subscription, KEEPALIVE)
        .map(|item| match item {
            FeedItem::Event(event) => Event::default().json_data(event),
            FeedItem::Keepalive => Ok(Event::default().comment("keepalive")),
        })
        .take_until(state.shutdown.clone().cancelled_owned());

    Ok(Sse::new(events))
}
