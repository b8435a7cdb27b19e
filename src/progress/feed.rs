//! Consumer side of a progress channel.

use super::ProgressEvent;
use futures::Stream;
use std::borrow::BorrowMut;
use std::time::Duration;
use tokio::sync::mpsc;

/// What a consumer forwards to its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Event(ProgressEvent),
    /// No event arrived within the keepalive window
    Keepalive,
}

struct FeedState<R> {
    receiver: R,
    keepalive: Duration,
}

/// Turn a channel into a stream of events and keepalives.
///
/// The stream ends right after a terminal event (percent 100 or an error).
/// If the channel closes first, a synthetic [`ProgressEvent::done`] is
/// yielded as the last item. Dropping the stream, e.g. when the client
/// disconnects, releases the receiver; a [`Subscription`](super::Subscription)
/// goes back to its channel for the next consumer.
pub fn drain<R>(receiver: R, keepalive: Duration) -> impl Stream<Item = FeedItem> + Send + 'static
where
    R: BorrowMut<mpsc::Receiver<ProgressEvent>> + Send + 'static,
{
    futures::stream::unfold(
        Some(FeedState {
            receiver,
            keepalive,
        }),
        |state| async move {
            let mut state = state?;
            match tokio::time::timeout(state.keepalive, state.receiver.borrow_mut().recv()).await {
                Err(_) => Some((FeedItem::Keepalive, Some(state))),
                Ok(Some(event)) if event.is_terminal() => Some((FeedItem::Event(event), None)),
                Ok(Some(event)) => Some((FeedItem::Event(event), Some(state))),
                Ok(None) => Some((FeedItem::Event(ProgressEvent::done()), None)),
            }
        },
    )
}
