//! SSE (Server-Sent Events) stream of invalidation notices.
//!
//! Each client gets its own bus subscription; it is disposed when the client
//! disconnects and the stream is dropped.

use std::sync::Arc;

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::invalidation::bus::InvalidationBus;
use crate::invalidation::messages::InvalidationNotice;

/// Notices buffered per client before new ones are dropped.
const CLIENT_BUFFER: usize = 64;

/// Subscribe to `bus` and turn its notices into SSE events named `invalidation`.
pub fn invalidation_sse_stream(
    bus: &Arc<InvalidationBus>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let (tx, rx) = mpsc::channel::<InvalidationNotice>(CLIENT_BUFFER);
    let subscription = bus.on_invalidation(move |notice| {
        if tx.try_send(notice.clone()).is_err() {
            debug!("SSE client lagging, dropping invalidation notice");
        }
    });

    ReceiverStream::new(rx).map(move |notice| {
        // Lives as long as the stream.
        let _subscription = &subscription;
        let data = serde_json::to_string(&notice).unwrap_or_default();
        Ok(Event::default().event("invalidation").data(data))
    })
}
