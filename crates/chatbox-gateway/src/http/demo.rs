//! GET /api/chat/test-stream — SSE demo ticker.
//!
//! Exercises the event-stream path end to end with no upstream involved.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};

pub(crate) const TICKS: u32 = 10;
pub(crate) const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub async fn test_stream_handler(
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        for i in 1..=TICKS {
            yield Ok(Event::default().data(format!("tick {i}")));
            tokio::time::sleep(TICK_INTERVAL).await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
