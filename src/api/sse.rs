//! SSE log stream (spec §4.H/§9): subscribes to the ring with an optional
//! replay cursor, sends a 15s heartbeat comment between entries so
//! intermediate proxies don't time out the connection, and closes with a
//! final event after surfacing exactly one `Lagged` notice.

use super::AppState;
use crate::model::encode_cursor;
use crate::ring::RingEvent;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub since_cursor: Option<String>,
}

pub async fn stream_logs(
    State(state): State<AppState>,
    Query(params): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let replay_since = params.since_cursor.as_deref().and_then(crate::model::decode_cursor);
    let (replay, rx) = state.ring.subscribe(replay_since);

    let stream = async_stream::stream! {
        for entry in replay {
            yield Ok(Event::default().event("log").json_data(&entry).unwrap());
        }

        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(RingEvent::Entry(entry)) => {
                    yield Ok(Event::default().event("log").json_data(&entry).unwrap());
                }
                Ok(RingEvent::Lagged) => {
                    yield Ok(Event::default().event("lagged").data("subscriber fell behind, reconnect with since_cursor"));
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    yield Ok(Event::default().event("lagged").data("subscriber fell behind, reconnect with since_cursor"));
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        let cursor = encode_cursor(state.ring.current_seq());
        yield Ok(Event::default().event("done").data(cursor));
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("heartbeat"))
}
