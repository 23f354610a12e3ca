//! Server-Sent Events stream of pipeline lifecycle events

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;

/// GET /events - SSE stream of all pipeline events
///
/// Streams every `EcgEvent` as a JSON-bodied SSE event named after the
/// variant; a comment heartbeat every 15 seconds keeps proxies from
/// closing idle connections. Slow clients miss events rather than
/// stalling the pipeline (broadcast semantics).
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            match serde_json::to_string(&event) {
                                Ok(json) => {
                                    yield Ok(Event::default().data(json));
                                }
                                Err(err) => {
                                    tracing::warn!(error = %err, "Event serialization failed, skipping");
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "SSE client lagged, events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Event bus closed, ending SSE stream");
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream)
}
