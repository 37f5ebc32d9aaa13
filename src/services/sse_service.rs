use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::{AppState, SseHub},
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to the shared public SSE stream.
pub fn subscribe_public(state: &AppState) -> broadcast::Receiver<ServerEvent> {
    state.public_sse().subscribe()
}

/// Subscribe to the operator stream. Callers must have checked the admin token.
pub fn subscribe_admin(state: &AppState) -> broadcast::Receiver<ServerEvent> {
    state.admin_sse().subscribe()
}

/// Identifies the target SSE stream for logging once the connection is torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// Stream open to everyone.
    Public,
    /// Operator stream.
    Admin,
}

impl StreamKind {
    fn as_str(self) -> &'static str {
        match self {
            StreamKind::Public => "public",
            StreamKind::Admin => "admin",
        }
    }
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the client leaves.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // a refresh is a full view, so the next one catches the client up
                            debug!(stream = kind.as_str(), skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }
        info!(stream = kind.as_str(), "SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Announce a new subscriber on a stream, including the current storage health.
pub fn broadcast_handshake(hub: &SseHub, kind: StreamKind, degraded: bool) {
    if let Ok(event) = ServerEvent::json(
        Some(EVENT_HANDSHAKE.to_string()),
        &Handshake {
            stream: kind.as_str().to_string(),
            message: format!("{} stream connected", kind.as_str()),
            degraded,
        },
    ) {
        hub.broadcast(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    #[tokio::test]
    async fn handshake_reports_stream_and_degraded_flag() {
        let (state, _channels, _store) = test_state();
        let mut admin = subscribe_admin(&state);
        broadcast_handshake(state.admin_sse(), StreamKind::Admin, true);

        let event = admin.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("handshake"));
        assert!(event.data.contains("\"stream\":\"admin\""));
        assert!(event.data.contains("\"degraded\":true"));
    }
}
