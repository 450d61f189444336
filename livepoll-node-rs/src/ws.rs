//! WebSocket subscription endpoint
//!
//! Clients connect to `/ws/polls/{pollId}` and receive one OPTION_UPDATED text
//! frame per counted vote. The handshake is refused with 400 for a malformed
//! path and 404 for an unknown poll. When the poll is deleted the server
//! closes with 1000 "poll deleted"; a client that falls too far behind is
//! closed with 1013.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use livepoll_core::{ErrorKind, PollEngine, PollId, PollSubscriber};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{
    self,
    handshake::server::{ErrorResponse, Request, Response},
    http::StatusCode,
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PATH_PREFIX: &str = "/ws/polls/";

#[derive(Debug, Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Extract the poll id from `/ws/polls/{pollId}`
pub fn parse_poll_path(path: &str) -> Option<PollId> {
    let id = path.strip_prefix(PATH_PREFIX)?.trim_end_matches('/');
    Uuid::parse_str(id).ok()
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, engine: Arc<PollEngine>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, engine).await {
                        debug!("WS: Connection {} ended with error: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("WS: Accept failed: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<PollEngine>,
) -> Result<(), WsError> {
    let mut subscription: Option<PollSubscriber> = None;

    let callback = |request: &Request, response: Response| {
        let path = request.uri().path();
        let Some(poll_id) = parse_poll_path(path) else {
            debug!("WS: {} asked for bad path {}", peer, path);
            return Err(reject(StatusCode::BAD_REQUEST, "expected /ws/polls/{pollId}"));
        };

        match engine.subscribe(poll_id) {
            Ok(subscriber) => {
                subscription = Some(subscriber);
                Ok(response)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(reject(StatusCode::NOT_FOUND, "poll not found"))
            }
            Err(e) => {
                warn!("WS: Subscribe to {} failed: {}", poll_id, e);
                Err(reject(StatusCode::SERVICE_UNAVAILABLE, "try again later"))
            }
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Some(mut subscriber) = subscription else {
        return Ok(());
    };
    let poll_id = *subscriber.topic();
    info!("WS: {} subscribed to poll {}", peer, poll_id);

    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            update = subscriber.recv() => {
                match update {
                    Some(message) => {
                        ws_tx.send(Message::text(message.to_json()?)).await?;
                    }
                    None => {
                        let frame = match engine.status_of(poll_id) {
                            Err(e) if e.kind() == ErrorKind::NotFound => CloseFrame {
                                code: CloseCode::Normal,
                                reason: "poll deleted".into(),
                            },
                            _ => CloseFrame {
                                code: CloseCode::Again,
                                reason: "too far behind".into(),
                            },
                        };
                        info!("WS: Closing {} ({})", peer, frame.reason);
                        ws_tx.send(Message::Close(Some(frame))).await?;
                        break;
                    }
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        debug!("WS: Ignoring client text from {}: {}", peer, text);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WS: {} disconnected", peer);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepoll_core::{EngineConfig, PollMessage};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    async fn start_node() -> (SocketAddr, Arc<PollEngine>) {
        let engine = Arc::new(PollEngine::open(EngineConfig::default()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, engine.clone()));
        (addr, engine)
    }

    async fn handshake_status(url: String) -> StatusCode {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => response.status(),
            Err(e) => panic!("unexpected handshake error: {}", e),
            Ok(_) => panic!("handshake should have been refused"),
        }
    }

    #[test]
    fn test_parse_poll_path() {
        let id = Uuid::new_v4();

        assert_eq!(parse_poll_path(&format!("/ws/polls/{}", id)), Some(id));
        assert_eq!(parse_poll_path(&format!("/ws/polls/{}/", id)), Some(id));
        assert_eq!(parse_poll_path("/ws/polls/"), None);
        assert_eq!(parse_poll_path("/ws/polls/not-a-uuid"), None);
        assert_eq!(parse_poll_path(&format!("/polls/{}", id)), None);
        assert_eq!(parse_poll_path(&format!("/ws/polls/{}/extra", id)), None);
    }

    #[test]
    fn test_reject_response() {
        let response = reject(StatusCode::NOT_FOUND, "poll not found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_deref(), Some("poll not found"));
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_path_and_unknown_poll() {
        let (addr, _engine) = start_node().await;

        let status = handshake_status(format!("ws://{}/ws/polls/not-a-uuid", addr)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let status = handshake_status(format!("ws://{}/elsewhere", addr)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let status = handshake_status(format!("ws://{}/ws/polls/{}", addr, Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_updates_then_close_on_delete() {
        let (addr, engine) = start_node().await;
        let poll = engine
            .schedule_poll(
                "Stream?",
                chrono::Duration::zero(),
                chrono::Duration::hours(1),
                vec!["a".into(), "b".into(), "c".into()],
            )
            .unwrap();

        let (mut ws, _) = connect_async(format!("ws://{}/ws/polls/{}", addr, poll.id)).await.unwrap();

        engine.cast_vote(poll.id, poll.options[1].id).unwrap();
        let frame = timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        let text = match frame {
            Message::Text(text) => text,
            other => panic!("expected a text frame, got {:?}", other),
        };
        let message: PollMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(message.payload.id, poll.options[1].id);
        assert_eq!(message.payload.votes, 1);

        engine.delete_poll(poll.id).unwrap();
        let frame = timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        let close = match frame {
            Message::Close(Some(close)) => close,
            other => panic!("expected a close frame, got {:?}", other),
        };
        assert_eq!(close.code, CloseCode::Normal);
        assert_eq!(close.reason, "poll deleted");
    }
}
