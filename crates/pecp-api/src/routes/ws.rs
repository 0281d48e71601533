//! # STOMP over WebSocket
//!
//! Server side of the broadcast transport. Each WebSocket message carries
//! one STOMP frame. Clients `CONNECT`, `SUBSCRIBE` to
//! `/topic/bundles/<name>`, and receive `MESSAGE` frames pushed by the
//! broadcast hub. Frames a client sends are handled by [`handle_frame`],
//! which does not touch the socket so it can be tested on its own.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use pecp_core::stomp::{Command, Frame};
use pecp_notify::{BroadcastHub, Session};

use crate::state::AppState;

/// Build the WebSocket router.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub;
    ws.protocols(["v12.stomp"])
        .on_upgrade(move |socket| serve_session(socket, hub))
}

/// What the connection should do after a client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Flush pending replies and close.
    Close,
}

fn error_frame(message: &str) -> Frame {
    Frame::new(Command::Error)
        .header("message", message)
        .header("content-type", "text/plain")
        .body(message.as_bytes().to_vec())
}

/// Apply one client frame to `session`, queueing any reply on it.
pub fn handle_frame(session: &Session, frame: &Frame) -> Flow {
    let flow = match frame.command {
        Command::Connect | Command::Stomp => {
            session.reply(
                &Frame::new(Command::Connected)
                    .header("version", "1.2")
                    .header("heart-beat", "0,0")
                    .header("session", session.id().to_string()),
            );
            Flow::Continue
        }
        Command::Subscribe => match (frame.get("destination"), frame.get("id")) {
            (Some(destination), Some(id)) => {
                session.subscribe(destination, id);
                Flow::Continue
            }
            _ => {
                session.reply(&error_frame("SUBSCRIBE requires destination and id headers"));
                Flow::Close
            }
        },
        Command::Unsubscribe => match frame.get("id") {
            Some(id) => {
                session.unsubscribe(id);
                Flow::Continue
            }
            None => {
                session.reply(&error_frame("UNSUBSCRIBE requires an id header"));
                Flow::Close
            }
        },
        Command::Disconnect => Flow::Close,
        Command::Send => {
            session.reply(&error_frame("this server does not accept SEND"));
            Flow::Close
        }
        other => {
            session.reply(&error_frame(&format!(
                "unexpected client command {}",
                other.as_str()
            )));
            Flow::Close
        }
    };

    if let Some(receipt) = frame.get("receipt") {
        session.reply(&Frame::new(Command::Receipt).header("receipt-id", receipt));
    }
    flow
}

async fn serve_session(socket: WebSocket, hub: BroadcastHub) {
    let (session, mut outbound) = hub.open_session();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            let message = match String::from_utf8(bytes) {
                Ok(text) => Message::Text(text.into()),
                Err(e) => Message::Binary(e.into_bytes().into()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(incoming) = stream.next().await {
        let bytes = match incoming {
            Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
            Ok(Message::Binary(bytes)) => bytes.to_vec(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session = session.id(), error = %e, "websocket read failed");
                break;
            }
        };
        match Frame::decode(&bytes) {
            Ok(Some(frame)) => {
                if handle_frame(&session, &frame) == Flow::Close {
                    break;
                }
            }
            // Heart-beat.
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session = session.id(), error = %e, "malformed STOMP frame");
                session.reply(&error_frame(&e.to_string()));
                break;
            }
        }
    }

    // Dropping the session unregisters it and closes the outbound queue,
    // which lets the writer flush and exit.
    drop(session);
    let _ = writer.await;
}
