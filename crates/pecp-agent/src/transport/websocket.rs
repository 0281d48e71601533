//! STOMP over WebSocket subscriber.
//!
//! Speaks to the control plane's `/ws` endpoint: CONNECT, wait for
//! CONNECTED, then one SUBSCRIBE on `/topic/bundles/<name>`. A reader task
//! turns MESSAGE frames into deliveries.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use pecp_core::stomp::{Command, Frame};
use pecp_notify::destination_for;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{decode_for_topic, Delivery, NotificationTransport};
use crate::error::AgentError;

const NAME: &str = "broadcast";
const SUBPROTOCOL: &str = "v12.stomp";
const SUBSCRIPTION_ID: &str = "sub-0";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broadcast transport subscriber.
pub struct WebSocketTransport {
    url: Url,
    stream: Option<WsStream>,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url.as_str())
            .field("connected", &(self.stream.is_some() || self.writer.is_some()))
            .finish()
    }
}

impl WebSocketTransport {
    /// Subscriber for the endpoint at `url` (`ws://` or `wss://`).
    pub fn new(url: Url) -> Self {
        Self {
            url,
            stream: None,
            writer: None,
            reader: None,
        }
    }

    fn connect_error(&self, reason: impl ToString) -> AgentError {
        AgentError::Connect {
            transport: NAME,
            target: self.url.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn handshake(&self) -> Result<WsStream, AgentError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_error(e))?;
        request
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (mut ws, _response) = connect_async(request)
            .await
            .map_err(|e| self.connect_error(e))?;

        let host = self.url.host_str().unwrap_or("localhost").to_string();
        let connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0");
        ws.send(text(&connect))
            .await
            .map_err(|e| self.connect_error(e))?;

        loop {
            let message = ws
                .next()
                .await
                .ok_or_else(|| self.connect_error("closed before CONNECTED"))?
                .map_err(|e| self.connect_error(e))?;
            let payload = match message {
                Message::Text(t) => t.into_bytes(),
                Message::Binary(b) => b,
                Message::Close(_) => return Err(self.connect_error("closed before CONNECTED")),
                _ => continue,
            };
            match Frame::decode(&payload).map_err(|e| self.connect_error(e))? {
                None => continue,
                Some(frame) if frame.command == Command::Connected => return Ok(ws),
                Some(frame) if frame.command == Command::Error => {
                    let reason = frame.get("message").unwrap_or("ERROR frame").to_string();
                    return Err(self.connect_error(reason));
                }
                Some(frame) => {
                    return Err(self.connect_error(format!(
                        "expected CONNECTED, got {}",
                        frame.command.as_str()
                    )))
                }
            }
        }
    }
}

fn text(frame: &Frame) -> Message {
    Message::Text(String::from_utf8_lossy(&frame.encode()).into_owned())
}

#[async_trait]
impl NotificationTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn connect(&mut self) -> Result<(), AgentError> {
        self.disconnect().await;
        let ws = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake())
            .await
            .map_err(|_| self.connect_error("handshake timed out"))??;
        tracing::info!(url = %self.url, "stomp session established");
        self.stream = Some(ws);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), AgentError> {
        let mut ws = self.stream.take().ok_or(AgentError::NotConnected(NAME))?;
        let destination = destination_for(topic);
        let subscribe = Frame::new(Command::Subscribe)
            .header("id", SUBSCRIPTION_ID)
            .header("destination", destination.as_str())
            .header("ack", "auto");
        ws.send(text(&subscribe))
            .await
            .map_err(|e| AgentError::Subscribe {
                transport: NAME,
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, mut read) = ws.split();
        let topic = topic.to_string();
        let reader = tokio::spawn(async move {
            let reason = loop {
                let payload = match read.next().await {
                    Some(Ok(Message::Text(t))) => t.into_bytes(),
                    Some(Ok(Message::Binary(b))) => b,
                    Some(Ok(Message::Close(_))) | None => break "server closed the connection".to_string(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break e.to_string(),
                };
                let frame = match Frame::decode(&payload) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable stomp frame");
                        continue;
                    }
                };
                match frame.command {
                    Command::Message => {
                        if let Some(event) = decode_for_topic(&frame.body, &topic) {
                            if sink.send(Delivery::Event(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Command::Error => {
                        break frame.get("message").unwrap_or("ERROR frame").to_string();
                    }
                    _ => {}
                }
            };
            let _ = sink.send(Delivery::ConnectionLost(reason)).await;
        });

        tracing::info!(%destination, "subscribed");
        self.writer = Some(writer);
        self.reader = Some(reader);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let disconnect = text(&Frame::new(Command::Disconnect));
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.send(disconnect.clone()).await;
            let _ = writer.close().await;
        }
        if let Some(mut ws) = self.stream.take() {
            let _ = ws.send(disconnect).await;
            let _ = ws.close(None).await;
        }
    }
}
