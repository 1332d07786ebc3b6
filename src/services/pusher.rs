//! Pusher protocol client over a websocket
//!
//! Speaks protocol version 7: waits for `pusher:connection_established`,
//! subscribes with optional per-channel auth, keeps the connection alive with
//! `pusher:ping` / `pusher:pong`, and hands application events to the caller.

use crate::error::{Error, Result};
use crate::types::{ChannelEvent, ConnectionConfig};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const PROTOCOL_VERSION: &str = "7";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Real-time pub/sub connection used by the channel subscriber
#[async_trait]
pub trait PubSubTransport: Send {
    /// Open a connection and return the socket id assigned by the server
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<String>;

    /// Join a channel; private channels carry a signature in `auth`
    async fn subscribe(&mut self, channel: &str, auth: Option<String>) -> Result<()>;

    /// Next application event; `None` once the server closed the connection
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>>;

    async fn disconnect(&mut self);
}

/// Websocket endpoint for an app key on a cluster
pub fn socket_url(config: &ConnectionConfig) -> Result<Url> {
    let base = format!("wss://ws-{}.pusher.com/app/{}", config.cluster, config.key);
    Url::parse_with_params(
        &base,
        &[
            ("protocol", PROTOCOL_VERSION),
            ("client", env!("CARGO_PKG_NAME")),
            ("version", env!("CARGO_PKG_VERSION")),
            ("flash", "false"),
        ],
    )
    .map_err(|e| Error::Transport(format!("invalid pusher url {}: {}", base, e)))
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Established {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Established {
        socket_id: String,
        activity_timeout: Option<Duration>,
    },
    Ping,
    Pong,
    SubscriptionSucceeded(String),
    SubscriptionError {
        channel: Option<String>,
        message: String,
    },
    Error(String),
    /// Any other protocol-internal frame
    Internal(String),
    Event(ChannelEvent),
}

/// Frame `data` is usually a JSON string; keep it as one
fn data_string(data: Option<Value>) -> String {
    match data {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Frame `data` as an object, decoding a JSON string if needed
fn data_object(data: Option<Value>) -> Value {
    match data {
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(other) => other,
        None => Value::Null,
    }
}

fn error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| data.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| data.to_string())
}

pub fn decode_frame(text: &str) -> Result<Frame> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| Error::Transport(format!("malformed pusher frame: {}", e)))?;

    let frame = match raw.event.as_str() {
        "pusher:connection_established" => {
            let established: Established = serde_json::from_value(data_object(raw.data))
                .map_err(|e| Error::Transport(format!("malformed connection_established: {}", e)))?;
            Frame::Established {
                socket_id: established.socket_id,
                activity_timeout: established.activity_timeout.map(Duration::from_secs),
            }
        }
        "pusher:ping" => Frame::Ping,
        "pusher:pong" => Frame::Pong,
        "pusher:error" => Frame::Error(error_message(&data_object(raw.data))),
        "pusher_internal:subscription_succeeded" => {
            Frame::SubscriptionSucceeded(raw.channel.unwrap_or_default())
        }
        "pusher:subscription_error" => Frame::SubscriptionError {
            channel: raw.channel,
            message: error_message(&data_object(raw.data)),
        },
        event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
            Frame::Internal(raw.event)
        }
        _ => match raw.channel {
            Some(channel) => Frame::Event(ChannelEvent {
                channel,
                event: raw.event,
                data: data_string(raw.data),
            }),
            None => Frame::Internal(raw.event),
        },
    };
    Ok(frame)
}

pub fn subscribe_message(channel: &str, auth: Option<&str>) -> Value {
    let mut data = json!({ "channel": channel });
    if let Some(auth) = auth {
        data["auth"] = Value::String(auth.to_string());
    }
    json!({ "event": "pusher:subscribe", "data": data })
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn transport_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Transport(format!("{}: {}", context, e))
}

async fn send_json(socket: &mut WsStream, value: &Value) -> Result<()> {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .map_err(|e| transport_error("websocket send failed", e))
}

/// `PubSubTransport` backed by a Pusher websocket
pub struct PusherTransport {
    socket: Option<WsStream>,
    activity_timeout: Duration,
    awaiting_pong: bool,
}

impl PusherTransport {
    pub fn new() -> Self {
        Self {
            socket: None,
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            awaiting_pong: false,
        }
    }

    async fn await_established(socket: &mut WsStream) -> Result<(String, Option<Duration>)> {
        while let Some(message) = socket.next().await {
            let message = message.map_err(|e| transport_error("websocket read failed", e))?;
            let Message::Text(text) = message else {
                continue;
            };
            match decode_frame(&text)? {
                Frame::Established {
                    socket_id,
                    activity_timeout,
                } => return Ok((socket_id, activity_timeout)),
                Frame::Error(message) => return Err(Error::Transport(message)),
                other => debug!("[Pusher] Ignoring {:?} before connection_established", other),
            }
        }
        Err(Error::Transport("connection closed before it was established".to_string()))
    }
}

impl Default for PusherTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for PusherTransport {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<String> {
        self.disconnect().await;

        let url = socket_url(config)?;
        let (mut socket, _) = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::Transport("timed out connecting to pusher".to_string()))?
            .map_err(|e| transport_error("pusher connect failed", e))?;

        let (socket_id, activity_timeout) = timeout(CONNECT_TIMEOUT, Self::await_established(&mut socket))
            .await
            .map_err(|_| Error::Transport("timed out waiting for connection_established".to_string()))??;

        self.activity_timeout = activity_timeout.unwrap_or(DEFAULT_ACTIVITY_TIMEOUT);
        self.awaiting_pong = false;
        self.socket = Some(socket);

        info!("[Pusher] Connected to cluster {} (socket {})", config.cluster, socket_id);
        Ok(socket_id)
    }

    async fn subscribe(&mut self, channel: &str, auth: Option<String>) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::Transport("subscribe before connect".to_string()))?;
        send_json(socket, &subscribe_message(channel, auth.as_deref())).await?;
        debug!("[Pusher] Subscribe sent for {}", channel);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        loop {
            let wait = if self.awaiting_pong {
                PONG_TIMEOUT
            } else {
                self.activity_timeout
            };
            let socket = self
                .socket
                .as_mut()
                .ok_or_else(|| Error::Transport("read before connect".to_string()))?;

            let message = match timeout(wait, socket.next()).await {
                Err(_) if self.awaiting_pong => {
                    return Err(Error::Transport("pusher:pong not received in time".to_string()));
                }
                Err(_) => {
                    send_json(socket, &json!({ "event": "pusher:ping", "data": {} })).await?;
                    self.awaiting_pong = true;
                    continue;
                }
                Ok(None) => return Ok(None),
                Ok(Some(Err(e))) => return Err(transport_error("websocket read failed", e)),
                Ok(Some(Ok(message))) => message,
            };

            // any traffic counts as activity
            self.awaiting_pong = false;

            match message {
                Message::Text(text) => match decode_frame(&text)? {
                    Frame::Event(event) => return Ok(Some(event)),
                    Frame::Ping => {
                        send_json(socket, &json!({ "event": "pusher:pong", "data": {} })).await?;
                    }
                    Frame::Pong => {}
                    Frame::SubscriptionSucceeded(channel) => {
                        info!("[Pusher] Subscribed to {}", channel);
                    }
                    Frame::SubscriptionError { channel, message } => {
                        return Err(Error::Transport(format!(
                            "subscription to {} refused: {}",
                            channel.as_deref().unwrap_or("<unknown>"),
                            message
                        )));
                    }
                    Frame::Error(message) => {
                        return Err(Error::Transport(format!("pusher error: {}", message)));
                    }
                    Frame::Established { socket_id, .. } => {
                        warn!("[Pusher] Unexpected connection_established ({}) mid-session", socket_id);
                    }
                    Frame::Internal(event) => debug!("[Pusher] {}", event),
                },
                Message::Ping(data) => {
                    socket
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| transport_error("websocket send failed", e))?;
                }
                Message::Close(_) => {
                    info!("[Pusher] Server closed connection");
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("[Pusher] Close failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url() {
        let config = ConnectionConfig {
            key: "abc123".to_string(),
            cluster: "mt1".to_string(),
        };
        let url = socket_url(&config).unwrap();
        assert_eq!(url.host_str(), Some("ws-mt1.pusher.com"));
        assert_eq!(url.path(), "/app/abc123");
        assert!(url.query().unwrap().contains("protocol=7"));
    }

    #[test]
    fn test_decode_established_with_string_data() {
        let text = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":120}"}"#;
        assert_eq!(
            decode_frame(text).unwrap(),
            Frame::Established {
                socket_id: "123.456".to_string(),
                activity_timeout: Some(Duration::from_secs(120)),
            }
        );
    }

    #[test]
    fn test_decode_application_event() {
        let text = r#"{"event":"price.ask.new","channel":"broadcast-parlay","data":"{\"payload\":{\"parlay_id\":\"p\"}}"}"#;
        let Frame::Event(event) = decode_frame(text).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.channel, "broadcast-parlay");
        assert_eq!(event.event, "price.ask.new");
        assert_eq!(event.payload().unwrap()["parlay_id"], "p");
    }

    #[test]
    fn test_decode_errors_and_internal() {
        let error = r#"{"event":"pusher:error","data":{"code":4001,"message":"App key not found"}}"#;
        assert_eq!(decode_frame(error).unwrap(), Frame::Error("App key not found".to_string()));

        let refused = r#"{"event":"pusher:subscription_error","channel":"private-x","data":{"type":"AuthError","error":"bad signature","status":401}}"#;
        assert_eq!(
            decode_frame(refused).unwrap(),
            Frame::SubscriptionError {
                channel: Some("private-x".to_string()),
                message: "bad signature".to_string(),
            }
        );

        let ok = r#"{"event":"pusher_internal:subscription_succeeded","channel":"private-x","data":"{}"}"#;
        assert_eq!(decode_frame(ok).unwrap(), Frame::SubscriptionSucceeded("private-x".to_string()));

        assert_eq!(decode_frame(r#"{"event":"pusher:ping","data":{}}"#).unwrap(), Frame::Ping);
        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn test_subscribe_message() {
        assert_eq!(
            subscribe_message("broadcast-parlay", None),
            json!({"event": "pusher:subscribe", "data": {"channel": "broadcast-parlay"}})
        );
        assert_eq!(
            subscribe_message("private-mm", Some("key:sig")),
            json!({"event": "pusher:subscribe", "data": {"channel": "private-mm", "auth": "key:sig"}})
        );
    }
}
