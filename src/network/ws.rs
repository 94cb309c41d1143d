//! WebSocket audio session over a mutual-TLS connection.
//!
//! The send/receive split and `Message::Text`/`Message::Binary` framing
//! follow `agent-edge-rs`'s `stt.rs` (`connect_async`, `SinkExt::send`,
//! matching `Message::Text`/`Message::Binary`/`Message::Close` on
//! receive), generalized from a one-shot transcription socket into a
//! session that enforces the audio protocol's strict
//! `config` → `binary`* → `eof` ordering.

use crate::config::{TlsConfig, WebSocketConfig};
use crate::network::tls::{build_client_config, server_name, TlsError};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Error, Debug)]
pub enum WsError {
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("connect timed out")]
    ConnectTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    AwaitingConfig,
    Streaming,
    Eof,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioSessionConfig {
    pub room: String,
    pub sample_rate: u32,
    pub encoding: &'static str,
}

#[derive(Debug)]
pub enum ServerEvent {
    Ack(Value),
    Error(String),
    Closed,
}

pub struct WebSocketClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    phase: SessionPhase,
    max_message_size_bytes: usize,
}

impl WebSocketClient {
    /// The certificate is checked against `tls.expected_common_name`, not
    /// the websocket URL's host: a fleet controller is routed to by IP or
    /// a load-balancer name that need not match the pinned device CN.
    pub async fn connect(ws: &WebSocketConfig, tls: &TlsConfig) -> Result<Self, WsError> {
        let client_config = build_client_config(tls)?;
        let domain = server_name(tls)?;
        let url = url::Url::parse(&ws.uri)?;
        let host = url
            .host_str()
            .ok_or_else(|| WsError::ProtocolViolation("websocket uri has no host".into()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let connect = async move {
            let tcp = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(io_as_ws_error)?;
            let tls_stream = tokio_rustls::TlsConnector::from(client_config)
                .connect(domain, tcp)
                .await
                .map_err(io_as_ws_error)?;
            let (stream, _response) =
                tokio_tungstenite::client_async(url.as_str(), MaybeTlsStream::Rustls(tls_stream))
                    .await?;
            Ok::<_, WsError>(stream)
        };

        let stream = tokio::time::timeout(Duration::from_millis(ws.connection_timeout_ms), connect)
            .await
            .map_err(|_| WsError::ConnectTimeout)??;

        Ok(Self {
            stream,
            phase: SessionPhase::AwaitingConfig,
            max_message_size_bytes: ws.max_message_size_bytes,
        })
    }

    /// Must be the first message sent on a session; any other call
    /// before this one is a protocol violation.
    pub async fn send_config(&mut self, config: &AudioSessionConfig) -> Result<(), WsError> {
        if self.phase != SessionPhase::AwaitingConfig {
            return Err(WsError::ProtocolViolation(
                "config already sent for this session".into(),
            ));
        }
        let text = serde_json::to_string(config)
            .map_err(|e| WsError::ProtocolViolation(format!("config serialize failed: {e}")))?;
        self.stream.send(Message::Text(text.into())).await?;
        self.phase = SessionPhase::Streaming;
        Ok(())
    }

    /// Send one binary audio chunk. Only valid after `send_config` and
    /// before `send_eof`.
    pub async fn send_audio_chunk(&mut self, chunk: &[u8]) -> Result<(), WsError> {
        if self.phase != SessionPhase::Streaming {
            return Err(WsError::ProtocolViolation(format!(
                "cannot send audio in phase {:?}; config must precede audio and eof must follow it",
                self.phase
            )));
        }
        if chunk.len() > self.max_message_size_bytes {
            return Err(WsError::MessageTooLarge {
                size: chunk.len(),
                limit: self.max_message_size_bytes,
            });
        }
        self.stream.send(Message::Binary(chunk.to_vec().into())).await?;
        Ok(())
    }

    /// Signal end of this audio session. No further audio may be sent
    /// until a new session begins (a fresh `WebSocketClient`).
    pub async fn send_eof(&mut self) -> Result<(), WsError> {
        if self.phase != SessionPhase::Streaming {
            return Err(WsError::ProtocolViolation(format!(
                "eof must follow a config + audio stream, current phase is {:?}",
                self.phase
            )));
        }
        self.stream
            .send(Message::Text(serde_json::json!({"type": "eof"}).to_string().into()))
            .await?;
        self.phase = SessionPhase::Eof;
        Ok(())
    }

    pub async fn send_ping(&mut self) -> Result<(), WsError> {
        self.stream.send(Message::Ping(Vec::new().into())).await?;
        Ok(())
    }

    pub async fn next_event(&mut self) -> Result<ServerEvent, WsError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(&text)
                    .unwrap_or_else(|_| Value::String(text.to_string()));
                if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
                    Ok(ServerEvent::Error(err.to_string()))
                } else {
                    Ok(ServerEvent::Ack(value))
                }
            }
            Some(Ok(Message::Close(frame))) => {
                self.phase = SessionPhase::Closed;
                log_close(frame);
                Ok(ServerEvent::Closed)
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                Ok(ServerEvent::Ack(Value::Null))
            }
            Some(Ok(Message::Binary(_))) => Ok(ServerEvent::Ack(Value::Null)),
            Some(Ok(Message::Frame(_))) => Ok(ServerEvent::Ack(Value::Null)),
            Some(Err(e)) => Err(WsError::WebSocket(e)),
            None => {
                self.phase = SessionPhase::Closed;
                Ok(ServerEvent::Closed)
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), WsError> {
        self.stream.close(None).await?;
        self.phase = SessionPhase::Closed;
        Ok(())
    }
}

fn io_as_ws_error(e: std::io::Error) -> WsError {
    WsError::WebSocket(tokio_tungstenite::tungstenite::Error::Io(e))
}

fn log_close(frame: Option<CloseFrame>) {
    match frame {
        Some(f) => log::info!("server closed websocket: {} {}", f.code, f.reason),
        None => log::info!("server closed websocket without a close frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_session_config_serializes_expected_fields() {
        let config = AudioSessionConfig {
            room: "kitchen".to_string(),
            sample_rate: 16_000,
            encoding: "pcm_s16le",
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["room"], "kitchen");
        assert_eq!(json["sample_rate"], 16_000);
    }
}
