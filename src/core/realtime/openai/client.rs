//! OpenAI Realtime API connector.
//!
//! [`OpenAIConnector`] opens authenticated WebSocket sessions against the
//! OpenAI Realtime API and hands each one out as an [`UpstreamSession`].
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Headers: `Authorization: Bearer <key>`, `OpenAI-Beta: realtime=v1`
//! - Protocol: WebSocket with JSON events
//!
//! After the handshake a pump task owns the socket. It serializes outbound
//! [`ClientEvent`]s, decodes inbound [`ServerEvent`]s, answers pings and
//! publishes `Closed` on the session's ready watch when the socket ends.
//!
//! The pump never waits on the inbound channel. A session sitting idle in the
//! pool has no reader, so events that do not fit are dropped and the socket
//! keeps being read.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::config::realtime_url;
use super::messages::ServerEvent;
use crate::core::realtime::base::{
    ReadyState, RealtimeConfig, RealtimeError, RealtimeResult, UpstreamConnector,
};
use crate::core::realtime::session::{UpstreamPeer, UpstreamSession};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connector
// =============================================================================

/// Opens sessions against the OpenAI Realtime API.
#[derive(Debug, Clone)]
pub struct OpenAIConnector {
    url: String,
    api_key: String,
}

impl OpenAIConnector {
    /// Create a connector. Fails when no API key is configured.
    pub fn new(config: &RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        Ok(Self {
            url: realtime_url(config),
            api_key: config.api_key.clone(),
        })
    }

    /// The endpoint sessions are opened against.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_request(&self) -> RealtimeResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        Ok(request)
    }
}

#[async_trait]
impl UpstreamConnector for OpenAIConnector {
    async fn connect(&self) -> RealtimeResult<UpstreamSession> {
        let request = self.build_request()?;

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_handshake_error)?;

        let id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %id, "Connected to OpenAI Realtime API");

        let (session, peer) = UpstreamSession::pair(id);
        tokio::spawn(pump(socket, peer));

        Ok(session)
    }
}

fn map_handshake_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!("HTTP {}", response.status()))
        }
        tungstenite::Error::Http(response) => {
            RealtimeError::ProviderError(format!("HTTP {}", response.status()))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

// =============================================================================
// Socket Pump
// =============================================================================

/// Move frames between the socket and the session channels until either side ends.
async fn pump(socket: UpstreamSocket, peer: UpstreamPeer) {
    let UpstreamPeer {
        session_id: id,
        events,
        mut commands,
        ready,
    } = peer;
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut dropped: u64 = 0;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(event) = command else {
                    // Session handle dropped: close the socket.
                    debug!(session_id = %id, "Session released, closing upstream socket");
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                };

                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(session_id = %id, "Failed to serialize {}: {}", event.event_type(), e);
                        continue;
                    }
                };

                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    warn!(session_id = %id, "Failed to send upstream message: {}", e);
                    break;
                }
            }

            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => match events.try_send(event) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    dropped += 1;
                                    if dropped == 1 || dropped % 100 == 0 {
                                        warn!(session_id = %id, dropped, "Inbound buffer full, dropping server event");
                                    }
                                }
                                Err(TrySendError::Closed(_)) => break,
                            },
                            Err(e) => {
                                warn!(session_id = %id, "Failed to parse server event: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            warn!(session_id = %id, "Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(session_id = %id, ?frame, "Upstream socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = %id, "Upstream socket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    ready.send_replace(ReadyState::Closed);
}

// =============================================================================
// Tests
// =============================================================================
