//! Duplex link to one telephony media stream.
//!
//! [`TelephonyLink::from_socket`] splits an upgraded WebSocket into a reader
//! task (text frames decoded to [`TelephonyEvent`]) and a writer task
//! (fed by [`TelephonyRoute`]s). The relay only ever sees the two channel
//! ends, so it can be driven in tests through [`TelephonyLink::pair`].

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{TelephonyEvent, TelephonyOutgoing};

/// Channel buffer between the socket tasks and the relay.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Errors sending on a telephony link.
#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("Telephony link closed")]
    Closed,
}

/// Work items for the writer task.
#[derive(Debug)]
pub enum TelephonyRoute {
    /// Serialize and send one frame
    Outgoing(TelephonyOutgoing),
    /// Send a close frame and stop
    Close,
}

/// The relay's handle on a media stream.
#[derive(Debug)]
pub struct TelephonyLink {
    outbound: mpsc::Sender<TelephonyRoute>,
    inbound: mpsc::Receiver<TelephonyEvent>,
}

/// The far side of a [`TelephonyLink::pair`], playing the provider in tests.
#[derive(Debug)]
pub struct TelephonyPeer {
    /// Frames the relay will receive
    pub frames: mpsc::Sender<TelephonyEvent>,
    /// Frames and close requests the relay sent
    pub routes: mpsc::Receiver<TelephonyRoute>,
}

impl TelephonyLink {
    /// Wrap an upgraded media-stream socket.
    pub fn from_socket(socket: WebSocket) -> TelephonyLink {
        let (mut sender, mut receiver) = socket.split();
        let (route_tx, mut route_rx) = mpsc::channel::<TelephonyRoute>(CHANNEL_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel::<TelephonyEvent>(CHANNEL_BUFFER_SIZE);
        let done = CancellationToken::new();

        // Writer: runs until the relay closes or drops the link
        let writer_done = done.clone();
        tokio::spawn(async move {
            while let Some(route) = route_rx.recv().await {
                let result = match route {
                    TelephonyRoute::Outgoing(frame) => match serde_json::to_string(&frame) {
                        Ok(json) => sender.send(Message::Text(json.into())).await,
                        Err(e) => {
                            warn!("Failed to serialize telephony frame: {}", e);
                            continue;
                        }
                    },
                    TelephonyRoute::Close => {
                        debug!("Closing media-stream socket");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                };

                if let Err(e) = result {
                    warn!("Failed to send telephony frame: {}", e);
                    break;
                }
            }
            writer_done.cancel();
        });

        // Reader: decodes frames until the socket ends or the writer stops
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    msg = receiver.next() => match msg {
                        Some(Ok(Message::Text(text))) => match TelephonyEvent::parse(&text) {
                            Ok(event) => {
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Dropping malformed telephony frame: {}", e),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Media-stream socket closed by provider");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Media-stream socket error: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        TelephonyLink {
            outbound: route_tx,
            inbound: event_rx,
        }
    }

    /// An in-memory link and its provider-side peer.
    pub fn pair() -> (TelephonyLink, TelephonyPeer) {
        let (route_tx, route_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        (
            TelephonyLink {
                outbound: route_tx,
                inbound: event_rx,
            },
            TelephonyPeer {
                frames: event_tx,
                routes: route_rx,
            },
        )
    }

    /// Queue one outbound frame.
    pub async fn send(&self, frame: TelephonyOutgoing) -> Result<(), TelephonyError> {
        self.outbound
            .send(TelephonyRoute::Outgoing(frame))
            .await
            .map_err(|_| TelephonyError::Closed)
    }

    /// Next inbound frame. `None` once the provider side is gone.
    pub async fn recv(&mut self) -> Option<TelephonyEvent> {
        self.inbound.recv().await
    }

    /// Ask the writer to close the socket. Idempotent.
    pub async fn close(&self) {
        let _ = self.outbound.send(TelephonyRoute::Close).await;
    }
}
