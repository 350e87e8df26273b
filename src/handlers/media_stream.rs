//! Telephony media-stream WebSocket.

use std::sync::Arc;

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
    Extension,
};
use tracing::info;

use crate::core::relay::serve_media_stream;
use crate::core::telephony::TelephonyLink;
use crate::middleware::ClientIp;
use crate::state::{AppState, ConnectionGuard};

/// `GET /media-stream`: upgrade and relay the call until it ends.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _slot = client_ip.map(|Extension(ClientIp(ip))| ConnectionGuard::new(state.clone(), ip));
        info!("Media stream connected");

        let link = TelephonyLink::from_socket(socket);
        serve_media_stream(link, state.relay_context()).await;
    })
}
