//! Event loop driving one relay.

use std::future::pending;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::session::{CloseReason, Flow, RelayContext, RelaySession};
use crate::core::realtime::{ServerEvent, UpstreamSession};
use crate::core::telephony::TelephonyLink;

/// Next upstream event, or pending forever once the session is gone.
async fn recv_upstream(upstream: &mut Option<UpstreamSession>) -> Option<ServerEvent> {
    match upstream {
        Some(session) => session.recv().await,
        None => pending().await,
    }
}

/// Pump both legs until one side ends or `cancel` fires, then close.
pub async fn run_relay(mut relay: RelaySession, cancel: CancellationToken) -> CloseReason {
    let reason = loop {
        let flow = tokio::select! {
            biased;

            _ = cancel.cancelled() => Ok(Flow::Close(CloseReason::Cancelled)),

            frame = relay.telephony.recv() => match frame {
                Some(event) => relay.handle_telephony(event).await,
                None => Ok(Flow::Close(CloseReason::TelephonyClosed)),
            },

            event = recv_upstream(&mut relay.upstream) => match event {
                Some(event) => relay.handle_upstream(event).await,
                None => Ok(Flow::Close(CloseReason::UpstreamClosed)),
            },
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close(reason)) => break reason,
            Err(e) => {
                warn!(call_id = ?relay.call_id(), error = %e, "Relay leg failed");
                break e.close_reason();
            }
        }
    };

    relay.close(reason).await;
    reason
}

/// Serve one accepted media-stream connection.
///
/// Takes an upstream session from the pool and relays until the call ends.
/// If no upstream session can be obtained the telephony socket is closed.
pub async fn serve_media_stream(link: TelephonyLink, ctx: RelayContext) {
    let upstream = match ctx.pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "No upstream session available, closing media stream");
            link.close().await;
            return;
        }
    };
    info!(upstream_session = %upstream.id(), "Media stream bound to upstream session");

    let relay = RelaySession::new(link, upstream, ctx);
    let cancel = relay.cancel_token();
    run_relay(relay, cancel).await;
}
