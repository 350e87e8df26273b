//! Telephony side of the relay: media-stream frames, the socket link, the
//! call-connect markup and status callback mapping.

mod link;
mod messages;
pub mod status;
pub mod twiml;

pub use link::{TelephonyError, TelephonyLink, TelephonyPeer, TelephonyRoute};
pub use messages::{
    CALLER_PARAMETER, MarkPayload, MediaFormat, MediaPayload, OutgoingMedia, StartMetadata,
    TelephonyEvent, TelephonyOutgoing,
};
pub use status::CallStatus;
