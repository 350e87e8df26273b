pub mod api;
pub mod telephony;
