//! Reminder integration.
//!
//! The relay passes each completed assistant transcript to a [`ReminderHook`].
//! A recognized [`Directive`] is handed to a [`ReminderBackend`] on a spawned
//! task so the audio path never waits on the reminder service.

mod backend;
mod hook;

pub use backend::{
    CallContext, HttpReminderBackend, LoggingReminderBackend, ReminderBackend,
    ReminderCallStatus, ReminderError, spawn_dispatch, spawn_status_update,
};
pub use hook::{Directive, MarkerReminderHook, NoopReminderHook, ReminderHook};
