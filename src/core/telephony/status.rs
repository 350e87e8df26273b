//! Call status callbacks from the telephony provider.

use crate::core::reminder::ReminderCallStatus;

/// `CallStatus` values the provider posts to the status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
    Other(String),
}

impl CallStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => CallStatus::Queued,
            "initiated" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "in-progress" => CallStatus::InProgress,
            "completed" => CallStatus::Completed,
            "busy" => CallStatus::Busy,
            "failed" => CallStatus::Failed,
            "no-answer" => CallStatus::NoAnswer,
            "canceled" => CallStatus::Canceled,
            other => CallStatus::Other(other.to_string()),
        }
    }

    /// Whether the call is over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::Failed
                | CallStatus::NoAnswer
                | CallStatus::Canceled
        )
    }

    /// Outcome reported to the reminder service; `None` for statuses it ignores.
    pub fn reminder_status(&self) -> Option<ReminderCallStatus> {
        match self {
            CallStatus::Completed => Some(ReminderCallStatus::Completed),
            CallStatus::Busy | CallStatus::Failed | CallStatus::NoAnswer | CallStatus::Canceled => {
                Some(ReminderCallStatus::Failed)
            }
            _ => None,
        }
    }
}
