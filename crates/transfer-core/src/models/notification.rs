use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Notification templates the upload lifecycle can send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    /// "Thank you" to the submitting user.
    SubmissionReceived,
    SubmissionReceivedAdmin,
    /// "Your submission did not go through" to the submitting user.
    SubmissionFailed,
    SubmissionFailedAdmin,
    /// Reminder that a draft's upload session is about to expire.
    SessionExpiring,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTemplate::SubmissionReceived => "submission_received",
            NotificationTemplate::SubmissionReceivedAdmin => "submission_received_admin",
            NotificationTemplate::SubmissionFailed => "submission_failed",
            NotificationTemplate::SubmissionFailedAdmin => "submission_failed_admin",
            NotificationTemplate::SessionExpiring => "session_expiring",
        }
    }
}

impl Display for NotificationTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
