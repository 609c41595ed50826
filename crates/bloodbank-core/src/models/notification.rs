//! Outreach notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bloodbank_notify::{NotificationKind, ResponseAction};

/// Stored notification status. Expiry is never written back; see
/// [`Notification::effective_status`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Read,
    Responded,
    Expired,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Read => "read",
            NotificationStatus::Responded => "responded",
            NotificationStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "sent" => Some(NotificationStatus::Sent),
            "read" => Some(NotificationStatus::Read),
            "responded" => Some(NotificationStatus::Responded),
            "expired" => Some(NotificationStatus::Expired),
            _ => None,
        }
    }
}

/// A notification sent to a donor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub donor_id: String,
    pub request_id: Option<String>,
    pub appointment_id: Option<String>,
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub response_action: Option<ResponseAction>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Transport message id from the dispatch acknowledgment
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    /// Status as seen at `now`: unanswered notifications past their deadline are expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> NotificationStatus {
        match self.status {
            NotificationStatus::Pending | NotificationStatus::Sent | NotificationStatus::Read
                if now >= self.expires_at =>
            {
                NotificationStatus::Expired
            }
            status => status,
        }
    }

    /// Still awaiting a response.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.effective_status(now),
            NotificationStatus::Pending | NotificationStatus::Sent | NotificationStatus::Read
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn notification(status: NotificationStatus, expires_in: Duration) -> Notification {
        let now = Utc::now();
        Notification {
            id: "n1".into(),
            donor_id: "d1".into(),
            request_id: Some("r1".into()),
            appointment_id: None,
            kind: NotificationKind::DonationOutreach,
            status,
            response_action: None,
            responded_at: None,
            message_id: None,
            created_at: now,
            sent_at: Some(now),
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn test_lazy_expiry() {
        let n = notification(NotificationStatus::Sent, Duration::hours(1));
        assert!(n.is_active(n.created_at));
        assert_eq!(
            n.effective_status(n.expires_at),
            NotificationStatus::Expired
        );
        assert!(!n.is_active(n.expires_at + Duration::minutes(1)));
    }

    #[test]
    fn test_responded_never_expires() {
        let n = notification(NotificationStatus::Responded, Duration::hours(1));
        assert_eq!(
            n.effective_status(n.expires_at + Duration::days(3)),
            NotificationStatus::Responded
        );
        assert!(!n.is_active(n.created_at));
    }
}
