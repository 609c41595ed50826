//! Donor appointment models.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Appointment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    NoShow,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "in_progress" => Some(AppointmentStatus::InProgress),
            "completed" => Some(AppointmentStatus::Completed),
            "no_show" => Some(AppointmentStatus::NoShow),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Forward-only; completion is reachable from any open state, and no-show or
    /// cancellation exit from any open state.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, next) {
            (Scheduled, Confirmed) => true,
            (Scheduled | Confirmed, InProgress) => true,
            (Scheduled | Confirmed | InProgress, Completed | NoShow | Cancelled) => true,
            (Scheduled | Confirmed | InProgress, _) => false,
            (Completed | NoShow | Cancelled, _) => false,
        }
    }

    /// Not yet completed, cancelled or missed.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::InProgress
        )
    }
}

/// A scheduled donor visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub donor_id: String,
    /// Request this visit replenishes, if booked through outreach
    pub request_id: Option<String>,
    /// Outreach notification the visit was booked from
    pub notification_id: Option<String>,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub location: String,
    pub status: AppointmentStatus,
    /// Set on completion, 1..=2
    pub units_collected: Option<u32>,
    pub admin_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// When and where a visit takes place.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
}
