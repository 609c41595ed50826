//! Message templates for donor notifications.
//!
//! Templates take plain strings so the transport crate stays independent of the core's
//! domain types.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::dispatch::{NotificationKind, NotificationPayload};

/// Footer appended to every outreach message.
pub const REPLY_INSTRUCTIONS: &str =
    "Reply YES to accept and we will book a donation slot for you, or NO to decline.";

/// Details for a donation outreach message.
#[derive(Debug, Clone)]
pub struct OutreachDetails<'a> {
    pub donor_name: &'a str,
    pub blood_group: &'a str,
    pub units_needed: u32,
    pub urgency: &'a str,
    pub request_id: &'a str,
    pub respond_by: DateTime<Utc>,
}

/// Details for appointment messages.
#[derive(Debug, Clone)]
pub struct AppointmentDetails<'a> {
    pub donor_name: &'a str,
    pub appointment_id: &'a str,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: &'a str,
}

/// Build the outreach message asking a donor to help cover a shortfall.
pub fn outreach_message(details: &OutreachDetails<'_>) -> NotificationPayload {
    let subject = match details.urgency {
        "critical" | "high" => format!("Urgent: {} blood needed", details.blood_group),
        _ => format!("{} donors needed", details.blood_group),
    };

    let body = format!(
        "Hello {},\n\nA patient needs {} unit{} of {} blood and your blood group is a match. \
         Please let us know by {} whether you can donate.\n\n{}",
        details.donor_name,
        details.units_needed,
        if details.units_needed == 1 { "" } else { "s" },
        details.blood_group,
        details.respond_by.format("%Y-%m-%d %H:%M UTC"),
        REPLY_INSTRUCTIONS,
    );

    NotificationPayload {
        kind: NotificationKind::DonationOutreach,
        subject,
        body,
        reference: Some(details.request_id.to_string()),
    }
}

/// Build the confirmation sent when a visit is booked.
pub fn appointment_scheduled_message(details: &AppointmentDetails<'_>) -> NotificationPayload {
    NotificationPayload {
        kind: NotificationKind::AppointmentScheduled,
        subject: format!("Donation appointment on {}", details.date.format("%Y-%m-%d")),
        body: format!(
            "Hello {},\n\nYour donation appointment is booked for {} at {} ({}). \
             Please eat a meal and drink water beforehand, and bring photo ID.",
            details.donor_name,
            details.date.format("%A %d %B %Y"),
            details.time.format("%H:%M"),
            details.location,
        ),
        reference: Some(details.appointment_id.to_string()),
    }
}

/// Build the notice sent when a booked visit is cancelled.
pub fn appointment_cancelled_message(
    details: &AppointmentDetails<'_>,
    reason: &str,
) -> NotificationPayload {
    NotificationPayload {
        kind: NotificationKind::AppointmentCancelled,
        subject: "Donation appointment cancelled".to_string(),
        body: format!(
            "Hello {},\n\nYour appointment on {} at {} has been cancelled: {}",
            details.donor_name,
            details.date.format("%Y-%m-%d"),
            details.time.format("%H:%M"),
            reason,
        ),
        reference: Some(details.appointment_id.to_string()),
    }
}
