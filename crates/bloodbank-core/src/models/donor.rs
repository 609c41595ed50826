//! Donor models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::blood_group::BloodGroup;

/// A registered donor.
///
/// Eligibility is not stored here; it is always derived from `last_donation_date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Donor {
    pub id: String,
    pub name: String,
    pub blood_group: BloodGroup,
    /// Address used by the notification transport
    pub contact: Option<String>,
    pub active: bool,
    pub last_donation_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donor {
    pub fn new(name: String, blood_group: BloodGroup, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            blood_group,
            contact: None,
            active: true,
            last_donation_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Where notifications should be sent; falls back to the donor id.
    pub fn recipient(&self) -> &str {
        self.contact.as_deref().unwrap_or(&self.id)
    }
}

/// One entry of a donor's append-only donation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DonationRecord {
    pub id: String,
    pub donor_id: String,
    pub appointment_id: Option<String>,
    /// Request the donation was booked against, if any
    pub request_id: Option<String>,
    /// Batch the units were deposited into
    pub batch_id: String,
    pub units: u32,
    pub donated_on: NaiveDate,
    pub location: String,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
