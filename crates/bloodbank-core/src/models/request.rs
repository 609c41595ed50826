//! Blood request models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::blood_group::{BloodGroup, Urgency};
use super::context::Actor;
use super::inventory::AllocationReceipt;

/// Request status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting an admin decision or donor replenishment
    Pending,
    /// Units set aside, awaiting pickup
    Approved,
    /// Requester confirmed physical handoff
    Collected,
    /// Admin verified the handoff (terminal, success)
    Verified,
    Rejected,
    Cancelled,
    NoShow,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Collected => "collected",
            RequestStatus::Verified => "verified",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "collected" => Some(RequestStatus::Collected),
            "verified" => Some(RequestStatus::Verified),
            "rejected" => Some(RequestStatus::Rejected),
            "cancelled" => Some(RequestStatus::Cancelled),
            "no_show" => Some(RequestStatus::NoShow),
            _ => None,
        }
    }

    /// The full transition table.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (Pending, Approved | Rejected | Cancelled) => true,
            (Approved, Collected | Cancelled | NoShow) => true,
            (Collected, Verified) => true,
            (Pending, _) | (Approved, _) | (Collected, _) => false,
            (Verified | Rejected | Cancelled | NoShow, _) => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Verified
                | RequestStatus::Rejected
                | RequestStatus::Cancelled
                | RequestStatus::NoShow
        )
    }

    /// Whether units may be set aside for a request in this status.
    pub fn holds_inventory(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Approved)
    }
}

/// Who raised a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequesterKind {
    Hospital,
    External,
    Admin,
}

impl RequesterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequesterKind::Hospital => "hospital",
            RequesterKind::External => "external",
            RequesterKind::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hospital" => Some(RequesterKind::Hospital),
            "external" => Some(RequesterKind::External),
            "admin" => Some(RequesterKind::Admin),
            _ => None,
        }
    }
}

/// Requester reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub kind: RequesterKind,
    pub id: String,
}

impl Requester {
    /// Derive the requester from the acting party. Donors cannot raise requests.
    pub fn from_actor(actor: &Actor) -> Option<Self> {
        let kind = match actor {
            Actor::Hospital(_) => RequesterKind::Hospital,
            Actor::External(_) => RequesterKind::External,
            Actor::Admin(_) => RequesterKind::Admin,
            Actor::Donor(_) => return None,
        };
        Some(Self {
            kind,
            id: actor.id().to_string(),
        })
    }

    /// Whether `actor` is the party that raised the request.
    pub fn is(&self, actor: &Actor) -> bool {
        Requester::from_actor(actor).as_ref() == Some(self)
    }
}

/// How an approved request got its units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Fulfillment {
    /// Allocated from stock at approval
    Stock,
    /// Completed through the donation pipeline
    Donations,
}

impl Fulfillment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fulfillment::Stock => "stock",
            Fulfillment::Donations => "donations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock" => Some(Fulfillment::Stock),
            "donations" => Some(Fulfillment::Donations),
            _ => None,
        }
    }
}

/// Where and when approved units are to be picked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionPlan {
    pub date: NaiveDate,
    pub location: String,
    pub instructions: Option<String>,
}

/// A pending reschedule request on an approved blood request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleRequest {
    pub requested_date: NaiveDate,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// A blood request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BloodRequest {
    pub id: String,
    pub requester: Requester,
    pub blood_group: BloodGroup,
    /// 1..=10
    pub units_requested: u32,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub patient_name: Option<String>,
    pub notes: Option<String>,
    /// Units attributed through the donation pipeline
    pub units_collected: u32,
    /// Flagged for donor outreach after an approval found too little stock
    pub awaiting_donors: bool,
    /// Every unit currently set aside for this request
    pub allocation: Option<AllocationReceipt>,
    pub fulfillment: Option<Fulfillment>,
    /// Admin who approved or rejected (`None` for donation-driven approval)
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub collection: Option<CollectionPlan>,
    pub collected_at: Option<DateTime<Utc>>,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub reschedule: Option<RescheduleRequest>,
    /// Reason given on cancellation or no-show
    pub closure_reason: Option<String>,
    pub closed_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Bumped on every write; used for compare-and-set
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBloodRequest {
    pub blood_group: BloodGroup,
    pub units_requested: u32,
    pub urgency: Urgency,
    pub patient_name: Option<String>,
    pub notes: Option<String>,
}

impl BloodRequest {
    /// Build a pending request.
    pub fn new(requester: Requester, input: NewBloodRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requester,
            blood_group: input.blood_group,
            units_requested: input.units_requested,
            urgency: input.urgency,
            status: RequestStatus::Pending,
            patient_name: input.patient_name,
            notes: input.notes,
            units_collected: 0,
            awaiting_donors: false,
            allocation: None,
            fulfillment: None,
            decided_by: None,
            decided_at: None,
            rejection_reason: None,
            collection: None,
            collected_at: None,
            verified_by: None,
            verified_at: None,
            reschedule: None,
            closure_reason: None,
            closed_by: None,
            closed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Units still missing before the request is covered.
    pub fn units_outstanding(&self) -> u32 {
        self.units_requested
            .saturating_sub(self.units_collected)
    }

    /// `unitsCollected >= unitsRequested`
    pub fn is_fulfilled(&self) -> bool {
        self.units_collected >= self.units_requested
    }

    /// Units currently set aside in the ledger for this request.
    pub fn allocated_units(&self) -> u32 {
        self.allocation
            .as_ref()
            .map(|r| r.total_units())
            .unwrap_or(0)
    }
}
