//! Donor eligibility and the donor registry.
//!
//! Eligibility is never stored. [`evaluate`] derives it from the donor's last donation
//! date, the cooldown policy and whether an appointment is already open.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::{require_admin, require_text, CoreError, CoreResult};
use crate::models::{Actor, BloodGroup, DonationRecord, Donor, OpContext};

/// Snapshot of a donor's eligibility on a given day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EligibilityStatus {
    /// Cooldown has elapsed (or the donor never donated)
    pub is_eligible: bool,
    pub days_until_eligible: u32,
    pub is_active: bool,
    /// Active, with no open appointment
    pub is_available: bool,
    pub next_eligible_date: Option<NaiveDate>,
}

impl EligibilityStatus {
    /// Eligible, active and available: the bar for automated outreach.
    pub fn can_be_contacted(&self) -> bool {
        self.is_eligible && self.is_available
    }

    /// Human-readable reason the donor cannot donate right now, if any.
    pub fn blocking_reason(&self) -> Option<String> {
        if !self.is_active {
            Some("donor is inactive".to_string())
        } else if !self.is_eligible {
            Some(format!(
                "cooldown has {} day(s) remaining",
                self.days_until_eligible
            ))
        } else {
            None
        }
    }
}

/// Pure eligibility computation.
pub fn evaluate(
    donor: &Donor,
    today: NaiveDate,
    cooldown_days: u32,
    has_open_appointment: bool,
) -> EligibilityStatus {
    let cooldown = i64::from(cooldown_days);
    let (is_eligible, days_until_eligible, next_eligible_date) = match donor.last_donation_date {
        None => (true, 0, None),
        Some(last) => {
            let days_since = (today - last).num_days();
            let remaining = (cooldown - days_since).max(0);
            (
                remaining == 0,
                u32::try_from(remaining).unwrap_or(u32::MAX),
                last.checked_add_signed(Duration::days(cooldown)),
            )
        }
    };

    EligibilityStatus {
        is_eligible,
        days_until_eligible,
        is_active: donor.active,
        is_available: donor.active && !has_open_appointment,
        next_eligible_date,
    }
}

/// Input for registering a donor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDonor {
    pub name: String,
    pub blood_group: BloodGroup,
    pub contact: Option<String>,
    /// Prior donation carried over from paper records
    pub last_donation_date: Option<NaiveDate>,
}

/// Donor registry and eligibility queries.
pub struct DonorEligibilityTracker<'a> {
    db: &'a Database,
    config: &'a CoreConfig,
}

impl<'a> DonorEligibilityTracker<'a> {
    pub fn new(db: &'a Database, config: &'a CoreConfig) -> Self {
        Self { db, config }
    }

    /// Eligibility of a stored donor as of `today`.
    pub fn check(&self, donor_id: &str, today: NaiveDate) -> CoreResult<EligibilityStatus> {
        let donor = self.get_donor(donor_id)?;
        self.status_of(&donor, today)
    }

    pub(crate) fn status_of(&self, donor: &Donor, today: NaiveDate) -> CoreResult<EligibilityStatus> {
        let has_open = self.db.open_appointment_for_donor(&donor.id)?.is_some();
        Ok(evaluate(
            donor,
            today,
            self.config.donation_cooldown_days,
            has_open,
        ))
    }

    /// Create a donor profile.
    ///
    /// A donor registering themselves keeps their actor id as the donor id, so their
    /// later responses can be matched to them.
    #[tracing::instrument(skip(self, ctx, input), fields(blood_group = %input.blood_group))]
    pub fn register_donor(&self, ctx: &OpContext, input: NewDonor) -> CoreResult<Donor> {
        let name = require_text("name", &input.name)?;
        if let Some(last) = input.last_donation_date {
            if last > ctx.today() {
                return Err(CoreError::Validation(format!(
                    "Last donation date {last} is in the future"
                )));
            }
        }

        let mut donor = Donor::new(name, input.blood_group, ctx.now);
        match &ctx.actor {
            Actor::Admin(_) => {}
            Actor::Donor(id) => donor.id = id.clone(),
            other => {
                return Err(CoreError::Unauthorized(format!(
                    "{} may not register donors",
                    other.label()
                )))
            }
        }
        donor.contact = input
            .contact
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        donor.last_donation_date = input.last_donation_date;

        self.db.insert_donor(&donor)?;
        info!(donor_id = %donor.id, "donor registered");
        Ok(donor)
    }

    /// Activate or deactivate a donor. Allowed to admins and the donor themself.
    pub fn set_active(&self, ctx: &OpContext, donor_id: &str, active: bool) -> CoreResult<Donor> {
        if !ctx.actor.is_admin() && ctx.actor != Actor::Donor(donor_id.to_string()) {
            require_admin(ctx, "change another donor's status")?;
        }

        self.db.atomic(|| {
            let mut donor = self.get_donor(donor_id)?;
            donor.active = active;
            donor.updated_at = ctx.now;
            if !self.db.update_donor(&donor)? {
                return Err(CoreError::not_found("Donor", donor_id));
            }
            info!(donor_id, active, "donor status changed");
            Ok(donor)
        })
    }

    pub fn get_donor(&self, donor_id: &str) -> CoreResult<Donor> {
        self.db
            .get_donor(donor_id)?
            .ok_or_else(|| CoreError::not_found("Donor", donor_id))
    }

    /// Append-only donation history, oldest first.
    pub fn donation_history(&self, donor_id: &str) -> CoreResult<Vec<DonationRecord>> {
        self.get_donor(donor_id)?;
        Ok(self.db.list_donations_for_donor(donor_id)?)
    }

    /// Donors of `blood_group` who may be contacted today, longest-rested first.
    pub fn eligible_donors(
        &self,
        blood_group: BloodGroup,
        today: NaiveDate,
    ) -> CoreResult<Vec<(Donor, EligibilityStatus)>> {
        let mut eligible = Vec::new();
        for donor in self.db.list_active_donors_by_group(blood_group)? {
            let status = self.status_of(&donor, today)?;
            if status.can_be_contacted() {
                eligible.push((donor, status));
            }
        }
        Ok(eligible)
    }
}
