//! Appointment scheduler: donor visits from booking to donation.
//!
//! ```text
//! scheduled ──▶ confirmed ──▶ in_progress ──▶ completed
//!     └─────────────┴──────────────┴──────▶ no_show | cancelled
//! ```
//!
//! Completing a visit is the one event that produces a donation. Its effects (appointment
//! closed, donor history updated, units deposited, request re-evaluated) commit together
//! or not at all. Donor messages go out after the commit.

use bloodbank_notify::{
    appointment_cancelled_message, appointment_scheduled_message, AppointmentDetails,
    NotificationDispatcher, NotificationPayload,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::db::Database;
use crate::eligibility::{DonorEligibilityTracker, EligibilityStatus};
use crate::error::{require_admin, require_text, CoreError, CoreResult};
use crate::ledger::InventoryLedger;
use crate::lifecycle::{Attribution, RequestLifecycleManager};
use crate::models::{
    Actor, Appointment, AppointmentSlot, AppointmentStatus, DonationRecord, Deposit, Donor,
    InventoryBatch, Notification, NotificationKind, NotificationStatus, OpContext, RequestStatus,
    ResponseAction,
};

const ENTITY: &str = "Appointment";

/// Input for a manually booked visit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub donor_id: String,
    pub slot: AppointmentSlot,
    /// Request the visit should replenish
    pub request_id: Option<String>,
    pub admin_notes: Option<String>,
}

/// What was collected at a visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DonationInput {
    pub units: u32,
    /// Overrides the appointment location (or the default desk for direct donations)
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// How to treat a donor who fails eligibility when recording a walk-in donation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityOverride {
    /// Refuse to record the donation
    Refuse,
    /// A clinician cleared the donor; record it with a warning
    MedicalClearance,
}

/// Everything a recorded donation produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DonationOutcome {
    pub appointment: Option<Appointment>,
    pub donation: DonationRecord,
    /// The batch the units landed in, after any attribution to a request
    pub batch: InventoryBatch,
    pub attribution: Option<Attribution>,
    /// Set when the donor was recorded despite failing eligibility
    pub eligibility_warning: Option<String>,
}

/// Appointment scheduler.
pub struct AppointmentScheduler<'a> {
    db: &'a Database,
    config: &'a CoreConfig,
    dispatcher: &'a dyn NotificationDispatcher,
    ledger: InventoryLedger<'a>,
    eligibility: DonorEligibilityTracker<'a>,
    lifecycle: RequestLifecycleManager<'a>,
}

impl<'a> AppointmentScheduler<'a> {
    pub fn new(
        db: &'a Database,
        config: &'a CoreConfig,
        dispatcher: &'a dyn NotificationDispatcher,
    ) -> Self {
        Self {
            db,
            config,
            dispatcher,
            ledger: InventoryLedger::new(db, config),
            eligibility: DonorEligibilityTracker::new(db, config),
            lifecycle: RequestLifecycleManager::new(db, config),
        }
    }

    /// Book a visit by hand.
    ///
    /// The donor must be active with no open appointment. A cooldown that has not yet
    /// elapsed is only a warning here; the admin booking the visit decides.
    #[tracing::instrument(skip(self, ctx))]
    pub fn schedule(&self, ctx: &OpContext, input: NewAppointment) -> CoreResult<Appointment> {
        require_admin(ctx, "schedule appointments")?;
        let slot = self.validate_slot(ctx, input.slot)?;

        let (appointment, donor) = self.db.atomic(|| {
            let donor = self.eligibility.get_donor(&input.donor_id)?;
            let status = self.eligibility.status_of(&donor, ctx.today())?;
            require_available(&donor, &status)?;
            if !status.is_eligible {
                warn!(
                    donor_id = %donor.id,
                    days_until_eligible = status.days_until_eligible,
                    "scheduling donor inside cooldown"
                );
            }
            if let Some(request_id) = &input.request_id {
                self.check_request_open(request_id, &donor)?;
            }

            let appointment = self.new_appointment(
                ctx,
                &donor,
                slot,
                input.request_id.clone(),
                None,
                input.admin_notes.clone(),
            );
            self.db.insert_appointment(&appointment)?;
            Ok::<_, CoreError>((appointment, donor))
        })?;

        info!(appointment_id = %appointment.id, donor_id = %donor.id, "appointment scheduled");
        self.notify_donor(ctx, &donor, &appointment, None);
        Ok(appointment)
    }

    /// Turn an accepted outreach response into an appointment.
    ///
    /// The automated path: an ineligible or unavailable donor is refused outright.
    #[tracing::instrument(skip(self, ctx))]
    pub fn schedule_from_response(
        &self,
        ctx: &OpContext,
        notification_id: &str,
        slot: AppointmentSlot,
    ) -> CoreResult<Appointment> {
        let slot = self.validate_slot(ctx, slot)?;

        let (appointment, donor) = self.db.atomic(|| {
            let mut notification = self
                .db
                .get_notification(notification_id)?
                .ok_or_else(|| CoreError::not_found("Notification", notification_id))?;
            if !ctx.actor.is_admin() && ctx.actor != Actor::Donor(notification.donor_id.clone()) {
                return Err(CoreError::Unauthorized(format!(
                    "{} may not book from another donor's response",
                    ctx.actor.label()
                )));
            }
            if notification.kind != NotificationKind::DonationOutreach
                || notification.status != NotificationStatus::Responded
                || notification.response_action != Some(ResponseAction::Accept)
                || notification.appointment_id.is_some()
            {
                return Err(CoreError::stale(
                    "Notification",
                    notification_id,
                    "accepted and unbooked",
                    notification.effective_status(ctx.now).as_str(),
                ));
            }

            let donor = self.eligibility.get_donor(&notification.donor_id)?;
            let status = self.eligibility.status_of(&donor, ctx.today())?;
            require_available(&donor, &status)?;
            if let Some(reason) = status.blocking_reason() {
                return Err(CoreError::IneligibleDonor {
                    donor_id: donor.id.clone(),
                    days_until_eligible: status.days_until_eligible,
                    reason,
                });
            }
            if let Some(request_id) = &notification.request_id {
                self.check_request_open(request_id, &donor)?;
            }

            let appointment = self.new_appointment(
                ctx,
                &donor,
                slot,
                notification.request_id.clone(),
                Some(notification.id.clone()),
                None,
            );
            self.db.insert_appointment(&appointment)?;

            notification.appointment_id = Some(appointment.id.clone());
            if !self
                .db
                .update_notification_cas(&notification, NotificationStatus::Responded)?
            {
                return Err(CoreError::concurrent("Notification", notification_id));
            }
            Ok((appointment, donor))
        })?;

        info!(
            appointment_id = %appointment.id,
            donor_id = %donor.id,
            notification_id,
            "appointment booked from outreach response"
        );
        self.notify_donor(ctx, &donor, &appointment, None);
        Ok(appointment)
    }

    /// Donor or admin confirms the visit.
    pub fn confirm(&self, ctx: &OpContext, appointment_id: &str) -> CoreResult<Appointment> {
        self.transition(ctx, appointment_id, AppointmentStatus::Confirmed, true, |_| {})
    }

    /// Donor arrived; collection under way.
    pub fn start(&self, ctx: &OpContext, appointment_id: &str) -> CoreResult<Appointment> {
        require_admin(ctx, "start appointments")?;
        self.transition(ctx, appointment_id, AppointmentStatus::InProgress, false, |_| {})
    }

    pub fn mark_no_show(
        &self,
        ctx: &OpContext,
        appointment_id: &str,
        note: Option<String>,
    ) -> CoreResult<Appointment> {
        require_admin(ctx, "mark appointments as no-show")?;
        self.transition(ctx, appointment_id, AppointmentStatus::NoShow, false, |appt| {
            if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
                appt.admin_notes = Some(note);
            }
        })
    }

    /// Call off a visit. Allowed to the donor and admins; the reason is mandatory.
    pub fn cancel(&self, ctx: &OpContext, appointment_id: &str, reason: &str) -> CoreResult<Appointment> {
        let reason = require_text("cancellation reason", reason)?;
        let appointment = self.transition(
            ctx,
            appointment_id,
            AppointmentStatus::Cancelled,
            true,
            |appt| appt.cancellation_reason = Some(reason.clone()),
        )?;

        match self.db.get_donor(&appointment.donor_id) {
            Ok(Some(donor)) => self.notify_donor(ctx, &donor, &appointment, Some(&reason)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not load donor for cancellation notice"),
        }
        Ok(appointment)
    }

    /// Record the donation collected at a visit.
    ///
    /// Closes the appointment, updates the donor's history, deposits the units and, when
    /// the visit was booked for a request, credits the request. All of it commits in one
    /// transaction.
    #[tracing::instrument(skip(self, ctx))]
    pub fn complete_donation(
        &self,
        ctx: &OpContext,
        appointment_id: &str,
        input: DonationInput,
    ) -> CoreResult<DonationOutcome> {
        require_admin(ctx, "record donations")?;
        self.validate_units(input.units)?;

        let outcome = self.db.atomic(|| {
            let mut appointment = self.load(appointment_id)?;
            let (status, version) = (appointment.status, appointment.version);
            if !status.can_transition_to(AppointmentStatus::Completed) {
                return Err(CoreError::stale(
                    ENTITY,
                    appointment_id,
                    "scheduled, confirmed or in progress",
                    status.as_str(),
                ));
            }

            let mut donor = self.eligibility.get_donor(&appointment.donor_id)?;
            let eligibility = self.eligibility.status_of(&donor, ctx.today())?;
            let eligibility_warning = eligibility.blocking_reason();
            if let Some(reason) = &eligibility_warning {
                warn!(donor_id = %donor.id, reason = %reason, "completing donation for ineligible donor");
            }

            let location = input
                .location
                .clone()
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| appointment.location.clone());

            appointment.status = AppointmentStatus::Completed;
            appointment.units_collected = Some(input.units);
            appointment.completed_at = Some(ctx.now);
            appointment.location = location.clone();
            if input.notes.is_some() {
                appointment.admin_notes = input.notes.clone();
            }
            self.persist(ctx, &mut appointment, status, version)?;

            let (donation, batch) = self.record_donation(
                ctx,
                &mut donor,
                Some(&appointment),
                &input,
                location,
            )?;

            let attribution = match &appointment.request_id {
                Some(request_id) => {
                    self.lifecycle
                        .reevaluate_fulfillment(ctx, request_id, &batch.id, input.units)?
                }
                None => None,
            };
            let batch = self
                .db
                .get_batch(&batch.id)?
                .ok_or_else(|| CoreError::not_found("InventoryBatch", &batch.id))?;

            Ok(DonationOutcome {
                appointment: Some(appointment),
                donation,
                batch,
                attribution,
                eligibility_warning,
            })
        })?;

        info!(
            appointment_id,
            units = input.units,
            attributed = outcome.attribution.as_ref().map(|a| a.units_attributed).unwrap_or(0),
            "donation completed"
        );
        Ok(outcome)
    }

    /// Record a walk-in donation with no appointment.
    ///
    /// A donor failing eligibility is refused unless `clearance` is
    /// [`EligibilityOverride::MedicalClearance`], in which case the donation is recorded
    /// and the outcome carries the warning.
    #[tracing::instrument(skip(self, ctx))]
    pub fn record_direct_donation(
        &self,
        ctx: &OpContext,
        donor_id: &str,
        input: DonationInput,
        clearance: EligibilityOverride,
    ) -> CoreResult<DonationOutcome> {
        require_admin(ctx, "record donations")?;
        self.validate_units(input.units)?;

        self.db.atomic(|| {
            let mut donor = self.eligibility.get_donor(donor_id)?;
            let status: EligibilityStatus = self.eligibility.status_of(&donor, ctx.today())?;
            let eligibility_warning = status.blocking_reason();
            if let Some(reason) = &eligibility_warning {
                if clearance == EligibilityOverride::Refuse {
                    return Err(CoreError::IneligibleDonor {
                        donor_id: donor.id.clone(),
                        days_until_eligible: status.days_until_eligible,
                        reason: reason.clone(),
                    });
                }
                warn!(donor_id, reason = %reason, "donation recorded under medical clearance");
            }

            let location = input
                .location
                .clone()
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| self.config.default_collection_location.clone());
            let (donation, batch) = self.record_donation(ctx, &mut donor, None, &input, location)?;

            info!(donor_id, units = input.units, batch_id = %batch.id, "direct donation recorded");
            Ok(DonationOutcome {
                appointment: None,
                donation,
                batch,
                attribution: None,
                eligibility_warning,
            })
        })
    }

    pub fn get(&self, appointment_id: &str) -> CoreResult<Appointment> {
        self.load(appointment_id)
    }

    pub fn list_for_donor(&self, donor_id: &str) -> CoreResult<Vec<Appointment>> {
        Ok(self.db.list_appointments_for_donor(donor_id)?)
    }

    pub fn list_for_request(&self, request_id: &str) -> CoreResult<Vec<Appointment>> {
        Ok(self.db.list_appointments_for_request(request_id)?)
    }

    /// Open appointments from today on.
    pub fn upcoming(&self, ctx: &OpContext) -> CoreResult<Vec<Appointment>> {
        Ok(self.db.list_upcoming_appointments(ctx.today())?)
    }

    /// Deposit, donor history and donation record shared by both donation paths.
    fn record_donation(
        &self,
        ctx: &OpContext,
        donor: &mut Donor,
        appointment: Option<&Appointment>,
        input: &DonationInput,
        location: String,
    ) -> CoreResult<(DonationRecord, InventoryBatch)> {
        let batch = self.ledger.deposit(
            ctx,
            Deposit {
                blood_group: donor.blood_group,
                units: input.units,
                collection_date: ctx.today(),
                location: location.clone(),
                source_donor_id: Some(donor.id.clone()),
            },
        )?;

        donor.last_donation_date = Some(ctx.today());
        donor.updated_at = ctx.now;
        if !self.db.update_donor(donor)? {
            return Err(CoreError::not_found("Donor", &donor.id));
        }

        let donation = DonationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            donor_id: donor.id.clone(),
            appointment_id: appointment.map(|a| a.id.clone()),
            request_id: appointment.and_then(|a| a.request_id.clone()),
            batch_id: batch.id.clone(),
            units: input.units,
            donated_on: ctx.today(),
            location,
            notes: input.notes.clone(),
            recorded_at: ctx.now,
        };
        self.db.insert_donation(&donation)?;
        Ok((donation, batch))
    }

    fn transition(
        &self,
        ctx: &OpContext,
        appointment_id: &str,
        to: AppointmentStatus,
        donor_may_act: bool,
        apply: impl FnOnce(&mut Appointment),
    ) -> CoreResult<Appointment> {
        let appointment = self.db.atomic(|| {
            let mut appointment = self.load(appointment_id)?;
            let own_visit = ctx.actor == Actor::Donor(appointment.donor_id.clone());
            if !ctx.actor.is_admin() && !(donor_may_act && own_visit) {
                return Err(CoreError::Unauthorized(format!(
                    "{} may not change this appointment",
                    ctx.actor.label()
                )));
            }

            let (status, version) = (appointment.status, appointment.version);
            if !status.can_transition_to(to) {
                return Err(CoreError::stale(
                    ENTITY,
                    appointment_id,
                    format!("a status that can move to {}", to.as_str()),
                    status.as_str(),
                ));
            }

            appointment.status = to;
            apply(&mut appointment);
            self.persist(ctx, &mut appointment, status, version)?;
            Ok(appointment)
        })?;

        info!(
            appointment_id,
            to = to.as_str(),
            actor = %ctx.actor.label(),
            "appointment transition"
        );
        Ok(appointment)
    }

    fn persist(
        &self,
        ctx: &OpContext,
        appointment: &mut Appointment,
        expected_status: AppointmentStatus,
        expected_version: u32,
    ) -> CoreResult<()> {
        appointment.updated_at = ctx.now;
        if !self
            .db
            .update_appointment_cas(appointment, expected_status, expected_version)?
        {
            return Err(CoreError::concurrent(ENTITY, &appointment.id));
        }
        appointment.version = expected_version + 1;
        Ok(())
    }

    fn load(&self, appointment_id: &str) -> CoreResult<Appointment> {
        self.db
            .get_appointment(appointment_id)?
            .ok_or_else(|| CoreError::not_found(ENTITY, appointment_id))
    }

    fn validate_units(&self, units: u32) -> CoreResult<()> {
        let max = self.config.max_units_per_donation;
        if units == 0 || units > max {
            return Err(CoreError::Validation(format!(
                "Units collected must be between 1 and {max}, got {units}"
            )));
        }
        Ok(())
    }

    fn validate_slot(&self, ctx: &OpContext, slot: AppointmentSlot) -> CoreResult<AppointmentSlot> {
        if slot.date < ctx.today() {
            return Err(CoreError::Validation(format!(
                "Appointment date {} is in the past",
                slot.date
            )));
        }
        Ok(AppointmentSlot {
            location: require_text("location", &slot.location)?,
            ..slot
        })
    }

    /// The request a visit is booked for must still be waiting on donations.
    fn check_request_open(&self, request_id: &str, donor: &Donor) -> CoreResult<()> {
        let request = self.lifecycle.get(request_id)?;
        if request.status != RequestStatus::Pending {
            return Err(CoreError::stale(
                "BloodRequest",
                request_id,
                RequestStatus::Pending.as_str(),
                request.status.as_str(),
            ));
        }
        if request.blood_group != donor.blood_group {
            return Err(CoreError::Validation(format!(
                "Donor is {} but request {request_id} needs {}",
                donor.blood_group, request.blood_group
            )));
        }
        Ok(())
    }

    fn new_appointment(
        &self,
        ctx: &OpContext,
        donor: &Donor,
        slot: AppointmentSlot,
        request_id: Option<String>,
        notification_id: Option<String>,
        admin_notes: Option<String>,
    ) -> Appointment {
        Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            donor_id: donor.id.clone(),
            request_id,
            notification_id,
            scheduled_date: slot.date,
            scheduled_time: slot.time,
            location: slot.location,
            status: AppointmentStatus::Scheduled,
            units_collected: None,
            admin_notes,
            cancellation_reason: None,
            created_by: ctx.actor.label(),
            completed_at: None,
            version: 0,
            created_at: ctx.now,
            updated_at: ctx.now,
        }
    }

    /// Send a booking or cancellation message and record it. Runs after the appointment
    /// change has committed, so failures are logged rather than returned.
    fn notify_donor(
        &self,
        ctx: &OpContext,
        donor: &Donor,
        appointment: &Appointment,
        cancellation_reason: Option<&str>,
    ) {
        let details = AppointmentDetails {
            donor_name: &donor.name,
            appointment_id: &appointment.id,
            date: appointment.scheduled_date,
            time: appointment.scheduled_time,
            location: &appointment.location,
        };
        let payload: NotificationPayload = match cancellation_reason {
            Some(reason) => appointment_cancelled_message(&details, reason),
            None => appointment_scheduled_message(&details),
        };

        let mut notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            donor_id: donor.id.clone(),
            request_id: appointment.request_id.clone(),
            appointment_id: Some(appointment.id.clone()),
            kind: payload.kind,
            status: NotificationStatus::Pending,
            response_action: None,
            responded_at: None,
            message_id: None,
            created_at: ctx.now,
            sent_at: None,
            expires_at: ctx.now + Duration::hours(i64::from(self.config.outreach_ttl_hours)),
        };

        match self.dispatcher.send(donor.recipient(), &payload) {
            Ok(ack) => {
                notification.status = NotificationStatus::Sent;
                notification.message_id = Some(ack.message_id);
                notification.sent_at = Some(ack.accepted_at);
            }
            Err(e) => warn!(
                appointment_id = %appointment.id,
                error = %e,
                "appointment notice not dispatched"
            ),
        }

        if let Err(e) = self.db.insert_notification(&notification) {
            warn!(appointment_id = %appointment.id, error = %e, "could not record appointment notice");
        }
    }
}

fn require_available(donor: &Donor, status: &EligibilityStatus) -> CoreResult<()> {
    if status.is_available {
        return Ok(());
    }
    let reason = if status.is_active {
        "donor already has an open appointment".to_string()
    } else {
        "donor is inactive".to_string()
    };
    Err(CoreError::IneligibleDonor {
        donor_id: donor.id.clone(),
        days_until_eligible: status.days_until_eligible,
        reason,
    })
}
