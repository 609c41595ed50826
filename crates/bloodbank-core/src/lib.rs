//! Blood Bank Core Library
//!
//! Request lifecycle and inventory allocation core for blood-bank operations, on a
//! local SQLite store.
//!
//! # Architecture
//!
//! ```text
//! Hospital / external / admin
//!        │ create
//!        ▼
//!   BloodRequest (pending) ──approve──▶ InventoryLedger.try_allocate ──ok──▶ approved
//!        │                                      │
//!        │                               insufficient stock
//!        │                                      ▼
//!        │                         flagged: awaiting donors
//!        │                                      │ start_outreach
//!        │                                      ▼
//!        │                   NotificationDispatcher (eligible donors)
//!        │                                      │ record_response (accept)
//!        │                                      ▼
//!        │                  AppointmentScheduler.schedule_from_response
//!        │                                      │ complete_donation
//!        │                      ┌───────────────▼───────────────┐
//!        │                      │  one transaction:             │
//!        │                      │  appointment → completed      │
//!        │                      │  donor history + cooldown     │
//!        │                      │  InventoryLedger.deposit      │
//!        │                      │  request re-evaluated         │
//!        │                      └───────────────┬───────────────┘
//!        │                                      │ units collected ≥ requested
//!        ▼                                      ▼
//!  collected ◀──confirm_collection── approved (collection tomorrow) ──▶ verified
//! ```
//!
//! # Core Principle
//!
//! **A unit of blood is never lost or counted twice.** Units move between batches and
//! request allocations only inside a transaction, and every request transition is a
//! compare-and-set recorded in a hash-chained journal.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence, transactions and the transition journal
//! - [`models`]: Domain types (BloodRequest, InventoryBatch, Donor, Appointment, etc.)
//! - [`ledger`]: FIFO-by-expiry allocation, restore and deposit
//! - [`eligibility`]: Donor cooldown and availability
//! - [`scheduler`]: Appointment lifecycle and donation recording
//! - [`lifecycle`]: Request state machine and donor outreach
//! - [`config`]: Runtime policy
//! - [`error`]: Error taxonomy

pub mod config;
pub mod db;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod scheduler;

// Re-export commonly used types
pub use config::CoreConfig;
pub use db::{ChainVerification, Database, RequestEvent};
pub use eligibility::{DonorEligibilityTracker, EligibilityStatus, NewDonor};
pub use error::{CoreError, CoreResult};
pub use ledger::InventoryLedger;
pub use lifecycle::{Attribution, CollectionDetails, OutreachReport, RequestLifecycleManager};
pub use models::{
    Actor, AllocationReceipt, Appointment, AppointmentSlot, AppointmentStatus, BloodGroup,
    BloodRequest, DonationRecord, Donor, InventoryBatch, NewBloodRequest, Notification,
    OpContext, RequestStatus, Requester, StockLevel, Urgency,
};
pub use scheduler::{
    AppointmentScheduler, DonationInput, DonationOutcome, EligibilityOverride, NewAppointment,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use bloodbank_notify::{OutboundMessage, OutboxDispatcher, ResponseAction};
use chrono::{NaiveDate, NaiveTime};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum BloodBankError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Insufficient inventory: {0}")]
    InsufficientInventory(String),

    #[error("Ineligible donor: {0}")]
    IneligibleDonor(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<CoreError> for BloodBankError {
    fn from(e: CoreError) -> Self {
        let message = e.to_string();
        match e {
            CoreError::Validation(_) => BloodBankError::InvalidInput(message),
            CoreError::StaleState { .. } => BloodBankError::StaleState(message),
            CoreError::InsufficientInventory { .. } => {
                BloodBankError::InsufficientInventory(message)
            }
            CoreError::IneligibleDonor { .. } => BloodBankError::IneligibleDonor(message),
            CoreError::InvalidTransition { .. } => BloodBankError::InvalidTransition(message),
            CoreError::ConcurrentModification { .. } => {
                BloodBankError::ConcurrentModification(message)
            }
            CoreError::NotFound { .. } => BloodBankError::NotFound(message),
            CoreError::Unauthorized(_) => BloodBankError::Unauthorized(message),
            CoreError::Storage(_) => BloodBankError::DatabaseError(message),
        }
    }
}

impl From<db::DbError> for BloodBankError {
    fn from(e: db::DbError) -> Self {
        BloodBankError::DatabaseError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for BloodBankError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        BloodBankError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path with default policy.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<BloodBankCore>, BloodBankError> {
    open_database_with_config(path, CoreConfig::default())
}

/// Open or create a database with policy read from `BLOODBANK_*` environment variables.
#[uniffi::export]
pub fn open_database_from_env(path: String) -> Result<Arc<BloodBankCore>, BloodBankError> {
    let config = CoreConfig::from_lookup(|key| std::env::var(key).ok())?;
    open_database_with_config(path, config)
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<BloodBankCore>, BloodBankError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(BloodBankCore::new(db, CoreConfig::default())))
}

/// Install a `tracing` subscriber writing to stderr, filtered by `filter`
/// (e.g. `"bloodbank_core=debug"`). Has no effect if one is already installed.
#[uniffi::export]
pub fn init_logging(filter: String) -> Result<(), BloodBankError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .map_err(|e| BloodBankError::InvalidInput(format!("log filter {filter:?}: {e}")))?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    // a second call finds the global subscriber already set
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
    Ok(())
}

fn open_database_with_config(
    path: String,
    config: CoreConfig,
) -> Result<Arc<BloodBankCore>, BloodBankError> {
    config.validate()?;
    let db = Database::open_with_config(&path, &config)?;
    Ok(Arc::new(BloodBankCore::new(db, config)))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe facade for FFI.
///
/// Messages produced by outreach and scheduling are queued in an in-process outbox that
/// the host drains with [`BloodBankCore::drain_outbox`] and delivers itself.
#[derive(uniffi::Object)]
pub struct BloodBankCore {
    db: Arc<Mutex<Database>>,
    config: CoreConfig,
    outbox: OutboxDispatcher,
}

impl BloodBankCore {
    fn new(db: Database, config: CoreConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            config,
            outbox: OutboxDispatcher::new(),
        }
    }
}

#[uniffi::export]
impl BloodBankCore {
    // =========================================================================
    // Request Operations
    // =========================================================================

    /// Raise a blood request.
    pub fn create_request(
        &self,
        actor: FfiActor,
        input: FfiNewRequest,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let input = NewBloodRequest {
            blood_group: parse_group(&input.blood_group)?,
            units_requested: input.units_requested,
            urgency: Urgency::parse(&input.urgency).ok_or_else(|| {
                BloodBankError::InvalidInput(format!("Unknown urgency: {}", input.urgency))
            })?,
            patient_name: input.patient_name,
            notes: input.notes,
        };

        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.create(&ctx, input)?.into())
    }

    pub fn get_request(&self, request_id: String) -> Result<FfiBloodRequest, BloodBankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.get(&request_id)?.into())
    }

    /// Approve against stock. Fails with `InsufficientInventory` and flags the request for
    /// outreach when stock is short.
    pub fn approve_request(
        &self,
        actor: FfiActor,
        request_id: String,
        collection_date: Option<String>,
        collection_location: Option<String>,
        instructions: Option<String>,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let details = CollectionDetails {
            date: collection_date.as_deref().map(parse_date).transpose()?,
            location: collection_location,
            instructions,
        };

        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.approve(&ctx, &request_id, details)?.into())
    }

    pub fn reject_request(
        &self,
        actor: FfiActor,
        request_id: String,
        reason: String,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.reject(&ctx, &request_id, &reason)?.into())
    }

    pub fn confirm_collection(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.confirm_collection(&ctx, &request_id)?.into())
    }

    pub fn verify_request(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.verify(&ctx, &request_id)?.into())
    }

    pub fn request_reschedule(
        &self,
        actor: FfiActor,
        request_id: String,
        new_date: String,
        reason: String,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let new_date = parse_date(&new_date)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager
            .request_reschedule(&ctx, &request_id, new_date, &reason)?
            .into())
    }

    pub fn resolve_reschedule(
        &self,
        actor: FfiActor,
        request_id: String,
        accept: bool,
        note: Option<String>,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager
            .resolve_reschedule(&ctx, &request_id, accept, note)?
            .into())
    }

    pub fn cancel_request(
        &self,
        actor: FfiActor,
        request_id: String,
        reason: String,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.cancel(&ctx, &request_id, &reason)?.into())
    }

    pub fn mark_request_no_show(
        &self,
        actor: FfiActor,
        request_id: String,
        reason: String,
    ) -> Result<FfiBloodRequest, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.mark_no_show(&ctx, &request_id, &reason)?.into())
    }

    pub fn list_requests_by_status(
        &self,
        status: String,
    ) -> Result<Vec<FfiBloodRequest>, BloodBankError> {
        let status = RequestStatus::parse(&status)
            .ok_or_else(|| BloodBankError::InvalidInput(format!("Unknown status: {status}")))?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        let requests = manager.list_by_status(status)?;
        Ok(requests.into_iter().map(|r| r.into()).collect())
    }

    /// Pending requests waiting on donor outreach, most urgent first.
    pub fn list_awaiting_donors(&self) -> Result<Vec<FfiBloodRequest>, BloodBankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        let requests = manager.list_awaiting_donors()?;
        Ok(requests.into_iter().map(|r| r.into()).collect())
    }

    pub fn list_reschedule_requests(&self) -> Result<Vec<FfiBloodRequest>, BloodBankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        let requests = manager.list_reschedule_requests()?;
        Ok(requests.into_iter().map(|r| r.into()).collect())
    }

    /// Requests raised by the calling hospital, external party or admin, newest first.
    pub fn list_my_requests(
        &self,
        actor: FfiActor,
    ) -> Result<Vec<FfiBloodRequest>, BloodBankError> {
        let ctx = context(actor)?;
        let requester = Requester::from_actor(&ctx.actor).ok_or_else(|| {
            BloodBankError::Unauthorized(format!("{} does not raise requests", ctx.actor.label()))
        })?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        let requests = manager.list_for_requester(&requester)?;
        Ok(requests.into_iter().map(|r| r.into()).collect())
    }

    /// Donations credited to a request.
    pub fn list_request_donations(
        &self,
        request_id: String,
    ) -> Result<Vec<FfiDonation>, BloodBankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        let donations = manager.donations(&request_id)?;
        Ok(donations.into_iter().map(|d| d.into()).collect())
    }

    pub fn request_history(
        &self,
        request_id: String,
    ) -> Result<Vec<FfiRequestEvent>, BloodBankError> {
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        let events = manager.history(&request_id)?;
        Ok(events.into_iter().map(|e| e.into()).collect())
    }

    /// Check the transition journal for tampering.
    pub fn verify_journal(&self) -> Result<FfiChainVerification, BloodBankError> {
        let db = self.db.lock()?;
        Ok(db.verify_journal_chain()?.into())
    }

    // =========================================================================
    // Inventory Operations
    // =========================================================================

    /// Admin stock entry.
    pub fn deposit_stock(
        &self,
        actor: FfiActor,
        blood_group: String,
        units: u32,
        collection_date: String,
        location: String,
    ) -> Result<FfiInventoryBatch, BloodBankError> {
        let ctx = context(actor)?;
        let deposit = models::Deposit {
            blood_group: parse_group(&blood_group)?,
            units,
            collection_date: parse_date(&collection_date)?,
            location,
            source_donor_id: None,
        };

        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, &self.config);
        Ok(ledger.deposit(&ctx, deposit)?.into())
    }

    /// Available units for all eight groups.
    pub fn stock_summary(&self) -> Result<Vec<FfiStockLevel>, BloodBankError> {
        let today = chrono::Utc::now().date_naive();
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, &self.config);
        let levels = ledger.stock_summary(today)?;
        Ok(levels.into_iter().map(|l| l.into()).collect())
    }

    pub fn list_batches(&self, blood_group: String) -> Result<Vec<FfiInventoryBatch>, BloodBankError> {
        let group = parse_group(&blood_group)?;
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, &self.config);
        let batches = ledger.batches(group)?;
        Ok(batches.into_iter().map(|b| b.into()).collect())
    }

    pub fn expiring_within(&self, days: u32) -> Result<Vec<FfiInventoryBatch>, BloodBankError> {
        let today = chrono::Utc::now().date_naive();
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, &self.config);
        let batches = ledger.expiring_within(today, days)?;
        Ok(batches.into_iter().map(|b| b.into()).collect())
    }

    // =========================================================================
    // Donor Operations
    // =========================================================================

    pub fn register_donor(
        &self,
        actor: FfiActor,
        name: String,
        blood_group: String,
        contact: Option<String>,
        last_donation_date: Option<String>,
    ) -> Result<FfiDonor, BloodBankError> {
        let ctx = context(actor)?;
        let input = NewDonor {
            name,
            blood_group: parse_group(&blood_group)?,
            contact,
            last_donation_date: last_donation_date.as_deref().map(parse_date).transpose()?,
        };

        let db = self.db.lock()?;
        let tracker = DonorEligibilityTracker::new(&db, &self.config);
        Ok(tracker.register_donor(&ctx, input)?.into())
    }

    pub fn set_donor_active(
        &self,
        actor: FfiActor,
        donor_id: String,
        active: bool,
    ) -> Result<FfiDonor, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let tracker = DonorEligibilityTracker::new(&db, &self.config);
        Ok(tracker.set_active(&ctx, &donor_id, active)?.into())
    }

    pub fn get_donor(&self, donor_id: String) -> Result<FfiDonor, BloodBankError> {
        let db = self.db.lock()?;
        let tracker = DonorEligibilityTracker::new(&db, &self.config);
        Ok(tracker.get_donor(&donor_id)?.into())
    }

    /// Eligibility as of today.
    pub fn check_eligibility(&self, donor_id: String) -> Result<FfiEligibility, BloodBankError> {
        let today = chrono::Utc::now().date_naive();
        let db = self.db.lock()?;
        let tracker = DonorEligibilityTracker::new(&db, &self.config);
        Ok(tracker.check(&donor_id, today)?.into())
    }

    pub fn donation_history(&self, donor_id: String) -> Result<Vec<FfiDonation>, BloodBankError> {
        let db = self.db.lock()?;
        let tracker = DonorEligibilityTracker::new(&db, &self.config);
        let history = tracker.donation_history(&donor_id)?;
        Ok(history.into_iter().map(|d| d.into()).collect())
    }

    // =========================================================================
    // Outreach Operations
    // =========================================================================

    /// Contact eligible donors for a request awaiting donations. Messages land in the outbox.
    pub fn start_outreach(
        &self,
        actor: FfiActor,
        request_id: String,
    ) -> Result<FfiOutreachReport, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.start_outreach(&ctx, &request_id, &self.outbox)?.into())
    }

    /// Record an explicit `accept` or `decline`.
    pub fn record_response(
        &self,
        actor: FfiActor,
        notification_id: String,
        action: String,
    ) -> Result<FfiNotification, BloodBankError> {
        let ctx = context(actor)?;
        let action = ResponseAction::parse(&action)
            .ok_or_else(|| BloodBankError::InvalidInput(format!("Unknown action: {action}")))?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager
            .record_response(&ctx, &notification_id, action)?
            .into())
    }

    /// Record a donor's free-text or JSON reply.
    pub fn record_reply(
        &self,
        actor: FfiActor,
        notification_id: String,
        reply: String,
    ) -> Result<FfiNotification, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.record_reply(&ctx, &notification_id, &reply)?.into())
    }

    pub fn mark_notification_read(
        &self,
        actor: FfiActor,
        notification_id: String,
    ) -> Result<FfiNotification, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let manager = RequestLifecycleManager::new(&db, &self.config);
        Ok(manager.mark_read(&ctx, &notification_id)?.into())
    }

    /// Hand every queued message to the host for delivery.
    pub fn drain_outbox(&self) -> Vec<FfiOutboundMessage> {
        self.outbox.drain().into_iter().map(|m| m.into()).collect()
    }

    // =========================================================================
    // Appointment Operations
    // =========================================================================

    pub fn schedule_appointment(
        &self,
        actor: FfiActor,
        donor_id: String,
        slot: FfiSlot,
        request_id: Option<String>,
        admin_notes: Option<String>,
    ) -> Result<FfiAppointment, BloodBankError> {
        let ctx = context(actor)?;
        let input = NewAppointment {
            donor_id,
            slot: slot.try_into()?,
            request_id,
            admin_notes,
        };

        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler.schedule(&ctx, input)?.into())
    }

    /// Book from an accepted outreach response.
    pub fn schedule_from_response(
        &self,
        actor: FfiActor,
        notification_id: String,
        slot: FfiSlot,
    ) -> Result<FfiAppointment, BloodBankError> {
        let ctx = context(actor)?;
        let slot = slot.try_into()?;
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler
            .schedule_from_response(&ctx, &notification_id, slot)?
            .into())
    }

    pub fn confirm_appointment(
        &self,
        actor: FfiActor,
        appointment_id: String,
    ) -> Result<FfiAppointment, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler.confirm(&ctx, &appointment_id)?.into())
    }

    pub fn start_appointment(
        &self,
        actor: FfiActor,
        appointment_id: String,
    ) -> Result<FfiAppointment, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler.start(&ctx, &appointment_id)?.into())
    }

    pub fn complete_donation(
        &self,
        actor: FfiActor,
        appointment_id: String,
        units: u32,
        location: Option<String>,
        notes: Option<String>,
    ) -> Result<FfiDonationOutcome, BloodBankError> {
        let ctx = context(actor)?;
        let input = DonationInput {
            units,
            location,
            notes,
        };
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler
            .complete_donation(&ctx, &appointment_id, input)?
            .into())
    }

    pub fn cancel_appointment(
        &self,
        actor: FfiActor,
        appointment_id: String,
        reason: String,
    ) -> Result<FfiAppointment, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler.cancel(&ctx, &appointment_id, &reason)?.into())
    }

    pub fn mark_appointment_no_show(
        &self,
        actor: FfiActor,
        appointment_id: String,
        note: Option<String>,
    ) -> Result<FfiAppointment, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler.mark_no_show(&ctx, &appointment_id, note)?.into())
    }

    /// Walk-in donation. `medical_clearance` lets an ineligible donor through with a warning.
    pub fn record_direct_donation(
        &self,
        actor: FfiActor,
        donor_id: String,
        units: u32,
        location: Option<String>,
        notes: Option<String>,
        medical_clearance: bool,
    ) -> Result<FfiDonationOutcome, BloodBankError> {
        let ctx = context(actor)?;
        let clearance = if medical_clearance {
            EligibilityOverride::MedicalClearance
        } else {
            EligibilityOverride::Refuse
        };
        let input = DonationInput {
            units,
            location,
            notes,
        };
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        Ok(scheduler
            .record_direct_donation(&ctx, &donor_id, input, clearance)?
            .into())
    }

    pub fn list_donor_appointments(
        &self,
        donor_id: String,
    ) -> Result<Vec<FfiAppointment>, BloodBankError> {
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        let appointments = scheduler.list_for_donor(&donor_id)?;
        Ok(appointments.into_iter().map(|a| a.into()).collect())
    }

    pub fn list_request_appointments(
        &self,
        request_id: String,
    ) -> Result<Vec<FfiAppointment>, BloodBankError> {
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        let appointments = scheduler.list_for_request(&request_id)?;
        Ok(appointments.into_iter().map(|a| a.into()).collect())
    }

    pub fn upcoming_appointments(
        &self,
        actor: FfiActor,
    ) -> Result<Vec<FfiAppointment>, BloodBankError> {
        let ctx = context(actor)?;
        let db = self.db.lock()?;
        let scheduler = AppointmentScheduler::new(&db, &self.config, &self.outbox);
        let appointments = scheduler.upcoming(&ctx)?;
        Ok(appointments.into_iter().map(|a| a.into()).collect())
    }
}

// =========================================================================
// Input Parsing
// =========================================================================

fn context(actor: FfiActor) -> Result<OpContext, BloodBankError> {
    let actor = match actor.role.as_str() {
        "admin" => Actor::Admin(actor.id),
        "hospital" => Actor::Hospital(actor.id),
        "external" => Actor::External(actor.id),
        "donor" => Actor::Donor(actor.id),
        other => {
            return Err(BloodBankError::InvalidInput(format!(
                "Unknown role: {other}"
            )))
        }
    };
    Ok(OpContext::now(actor))
}

fn parse_group(raw: &str) -> Result<BloodGroup, BloodBankError> {
    BloodGroup::parse(raw)
        .ok_or_else(|| BloodBankError::InvalidInput(format!("Unknown blood group: {raw}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, BloodBankError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| BloodBankError::InvalidInput(format!("Expected YYYY-MM-DD, got {raw}")))
}

fn parse_time(raw: &str) -> Result<NaiveTime, BloodBankError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| BloodBankError::InvalidInput(format!("Expected HH:MM, got {raw}")))
}

// =========================================================================
// FFI Types
// =========================================================================

/// Who is calling: role is `admin`, `hospital`, `external` or `donor`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiActor {
    pub role: String,
    pub id: String,
}

/// FFI-safe request input.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewRequest {
    pub blood_group: String,
    pub units_requested: u32,
    pub urgency: String,
    pub patient_name: Option<String>,
    pub notes: Option<String>,
}

/// FFI-safe blood request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBloodRequest {
    pub id: String,
    pub requester_kind: String,
    pub requester_id: String,
    pub blood_group: String,
    pub units_requested: u32,
    pub units_collected: u32,
    pub units_allocated: u32,
    pub urgency: String,
    pub status: String,
    pub awaiting_donors: bool,
    pub fulfillment: Option<String>,
    pub collection_date: Option<String>,
    pub collection_location: Option<String>,
    pub collection_instructions: Option<String>,
    pub reschedule_date: Option<String>,
    pub rejection_reason: Option<String>,
    pub closure_reason: Option<String>,
    pub version: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<BloodRequest> for FfiBloodRequest {
    fn from(request: BloodRequest) -> Self {
        let units_allocated = request.allocated_units();
        let collection = request.collection.as_ref();
        Self {
            requester_kind: request.requester.kind.as_str().to_string(),
            requester_id: request.requester.id.clone(),
            blood_group: request.blood_group.to_string(),
            units_requested: request.units_requested,
            units_collected: request.units_collected,
            units_allocated,
            urgency: request.urgency.as_str().to_string(),
            status: request.status.as_str().to_string(),
            awaiting_donors: request.awaiting_donors,
            fulfillment: request.fulfillment.map(|f| f.as_str().to_string()),
            collection_date: collection.map(|c| c.date.to_string()),
            collection_location: collection.map(|c| c.location.clone()),
            collection_instructions: collection.and_then(|c| c.instructions.clone()),
            reschedule_date: request.reschedule.as_ref().map(|r| r.requested_date.to_string()),
            rejection_reason: request.rejection_reason.clone(),
            closure_reason: request.closure_reason.clone(),
            version: request.version,
            created_at: request.created_at.to_rfc3339(),
            updated_at: request.updated_at.to_rfc3339(),
            id: request.id,
        }
    }
}

/// FFI-safe journal event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRequestEvent {
    pub seq: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor: String,
    pub detail: Option<String>,
    pub at: String,
    pub hash: String,
}

impl From<RequestEvent> for FfiRequestEvent {
    fn from(event: RequestEvent) -> Self {
        Self {
            seq: event.seq,
            from_status: event.from_status.map(|s| s.as_str().to_string()),
            to_status: event.to_status.as_str().to_string(),
            actor: event.actor,
            detail: event.detail,
            at: event.at.to_rfc3339(),
            hash: event.hash,
        }
    }
}

/// FFI-safe journal verification result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChainVerification {
    pub events_checked: u64,
    pub intact: bool,
    pub first_broken_seq: Option<i64>,
}

impl From<ChainVerification> for FfiChainVerification {
    fn from(verification: ChainVerification) -> Self {
        Self {
            events_checked: verification.events_checked as u64,
            intact: verification.is_intact(),
            first_broken_seq: verification.first_broken_seq,
        }
    }
}

/// FFI-safe inventory batch.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiInventoryBatch {
    pub id: String,
    pub blood_group: String,
    pub units: u32,
    pub collection_date: String,
    pub expiry_date: String,
    pub location: String,
    pub source_donor_id: Option<String>,
}

impl From<InventoryBatch> for FfiInventoryBatch {
    fn from(batch: InventoryBatch) -> Self {
        Self {
            id: batch.id,
            blood_group: batch.blood_group.to_string(),
            units: batch.units,
            collection_date: batch.collection_date.to_string(),
            expiry_date: batch.expiry_date.to_string(),
            location: batch.location,
            source_donor_id: batch.source_donor_id,
        }
    }
}

/// FFI-safe stock level.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockLevel {
    pub blood_group: String,
    pub available_units: u32,
    pub batch_count: u32,
    pub next_expiry: Option<String>,
}

impl From<StockLevel> for FfiStockLevel {
    fn from(level: StockLevel) -> Self {
        Self {
            blood_group: level.blood_group.to_string(),
            available_units: level.available_units,
            batch_count: level.batch_count,
            next_expiry: level.next_expiry.map(|d| d.to_string()),
        }
    }
}

/// FFI-safe donor.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDonor {
    pub id: String,
    pub name: String,
    pub blood_group: String,
    pub contact: Option<String>,
    pub active: bool,
    pub last_donation_date: Option<String>,
}

impl From<Donor> for FfiDonor {
    fn from(donor: Donor) -> Self {
        Self {
            id: donor.id,
            name: donor.name,
            blood_group: donor.blood_group.to_string(),
            contact: donor.contact,
            active: donor.active,
            last_donation_date: donor.last_donation_date.map(|d| d.to_string()),
        }
    }
}

/// FFI-safe eligibility snapshot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiEligibility {
    pub is_eligible: bool,
    pub days_until_eligible: u32,
    pub is_active: bool,
    pub is_available: bool,
    pub next_eligible_date: Option<String>,
}

impl From<EligibilityStatus> for FfiEligibility {
    fn from(status: EligibilityStatus) -> Self {
        Self {
            is_eligible: status.is_eligible,
            days_until_eligible: status.days_until_eligible,
            is_active: status.is_active,
            is_available: status.is_available,
            next_eligible_date: status.next_eligible_date.map(|d| d.to_string()),
        }
    }
}

/// FFI-safe donation history entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDonation {
    pub id: String,
    pub donor_id: String,
    pub appointment_id: Option<String>,
    pub request_id: Option<String>,
    pub batch_id: String,
    pub units: u32,
    pub donated_on: String,
    pub location: String,
}

impl From<DonationRecord> for FfiDonation {
    fn from(donation: DonationRecord) -> Self {
        Self {
            id: donation.id,
            donor_id: donation.donor_id,
            appointment_id: donation.appointment_id,
            request_id: donation.request_id,
            batch_id: donation.batch_id,
            units: donation.units,
            donated_on: donation.donated_on.to_string(),
            location: donation.location,
        }
    }
}

/// FFI-safe appointment slot: date `YYYY-MM-DD`, time `HH:MM`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSlot {
    pub date: String,
    pub time: String,
    pub location: String,
}

impl TryFrom<FfiSlot> for AppointmentSlot {
    type Error = BloodBankError;

    fn try_from(slot: FfiSlot) -> Result<Self, Self::Error> {
        Ok(AppointmentSlot {
            date: parse_date(&slot.date)?,
            time: parse_time(&slot.time)?,
            location: slot.location,
        })
    }
}

/// FFI-safe appointment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAppointment {
    pub id: String,
    pub donor_id: String,
    pub request_id: Option<String>,
    pub scheduled_date: String,
    pub scheduled_time: String,
    pub location: String,
    pub status: String,
    pub units_collected: Option<u32>,
    pub admin_notes: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl From<Appointment> for FfiAppointment {
    fn from(appointment: Appointment) -> Self {
        Self {
            id: appointment.id,
            donor_id: appointment.donor_id,
            request_id: appointment.request_id,
            scheduled_date: appointment.scheduled_date.to_string(),
            scheduled_time: appointment.scheduled_time.format("%H:%M").to_string(),
            location: appointment.location,
            status: appointment.status.as_str().to_string(),
            units_collected: appointment.units_collected,
            admin_notes: appointment.admin_notes,
            cancellation_reason: appointment.cancellation_reason,
        }
    }
}

/// FFI-safe donation outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDonationOutcome {
    pub donation: FfiDonation,
    pub batch: FfiInventoryBatch,
    pub appointment: Option<FfiAppointment>,
    pub attributed_request_id: Option<String>,
    pub units_attributed: u32,
    pub request_fulfilled: bool,
    pub eligibility_warning: Option<String>,
}

impl From<DonationOutcome> for FfiDonationOutcome {
    fn from(outcome: DonationOutcome) -> Self {
        let attribution = outcome.attribution.as_ref();
        Self {
            attributed_request_id: attribution.map(|a| a.request_id.clone()),
            units_attributed: attribution.map(|a| a.units_attributed).unwrap_or(0),
            request_fulfilled: attribution.map(|a| a.fulfilled).unwrap_or(false),
            donation: outcome.donation.into(),
            batch: outcome.batch.into(),
            appointment: outcome.appointment.map(|a| a.into()),
            eligibility_warning: outcome.eligibility_warning,
        }
    }
}

/// FFI-safe notification. `status` reads `expired` once the response window has passed.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNotification {
    pub id: String,
    pub donor_id: String,
    pub request_id: Option<String>,
    pub appointment_id: Option<String>,
    pub kind: String,
    pub status: String,
    pub response_action: Option<String>,
    pub expires_at: String,
}

impl From<Notification> for FfiNotification {
    fn from(notification: Notification) -> Self {
        let status = notification.effective_status(chrono::Utc::now());
        Self {
            id: notification.id,
            donor_id: notification.donor_id,
            request_id: notification.request_id,
            appointment_id: notification.appointment_id,
            kind: notification.kind.as_str().to_string(),
            status: status.as_str().to_string(),
            response_action: notification.response_action.map(|a| a.as_str().to_string()),
            expires_at: notification.expires_at.to_rfc3339(),
        }
    }
}

/// FFI-safe outreach result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOutreachReport {
    pub request_id: String,
    pub sent_notification_ids: Vec<String>,
    pub failed_donor_ids: Vec<String>,
    pub already_notified: u32,
}

impl From<OutreachReport> for FfiOutreachReport {
    fn from(report: OutreachReport) -> Self {
        Self {
            request_id: report.request_id,
            sent_notification_ids: report.sent,
            failed_donor_ids: report.failed.into_iter().map(|f| f.donor_id).collect(),
            already_notified: report.already_notified,
        }
    }
}

/// FFI-safe queued message.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOutboundMessage {
    pub message_id: String,
    pub recipient: String,
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub reference: Option<String>,
}

impl From<OutboundMessage> for FfiOutboundMessage {
    fn from(message: OutboundMessage) -> Self {
        Self {
            message_id: message.message_id,
            recipient: message.recipient,
            kind: message.payload.kind.as_str().to_string(),
            subject: message.payload.subject,
            body: message.payload.body,
            reference: message.payload.reference,
        }
    }
}
