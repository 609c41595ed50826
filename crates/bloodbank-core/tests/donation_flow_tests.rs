//! Request lifecycle integration tests: stock approval, donor outreach and
//! donation-driven fulfillment.

use bloodbank_core::db::Database;
use bloodbank_core::eligibility::{DonorEligibilityTracker, NewDonor};
use bloodbank_core::ledger::InventoryLedger;
use bloodbank_core::lifecycle::{CollectionDetails, RequestLifecycleManager};
use bloodbank_core::models::{
    Actor, AppointmentSlot, BloodGroup, BloodRequest, Deposit, Donor, Fulfillment,
    NewBloodRequest, OpContext, RequestStatus, ResponseAction, Urgency,
};
use bloodbank_core::scheduler::{AppointmentScheduler, DonationInput, NewAppointment};
use bloodbank_core::{CoreConfig, CoreError};
use bloodbank_notify::OutboxDispatcher;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

/// Every operation in these tests happens at the same instant.
fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

fn admin() -> OpContext {
    OpContext::new(Actor::Admin("ops".into()), clock())
}

fn hospital() -> OpContext {
    OpContext::new(Actor::Hospital("st-marys".into()), clock())
}

fn as_donor(donor: &Donor) -> OpContext {
    OpContext::new(Actor::Donor(donor.id.clone()), clock())
}

fn raise(
    manager: &RequestLifecycleManager,
    blood_group: BloodGroup,
    units: u32,
) -> BloodRequest {
    manager
        .create(
            &hospital(),
            NewBloodRequest {
                blood_group,
                units_requested: units,
                urgency: Urgency::High,
                patient_name: Some("Bed 12".into()),
                notes: None,
            },
        )
        .unwrap()
}

fn register(tracker: &DonorEligibilityTracker, name: &str, blood_group: BloodGroup) -> Donor {
    tracker
        .register_donor(
            &admin(),
            NewDonor {
                name: name.into(),
                blood_group,
                contact: Some(format!("{}@example.org", name.to_lowercase())),
                last_donation_date: None,
            },
        )
        .unwrap()
}

fn slot_today(ctx: &OpContext) -> AppointmentSlot {
    AppointmentSlot {
        date: ctx.today(),
        time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        location: "Central Donor Centre".into(),
    }
}

fn one_unit() -> DonationInput {
    DonationInput {
        units: 1,
        ..Default::default()
    }
}

#[test]
fn test_shortage_filled_by_donors_end_to_end() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let outbox = OutboxDispatcher::new();
    let manager = RequestLifecycleManager::new(&db, &config);
    let tracker = DonorEligibilityTracker::new(&db, &config);
    let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
    let ledger = InventoryLedger::new(&db, &config);
    let admin = admin();

    let ada = register(&tracker, "Ada", BloodGroup::OPositive);
    let bo = register(&tracker, "Bo", BloodGroup::OPositive);
    register(&tracker, "Cy", BloodGroup::ANegative);

    let request = raise(&manager, BloodGroup::OPositive, 2);

    // No O+ stock: approval fails but flags the request
    let result = manager.approve(&admin, &request.id, CollectionDetails::default());
    assert!(matches!(
        result,
        Err(CoreError::InsufficientInventory {
            requested: 2,
            available: 0,
            ..
        })
    ));
    let flagged = manager.get(&request.id).unwrap();
    assert_eq!(flagged.status, RequestStatus::Pending);
    assert!(flagged.awaiting_donors);
    assert_eq!(manager.list_awaiting_donors().unwrap().len(), 1);

    // Only the two O+ donors are contacted
    let report = manager.start_outreach(&admin, &request.id, &outbox).unwrap();
    assert_eq!(report.sent.len(), 2);
    assert!(report.failed.is_empty());
    let messages = outbox.drain();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.payload.body.contains("O+")));

    // A second cycle does not contact the same donors again
    let again = manager.start_outreach(&admin, &request.id, &outbox).unwrap();
    assert!(again.sent.is_empty());
    assert_eq!(again.already_notified, 2);

    let active = manager.active_for_request(&request.id, admin.now).unwrap();
    let notice_for = |donor: &Donor| {
        active
            .iter()
            .find(|n| n.donor_id == donor.id)
            .map(|n| n.id.clone())
            .unwrap()
    };

    let ada_ctx = as_donor(&ada);
    let bo_ctx = as_donor(&bo);
    manager
        .record_response(&ada_ctx, &notice_for(&ada), ResponseAction::Accept)
        .unwrap();
    manager
        .record_reply(&bo_ctx, &notice_for(&bo), "YES, after work")
        .unwrap();

    let ada_visit = scheduler
        .schedule_from_response(&ada_ctx, &notice_for(&ada), slot_today(&ada_ctx))
        .unwrap();
    let bo_visit = scheduler
        .schedule_from_response(&bo_ctx, &notice_for(&bo), slot_today(&bo_ctx))
        .unwrap();
    assert_eq!(ada_visit.request_id.as_deref(), Some(request.id.as_str()));

    // First unit is credited, request still pending
    let first = scheduler
        .complete_donation(&admin, &ada_visit.id, one_unit())
        .unwrap();
    let attribution = first.attribution.unwrap();
    assert_eq!(attribution.units_attributed, 1);
    assert!(!attribution.fulfilled);
    assert_eq!(manager.get(&request.id).unwrap().status, RequestStatus::Pending);

    // Second unit closes the gap
    let second = scheduler
        .complete_donation(&admin, &bo_visit.id, one_unit())
        .unwrap();
    assert!(second.attribution.unwrap().fulfilled);

    let approved = manager.get(&request.id).unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.fulfillment, Some(Fulfillment::Donations));
    assert_eq!(approved.units_collected, 2);
    assert_eq!(approved.allocated_units(), 2);
    assert!(!approved.awaiting_donors);
    let plan = approved.collection.clone().unwrap();
    assert_eq!(plan.date, admin.today() + Duration::days(1));
    assert_eq!(plan.location, config.default_collection_location);

    // Donated units are held for the request, not free stock
    assert_eq!(
        ledger
            .total_available(BloodGroup::OPositive, admin.today())
            .unwrap(),
        0
    );

    // Both donors are now cooling down
    let status = tracker.check(&ada.id, admin.today()).unwrap();
    assert!(!status.is_eligible);
    assert_eq!(status.days_until_eligible, config.donation_cooldown_days);
    assert_eq!(tracker.donation_history(&bo.id).unwrap().len(), 1);

    let collected = manager.confirm_collection(&hospital(), &request.id).unwrap();
    assert_eq!(collected.status, RequestStatus::Collected);
    let verified = manager.verify(&admin, &request.id).unwrap();
    assert_eq!(verified.status, RequestStatus::Verified);

    let history = manager.history(&request.id).unwrap();
    let statuses: Vec<_> = history.iter().map(|e| e.to_status).collect();
    assert_eq!(
        statuses.last().copied(),
        Some(RequestStatus::Verified)
    );
    assert!(db.verify_journal_chain().unwrap().is_intact());
}

#[test]
fn test_fulfillment_is_credited_once() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let outbox = OutboxDispatcher::new();
    let manager = RequestLifecycleManager::new(&db, &config);
    let tracker = DonorEligibilityTracker::new(&db, &config);
    let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
    let ledger = InventoryLedger::new(&db, &config);
    let admin = admin();

    let request = raise(&manager, BloodGroup::OPositive, 2);
    let visits: Vec<_> = ["Ada", "Bo"]
        .iter()
        .map(|name| {
            let donor = register(&tracker, name, BloodGroup::OPositive);
            scheduler
                .schedule(
                    &admin,
                    NewAppointment {
                        donor_id: donor.id,
                        slot: slot_today(&admin),
                        request_id: Some(request.id.clone()),
                        admin_notes: None,
                    },
                )
                .unwrap()
        })
        .collect();

    let two_units = DonationInput {
        units: 2,
        ..Default::default()
    };
    let first = scheduler
        .complete_donation(&admin, &visits[0].id, two_units.clone())
        .unwrap();
    assert!(first.attribution.unwrap().fulfilled);

    // The request is already approved; these units stay in general stock
    let second = scheduler
        .complete_donation(&admin, &visits[1].id, two_units)
        .unwrap();
    assert!(second.attribution.is_none());
    assert_eq!(second.batch.units, 2);

    let request = manager.get(&request.id).unwrap();
    assert_eq!(request.units_collected, 2);
    assert_eq!(request.allocated_units(), 2);
    assert_eq!(
        ledger
            .total_available(BloodGroup::OPositive, admin.today())
            .unwrap(),
        2
    );
}

#[test]
fn test_cancel_restores_stock() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let manager = RequestLifecycleManager::new(&db, &config);
    let ledger = InventoryLedger::new(&db, &config);
    let admin = admin();

    ledger
        .deposit(
            &admin,
            Deposit {
                blood_group: BloodGroup::APositive,
                units: 5,
                collection_date: admin.today(),
                location: "Fridge 1".into(),
                source_donor_id: None,
            },
        )
        .unwrap();

    let request = raise(&manager, BloodGroup::APositive, 3);
    manager
        .approve(&admin, &request.id, CollectionDetails::default())
        .unwrap();
    assert_eq!(
        ledger
            .total_available(BloodGroup::APositive, admin.today())
            .unwrap(),
        2
    );

    let cancelled = manager
        .cancel(&hospital(), &request.id, "patient transferred")
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert!(cancelled.allocation.is_none());
    assert_eq!(
        ledger
            .total_available(BloodGroup::APositive, admin.today())
            .unwrap(),
        5
    );

    // Terminal: a second cancel is stale and restores nothing
    assert!(matches!(
        manager.cancel(&admin, &request.id, "again"),
        Err(CoreError::StaleState { .. })
    ));
    assert_eq!(
        ledger
            .total_available(BloodGroup::APositive, admin.today())
            .unwrap(),
        5
    );

    let statuses: Vec<_> = manager
        .history(&request.id)
        .unwrap()
        .into_iter()
        .map(|e| e.to_status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Cancelled
        ]
    );
}

#[test]
fn test_expired_outreach_cannot_be_answered() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let outbox = OutboxDispatcher::new();
    let manager = RequestLifecycleManager::new(&db, &config);
    let tracker = DonorEligibilityTracker::new(&db, &config);
    let admin = admin();

    let ada = register(&tracker, "Ada", BloodGroup::BNegative);
    let request = raise(&manager, BloodGroup::BNegative, 1);
    let _ = manager.approve(&admin, &request.id, CollectionDetails::default());
    let report = manager.start_outreach(&admin, &request.id, &outbox).unwrap();
    let notification_id = report.sent[0].clone();

    let late = OpContext::new(
        Actor::Donor(ada.id.clone()),
        admin.now + Duration::hours(i64::from(config.outreach_ttl_hours) + 1),
    );
    let result = manager.record_response(&late, &notification_id, ResponseAction::Accept);
    assert!(matches!(result, Err(CoreError::StaleState { .. })));

    // Expiry frees the donor for the next cycle
    assert!(manager
        .active_for_request(&request.id, late.now)
        .unwrap()
        .is_empty());
}

#[test]
fn test_declined_response_cannot_be_booked() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let outbox = OutboxDispatcher::new();
    let manager = RequestLifecycleManager::new(&db, &config);
    let tracker = DonorEligibilityTracker::new(&db, &config);
    let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
    let admin = admin();

    let ada = register(&tracker, "Ada", BloodGroup::AbPositive);
    let request = raise(&manager, BloodGroup::AbPositive, 1);
    let _ = manager.approve(&admin, &request.id, CollectionDetails::default());
    let report = manager.start_outreach(&admin, &request.id, &outbox).unwrap();
    let notification_id = report.sent[0].clone();

    let donor_ctx = as_donor(&ada);
    manager
        .record_reply(&donor_ctx, &notification_id, "no thanks")
        .unwrap();

    let result = scheduler.schedule_from_response(&donor_ctx, &notification_id, slot_today(&donor_ctx));
    assert!(matches!(result, Err(CoreError::StaleState { .. })));

    // Someone else's notification is off limits
    let stranger = OpContext::new(Actor::Donor("someone-else".into()), clock());
    assert!(matches!(
        manager.mark_read(&stranger, &notification_id),
        Err(CoreError::Unauthorized(_))
    ));
}

fn book(
    scheduler: &AppointmentScheduler,
    tracker: &DonorEligibilityTracker,
    name: &str,
    request: &BloodRequest,
) -> String {
    let donor = register(tracker, name, request.blood_group);
    scheduler
        .schedule(
            &admin(),
            NewAppointment {
                donor_id: donor.id,
                slot: slot_today(&admin()),
                request_id: Some(request.id.clone()),
                admin_notes: None,
            },
        )
        .unwrap()
        .id
}

#[test]
fn test_partial_donation_then_stock_approval() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let outbox = OutboxDispatcher::new();
    let manager = RequestLifecycleManager::new(&db, &config);
    let tracker = DonorEligibilityTracker::new(&db, &config);
    let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
    let ledger = InventoryLedger::new(&db, &config);
    let admin = admin();
    let available = || {
        ledger
            .total_available(BloodGroup::APositive, admin.today())
            .unwrap()
    };

    let request = raise(&manager, BloodGroup::APositive, 3);
    let visit = book(&scheduler, &tracker, "Ada", &request);
    let donated = scheduler
        .complete_donation(&admin, &visit, one_unit())
        .unwrap();
    assert_eq!(donated.attribution.unwrap().units_collected, 1);
    assert_eq!(available(), 0);

    ledger
        .deposit(
            &admin,
            Deposit {
                blood_group: BloodGroup::APositive,
                units: 5,
                collection_date: admin.today(),
                location: "Fridge 1".into(),
                source_donor_id: None,
            },
        )
        .unwrap();

    // Only the outstanding two units come from stock
    let approved = manager
        .approve(&admin, &request.id, CollectionDetails::default())
        .unwrap();
    assert_eq!(approved.fulfillment, Some(Fulfillment::Stock));
    assert_eq!(approved.units_collected, 1);
    assert_eq!(approved.allocated_units(), 3);
    assert_eq!(approved.allocation.as_ref().unwrap().lines.len(), 2);
    assert_eq!(available(), 3);

    let donations = manager.donations(&request.id).unwrap();
    assert_eq!(donations.len(), 1);
    assert_eq!(donations[0].batch_id, donated.batch.id);

    // Cancelling returns both the stock units and the donated one
    manager
        .cancel(&hospital(), &request.id, "patient discharged")
        .unwrap();
    assert_eq!(available(), 6);
    assert_eq!(db.get_batch(&donated.batch.id).unwrap().unwrap().units, 1);
}

#[test]
fn test_reject_returns_donated_units() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let outbox = OutboxDispatcher::new();
    let manager = RequestLifecycleManager::new(&db, &config);
    let tracker = DonorEligibilityTracker::new(&db, &config);
    let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
    let ledger = InventoryLedger::new(&db, &config);
    let admin = admin();

    let request = raise(&manager, BloodGroup::BPositive, 3);
    let visit = book(&scheduler, &tracker, "Bo", &request);
    let donated = scheduler
        .complete_donation(
            &admin,
            &visit,
            DonationInput {
                units: 2,
                ..Default::default()
            },
        )
        .unwrap();
    let attribution = donated.attribution.unwrap();
    assert_eq!(attribution.units_attributed, 2);
    assert!(!attribution.fulfilled);
    assert_eq!(donated.batch.units, 0);

    let rejected = manager
        .reject(&admin, &request.id, "duplicate of an earlier request")
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert!(rejected.allocation.is_none());
    assert!(!rejected.awaiting_donors);

    assert_eq!(db.get_batch(&donated.batch.id).unwrap().unwrap().units, 2);
    assert_eq!(
        ledger
            .total_available(BloodGroup::BPositive, admin.today())
            .unwrap(),
        2
    );
    assert!(db.verify_journal_chain().unwrap().is_intact());
}
