//! Concurrent writers on separate connections to one database file.

use std::sync::{Arc, Barrier};
use std::thread;

use anyhow::Result;
use bloodbank_core::db::Database;
use bloodbank_core::eligibility::{DonorEligibilityTracker, NewDonor};
use bloodbank_core::ledger::InventoryLedger;
use bloodbank_core::lifecycle::{CollectionDetails, RequestLifecycleManager};
use bloodbank_core::models::{
    Actor, AppointmentSlot, BloodGroup, Deposit, Fulfillment, NewBloodRequest, OpContext,
    RequestStatus, Urgency,
};
use bloodbank_core::scheduler::{AppointmentScheduler, DonationInput, NewAppointment};
use bloodbank_notify::OutboxDispatcher;
use bloodbank_core::{CoreConfig, CoreError};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};

fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

fn admin() -> OpContext {
    OpContext::new(Actor::Admin("ops".into()), clock())
}

#[test]
fn test_competing_approvals_never_oversell() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bank.sqlite3");
    let config = CoreConfig::default();

    let request_ids = {
        let db = Database::open_with_config(&path, &config)?;
        let ledger = InventoryLedger::new(&db, &config);
        let manager = RequestLifecycleManager::new(&db, &config);
        let ctx = admin();

        ledger.deposit(
            &ctx,
            Deposit {
                blood_group: BloodGroup::APositive,
                units: 3,
                collection_date: ctx.today(),
                location: "Fridge 1".into(),
                source_donor_id: None,
            },
        )?;

        let hospital = OpContext::new(Actor::Hospital("st-marys".into()), clock());
        let mut ids = Vec::new();
        for _ in 0..2 {
            let request = manager.create(
                &hospital,
                NewBloodRequest {
                    blood_group: BloodGroup::APositive,
                    units_requested: 2,
                    urgency: Urgency::Medium,
                    patient_name: None,
                    notes: None,
                },
            )?;
            ids.push(request.id);
        }
        ids
    };

    let barrier = Arc::new(Barrier::new(request_ids.len()));
    let handles: Vec<_> = request_ids
        .iter()
        .cloned()
        .map(|request_id| {
            let path = path.clone();
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<bool> {
                let db = Database::open_with_config(&path, &config)?;
                let manager = RequestLifecycleManager::new(&db, &config);
                barrier.wait();
                match manager.approve(&admin(), &request_id, CollectionDetails::default()) {
                    Ok(_) => Ok(true),
                    Err(CoreError::InsufficientInventory { .. }) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
        })
        .collect();

    let mut approved = 0;
    for handle in handles {
        if handle.join().expect("approval thread panicked")? {
            approved += 1;
        }
    }
    assert_eq!(approved, 1);

    let db = Database::open_with_config(&path, &config)?;
    let ledger = InventoryLedger::new(&db, &config);
    let manager = RequestLifecycleManager::new(&db, &config);
    let today = admin().today();
    assert_eq!(ledger.total_available(BloodGroup::APositive, today)?, 1);

    let statuses: Vec<_> = request_ids
        .iter()
        .map(|id| manager.get(id).map(|r| (r.status, r.awaiting_donors)))
        .collect::<Result<_, _>>()?;
    assert!(statuses.contains(&(RequestStatus::Approved, false)));
    assert!(statuses.contains(&(RequestStatus::Pending, true)));
    assert!(db.verify_journal_chain()?.is_intact());
    Ok(())
}

#[test]
fn test_competing_donations_fulfill_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bank.sqlite3");
    let config = CoreConfig::default();

    let (request_id, visits) = {
        let db = Database::open_with_config(&path, &config)?;
        let outbox = OutboxDispatcher::new();
        let manager = RequestLifecycleManager::new(&db, &config);
        let tracker = DonorEligibilityTracker::new(&db, &config);
        let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
        let ctx = admin();

        let request = manager.create(
            &OpContext::new(Actor::Hospital("st-marys".into()), clock()),
            NewBloodRequest {
                blood_group: BloodGroup::ONegative,
                units_requested: 2,
                urgency: Urgency::High,
                patient_name: None,
                notes: None,
            },
        )?;

        let mut visits = Vec::new();
        for i in 0..4 {
            let donor = tracker.register_donor(
                &ctx,
                NewDonor {
                    name: format!("Donor {i}"),
                    blood_group: BloodGroup::ONegative,
                    contact: None,
                    last_donation_date: None,
                },
            )?;
            let visit = scheduler.schedule(
                &ctx,
                NewAppointment {
                    donor_id: donor.id,
                    slot: AppointmentSlot {
                        date: ctx.today(),
                        time: NaiveTime::from_hms_opt(8 + i, 0, 0).unwrap(),
                        location: "Central Donor Centre".into(),
                    },
                    request_id: Some(request.id.clone()),
                    admin_notes: None,
                },
            )?;
            visits.push(visit.id);
        }
        (request.id, visits)
    };

    let barrier = Arc::new(Barrier::new(visits.len()));
    let handles: Vec<_> = visits
        .into_iter()
        .map(|appointment_id| {
            let path = path.clone();
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Option<bool>> {
                let db = Database::open_with_config(&path, &config)?;
                let outbox = OutboxDispatcher::new();
                let scheduler = AppointmentScheduler::new(&db, &config, &outbox);
                barrier.wait();
                let outcome = scheduler.complete_donation(
                    &admin(),
                    &appointment_id,
                    DonationInput {
                        units: 1,
                        ..Default::default()
                    },
                )?;
                Ok(outcome.attribution.map(|a| a.fulfilled))
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.join().expect("donation thread panicked")?);
    }
    // One partial credit, one completing credit, the rest go to general stock
    outcomes.sort();
    assert_eq!(outcomes, vec![None, None, Some(false), Some(true)]);

    let db = Database::open_with_config(&path, &config)?;
    let ledger = InventoryLedger::new(&db, &config);
    let manager = RequestLifecycleManager::new(&db, &config);
    let request = manager.get(&request_id)?;
    assert_eq!(request.status, RequestStatus::Approved);
    assert_eq!(request.fulfillment, Some(Fulfillment::Donations));
    assert_eq!(request.units_collected, 2);
    assert_eq!(request.allocated_units(), 2);
    assert_eq!(manager.donations(&request_id)?.len(), 4);
    assert_eq!(ledger.total_available(BloodGroup::ONegative, admin().today())?, 2);

    let approvals = manager
        .history(&request_id)?
        .into_iter()
        .filter(|e| e.to_status == RequestStatus::Approved)
        .count();
    assert_eq!(approvals, 1);
    assert!(db.verify_journal_chain()?.is_intact());
    Ok(())
}
