//! Inventory ledger integration tests.

use bloodbank_core::db::Database;
use bloodbank_core::ledger::InventoryLedger;
use bloodbank_core::models::{Actor, AllocationReceipt, BloodGroup, Deposit, OpContext};
use bloodbank_core::{CoreConfig, CoreError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

fn admin() -> OpContext {
    OpContext::new(Actor::Admin("ops".into()), clock())
}

/// Deposit stock whose expiry lands `expires_in` days from today.
fn stock_expiring_in(
    ledger: &InventoryLedger,
    ctx: &OpContext,
    config: &CoreConfig,
    expires_in: i64,
    units: u32,
) -> String {
    let collected = ctx.today() - Duration::days(i64::from(config.shelf_life_days) - expires_in);
    ledger
        .deposit(
            ctx,
            Deposit {
                blood_group: BloodGroup::BPositive,
                units,
                collection_date: collected,
                location: "Fridge 2".into(),
                source_donor_id: None,
            },
        )
        .unwrap()
        .id
}

#[test]
fn test_allocation_takes_soonest_expiry_first() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let ledger = InventoryLedger::new(&db, &config);
    let ctx = admin();

    let in_5 = stock_expiring_in(&ledger, &ctx, &config, 5, 2);
    let in_20 = stock_expiring_in(&ledger, &ctx, &config, 20, 2);
    let in_2 = stock_expiring_in(&ledger, &ctx, &config, 2, 2);

    let receipt = ledger.try_allocate(&ctx, BloodGroup::BPositive, 3).unwrap();
    let taken: Vec<(String, u32)> = receipt
        .lines
        .iter()
        .map(|l| (l.batch_id.clone(), l.units))
        .collect();
    assert_eq!(taken, vec![(in_2.clone(), 2), (in_5.clone(), 1)]);

    let remaining = |id: &str| db.get_batch(id).unwrap().unwrap().units;
    assert_eq!(remaining(&in_2), 0);
    assert_eq!(remaining(&in_5), 1);
    assert_eq!(remaining(&in_20), 2);
}

#[test]
fn test_expired_stock_is_not_allocatable() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let ledger = InventoryLedger::new(&db, &config);
    let ctx = admin();

    // Expires today: already unusable
    stock_expiring_in(&ledger, &ctx, &config, 0, 4);
    stock_expiring_in(&ledger, &ctx, &config, 1, 1);

    assert_eq!(
        ledger.total_available(BloodGroup::BPositive, ctx.today()).unwrap(),
        1
    );
    let result = ledger.try_allocate(&ctx, BloodGroup::BPositive, 2);
    assert!(matches!(
        result,
        Err(CoreError::InsufficientInventory {
            requested: 2,
            available: 1,
            ..
        })
    ));

    // Refusal leaves stock untouched
    assert_eq!(
        ledger.total_available(BloodGroup::BPositive, ctx.today()).unwrap(),
        1
    );
}

#[test]
fn test_expiring_within_window() {
    let db = Database::open_in_memory().unwrap();
    let config = CoreConfig::default();
    let ledger = InventoryLedger::new(&db, &config);
    let ctx = admin();

    let soon = stock_expiring_in(&ledger, &ctx, &config, 3, 1);
    stock_expiring_in(&ledger, &ctx, &config, 30, 1);

    let expiring = ledger.expiring_within(ctx.today(), 7).unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].id, soon);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Units are neither created nor destroyed by allocate and restore.
    #[test]
    fn prop_allocate_restore_conserves_units(
        deposits in prop::collection::vec((1u32..=5, 0i64..30), 1..6),
        requests in prop::collection::vec(1u32..=8, 1..8),
    ) {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);
        let ctx = admin();

        let mut deposited = 0;
        for (units, age) in &deposits {
            ledger
                .deposit(
                    &ctx,
                    Deposit {
                        blood_group: BloodGroup::ONegative,
                        units: *units,
                        collection_date: ctx.today() - Duration::days(*age),
                        location: "Fridge 3".into(),
                        source_donor_id: None,
                    },
                )
                .unwrap();
            deposited += units;
        }

        let mut receipts: Vec<AllocationReceipt> = Vec::new();
        for units in requests {
            let before = ledger.total_available(BloodGroup::ONegative, ctx.today()).unwrap();
            match ledger.try_allocate(&ctx, BloodGroup::ONegative, units) {
                Ok(receipt) => {
                    prop_assert_eq!(receipt.total_units(), units);
                    receipts.push(receipt);
                }
                Err(CoreError::InsufficientInventory { available, .. }) => {
                    prop_assert!(available < units);
                    prop_assert_eq!(available, before);
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }

            let held: u32 = receipts.iter().map(|r| r.total_units()).sum();
            let free = ledger.total_available(BloodGroup::ONegative, ctx.today()).unwrap();
            prop_assert_eq!(free + held, deposited);
        }

        for receipt in &receipts {
            ledger.restore(&ctx, receipt).unwrap();
        }
        let free = ledger.total_available(BloodGroup::ONegative, ctx.today()).unwrap();
        prop_assert_eq!(free, deposited);
    }
}
