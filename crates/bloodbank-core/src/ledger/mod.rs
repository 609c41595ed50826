//! Inventory ledger: batches of blood units, FIFO-by-expiry allocation and restoration.
//!
//! Every operation runs inside [`Database::atomic`], so a multi-batch allocation or
//! restore commits as one unit and concurrent allocations for the same group serialize
//! on the database write lock.

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::{require_admin, require_text, CoreError, CoreResult};
use crate::models::{
    AllocationReceipt, BloodGroup, Deposit, InventoryBatch, OpContext, ReceiptLine, StockLevel,
};

/// Inventory ledger manager.
pub struct InventoryLedger<'a> {
    db: &'a Database,
    config: &'a CoreConfig,
}

impl<'a> InventoryLedger<'a> {
    pub fn new(db: &'a Database, config: &'a CoreConfig) -> Self {
        Self { db, config }
    }

    /// Set aside `units` of `blood_group`, soonest-to-expire batches first.
    ///
    /// All-or-nothing: if unexpired stock cannot cover the full amount, no batch is
    /// touched and [`CoreError::InsufficientInventory`] is returned.
    #[tracing::instrument(skip(self, ctx))]
    pub fn try_allocate(
        &self,
        ctx: &OpContext,
        blood_group: BloodGroup,
        units: u32,
    ) -> CoreResult<AllocationReceipt> {
        if units == 0 {
            return Err(CoreError::Validation(
                "Allocation must be at least one unit".into(),
            ));
        }

        self.db.atomic(|| {
            let batches = self.db.list_allocatable_batches(blood_group, ctx.today())?;
            let available: u32 = batches.iter().map(|b| b.units).sum();
            if available < units {
                debug!(%blood_group, units, available, "allocation refused");
                return Err(CoreError::InsufficientInventory {
                    blood_group: blood_group.to_string(),
                    requested: units,
                    available,
                });
            }

            let mut receipt = AllocationReceipt::empty(blood_group);
            let mut remaining = units;
            for batch in batches {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(batch.units);
                if !self.db.take_batch_units(&batch.id, take, ctx.now)? {
                    return Err(CoreError::concurrent("InventoryBatch", &batch.id));
                }
                receipt.lines.push(receipt_line(&batch, take));
                remaining -= take;
            }

            debug!(%blood_group, units, batches = receipt.lines.len(), "allocated");
            Ok(receipt)
        })
    }

    /// Take `units` from one specific batch.
    ///
    /// Used to attribute freshly donated units to the request they were collected for.
    pub fn allocate_from_batch(
        &self,
        ctx: &OpContext,
        batch_id: &str,
        units: u32,
    ) -> CoreResult<AllocationReceipt> {
        self.db.atomic(|| {
            let batch = self
                .db
                .get_batch(batch_id)?
                .ok_or_else(|| CoreError::not_found("InventoryBatch", batch_id))?;

            if !batch.is_allocatable(ctx.today()) || batch.units < units {
                return Err(CoreError::InsufficientInventory {
                    blood_group: batch.blood_group.to_string(),
                    requested: units,
                    available: if batch.is_expired(ctx.today()) { 0 } else { batch.units },
                });
            }
            if !self.db.take_batch_units(batch_id, units, ctx.now)? {
                return Err(CoreError::concurrent("InventoryBatch", batch_id));
            }

            let mut receipt = AllocationReceipt::empty(batch.blood_group);
            receipt.lines.push(receipt_line(&batch, units));
            Ok(receipt)
        })
    }

    /// Put the units recorded in `receipt` back into their batches.
    ///
    /// A batch that no longer exists is recreated under its original id from the
    /// provenance kept on the receipt line. Returns the number of units restored.
    #[tracing::instrument(skip(self, ctx, receipt), fields(blood_group = %receipt.blood_group))]
    pub fn restore(&self, ctx: &OpContext, receipt: &AllocationReceipt) -> CoreResult<u32> {
        self.db.atomic(|| {
            let mut restored = 0;
            for line in receipt.lines.iter().filter(|line| line.units > 0) {
                if !self.db.add_batch_units(&line.batch_id, line.units, ctx.now)? {
                    warn!(
                        batch_id = %line.batch_id,
                        units = line.units,
                        "batch gone, recreating it for restore"
                    );
                    self.db.insert_batch(&InventoryBatch {
                        id: line.batch_id.clone(),
                        blood_group: receipt.blood_group,
                        units: line.units,
                        collection_date: line.collection_date,
                        expiry_date: line.expiry_date,
                        location: line.location.clone(),
                        source_donor_id: None,
                        created_at: ctx.now,
                        updated_at: ctx.now,
                    })?;
                }
                restored += line.units;
            }
            debug!(restored, "restored allocation");
            Ok(restored)
        })
    }

    /// Add stock, augmenting the batch with identical provenance or creating a new one.
    ///
    /// Expiry is always the collection date plus the configured shelf life.
    #[tracing::instrument(skip(self, ctx))]
    pub fn deposit(&self, ctx: &OpContext, deposit: Deposit) -> CoreResult<InventoryBatch> {
        require_admin(ctx, "deposit inventory")?;
        if deposit.units == 0 {
            return Err(CoreError::Validation(
                "Deposit must be at least one unit".into(),
            ));
        }
        if deposit.collection_date > ctx.today() {
            return Err(CoreError::Validation(format!(
                "Collection date {} is in the future",
                deposit.collection_date
            )));
        }
        let location = require_text("location", &deposit.location)?;

        self.db.atomic(|| {
            let existing = self.db.find_matching_batch(
                deposit.blood_group,
                deposit.collection_date,
                &location,
                deposit.source_donor_id.as_deref(),
            )?;

            if let Some(batch) = existing {
                if !self.db.add_batch_units(&batch.id, deposit.units, ctx.now)? {
                    return Err(CoreError::concurrent("InventoryBatch", &batch.id));
                }
                debug!(batch_id = %batch.id, units = deposit.units, "augmented batch");
                return self
                    .db
                    .get_batch(&batch.id)?
                    .ok_or_else(|| CoreError::not_found("InventoryBatch", &batch.id));
            }

            let batch = InventoryBatch {
                id: uuid::Uuid::new_v4().to_string(),
                blood_group: deposit.blood_group,
                units: deposit.units,
                collection_date: deposit.collection_date,
                expiry_date: self.expiry_for(deposit.collection_date)?,
                location: location.clone(),
                source_donor_id: deposit.source_donor_id.clone(),
                created_at: ctx.now,
                updated_at: ctx.now,
            };
            self.db.insert_batch(&batch)?;
            info!(
                batch_id = %batch.id,
                blood_group = %batch.blood_group,
                units = batch.units,
                expiry = %batch.expiry_date,
                "new batch"
            );
            Ok(batch)
        })
    }

    /// Units in unexpired batches of `blood_group` as of `today`.
    pub fn total_available(&self, blood_group: BloodGroup, today: NaiveDate) -> CoreResult<u32> {
        Ok(self.db.available_units(blood_group, today)?)
    }

    /// Every batch of a group, exhausted and expired included.
    pub fn batches(&self, blood_group: BloodGroup) -> CoreResult<Vec<InventoryBatch>> {
        Ok(self.db.list_batches(blood_group)?)
    }

    /// Available units for each of the eight groups.
    pub fn stock_summary(&self, today: NaiveDate) -> CoreResult<Vec<StockLevel>> {
        let mut levels = Vec::with_capacity(BloodGroup::ALL.len());
        for blood_group in BloodGroup::ALL {
            let batches = self.db.list_allocatable_batches(blood_group, today)?;
            levels.push(StockLevel {
                blood_group,
                available_units: batches.iter().map(|b| b.units).sum(),
                batch_count: batches.len() as u32,
                next_expiry: batches.first().map(|b| b.expiry_date),
            });
        }
        Ok(levels)
    }

    /// Usable batches that expire within `days` of `today`.
    pub fn expiring_within(&self, today: NaiveDate, days: u32) -> CoreResult<Vec<InventoryBatch>> {
        let until = today + Duration::days(i64::from(days));
        Ok(self.db.list_batches_expiring(today, until)?)
    }

    fn expiry_for(&self, collection_date: NaiveDate) -> CoreResult<NaiveDate> {
        collection_date
            .checked_add_signed(Duration::days(i64::from(self.config.shelf_life_days)))
            .ok_or_else(|| {
                CoreError::Validation(format!("Collection date {collection_date} out of range"))
            })
    }
}

fn receipt_line(batch: &InventoryBatch, units: u32) -> ReceiptLine {
    ReceiptLine {
        batch_id: batch.id.clone(),
        units,
        collection_date: batch.collection_date,
        expiry_date: batch.expiry_date,
        location: batch.location.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Actor;
    use chrono::{TimeZone, Utc};

    fn ctx() -> OpContext {
        OpContext::new(
            Actor::Admin("ops".into()),
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        )
    }

    fn deposit(group: BloodGroup, units: u32, days_ago: i64, location: &str) -> Deposit {
        Deposit {
            blood_group: group,
            units,
            collection_date: ctx().today() - Duration::days(days_ago),
            location: location.into(),
            source_donor_id: None,
        }
    }

    #[test]
    fn test_deposit_sets_expiry_and_augments() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);
        let ctx = ctx();

        let first = ledger
            .deposit(&ctx, deposit(BloodGroup::BPositive, 2, 0, "Fridge 1"))
            .unwrap();
        assert_eq!(first.expiry_date, ctx.today() + Duration::days(35));

        let second = ledger
            .deposit(&ctx, deposit(BloodGroup::BPositive, 3, 0, "Fridge 1"))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.units, 5);

        let elsewhere = ledger
            .deposit(&ctx, deposit(BloodGroup::BPositive, 1, 0, "Fridge 2"))
            .unwrap();
        assert_ne!(elsewhere.id, first.id);
        assert_eq!(
            ledger.total_available(BloodGroup::BPositive, ctx.today()).unwrap(),
            6
        );
    }

    #[test]
    fn test_deposit_rejects_bad_input() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);

        let zero = ledger.deposit(&ctx(), deposit(BloodGroup::OPositive, 0, 0, "main"));
        assert!(matches!(zero, Err(CoreError::Validation(_))));

        let hospital = OpContext::new(Actor::Hospital("h1".into()), ctx().now);
        let denied = ledger.deposit(&hospital, deposit(BloodGroup::OPositive, 1, 0, "main"));
        assert!(matches!(denied, Err(CoreError::Unauthorized(_))));
    }

    #[test]
    fn test_failed_allocation_touches_nothing() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);
        let ctx = ctx();

        ledger
            .deposit(&ctx, deposit(BloodGroup::ANegative, 2, 3, "main"))
            .unwrap();
        ledger
            .deposit(&ctx, deposit(BloodGroup::ANegative, 1, 1, "main"))
            .unwrap();
        let before = ledger.batches(BloodGroup::ANegative).unwrap();

        let result = ledger.try_allocate(&ctx, BloodGroup::ANegative, 4);
        match result {
            Err(CoreError::InsufficientInventory {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected insufficient inventory, got {other:?}"),
        }
        assert_eq!(ledger.batches(BloodGroup::ANegative).unwrap(), before);
    }

    #[test]
    fn test_expired_batches_are_not_allocated() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);
        let ctx = ctx();

        // collected 35 days ago: expires today
        ledger
            .deposit(&ctx, deposit(BloodGroup::OPositive, 4, 35, "main"))
            .unwrap();
        assert_eq!(
            ledger.total_available(BloodGroup::OPositive, ctx.today()).unwrap(),
            0
        );
        assert!(ledger.try_allocate(&ctx, BloodGroup::OPositive, 1).is_err());
    }

    #[test]
    fn test_restore_recreates_missing_batch() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);
        let ctx = ctx();

        let batch = ledger
            .deposit(&ctx, deposit(BloodGroup::AbPositive, 2, 2, "main"))
            .unwrap();
        let receipt = ledger.try_allocate(&ctx, BloodGroup::AbPositive, 2).unwrap();

        // purged by external housekeeping
        db.conn()
            .execute("DELETE FROM inventory_batches WHERE id = ?1", [&batch.id])
            .unwrap();

        assert_eq!(ledger.restore(&ctx, &receipt).unwrap(), 2);
        let restored = db.get_batch(&batch.id).unwrap().unwrap();
        assert_eq!(restored.units, 2);
        assert_eq!(restored.expiry_date, batch.expiry_date);
    }

    #[test]
    fn test_stock_summary_covers_every_group() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let ledger = InventoryLedger::new(&db, &config);
        let ctx = ctx();

        ledger
            .deposit(&ctx, deposit(BloodGroup::ONegative, 3, 30, "main"))
            .unwrap();
        let summary = ledger.stock_summary(ctx.today()).unwrap();
        assert_eq!(summary.len(), 8);

        let o_neg = summary
            .iter()
            .find(|level| level.blood_group == BloodGroup::ONegative)
            .unwrap();
        assert_eq!(o_neg.available_units, 3);
        assert_eq!(o_neg.next_expiry, Some(ctx.today() + Duration::days(5)));

        let expiring = ledger.expiring_within(ctx.today(), 7).unwrap();
        assert_eq!(expiring.len(), 1);
        assert!(ledger.expiring_within(ctx.today(), 4).unwrap().is_empty());
    }
}
