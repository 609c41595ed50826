//! Inventory batch and allocation receipt models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::blood_group::BloodGroup;

/// Units of one blood group sharing a collection date, and so a common expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryBatch {
    pub id: String,
    pub blood_group: BloodGroup,
    /// Never negative; zero means exhausted
    pub units: u32,
    pub collection_date: NaiveDate,
    /// collection_date + shelf life
    pub expiry_date: NaiveDate,
    pub location: String,
    /// Provenance link to the donor, if the batch came from a donation
    pub source_donor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryBatch {
    /// A batch stops being usable on its expiry date.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        today >= self.expiry_date
    }

    pub fn is_allocatable(&self, today: NaiveDate) -> bool {
        self.units > 0 && !self.is_expired(today)
    }
}

/// One batch's share of an allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptLine {
    pub batch_id: String,
    pub units: u32,
    /// Kept so a restore can rebuild the batch if it no longer exists
    pub collection_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub location: String,
}

/// Record of which batches an allocation drew from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationReceipt {
    pub blood_group: BloodGroup,
    pub lines: Vec<ReceiptLine>,
}

impl AllocationReceipt {
    pub fn empty(blood_group: BloodGroup) -> Self {
        Self {
            blood_group,
            lines: Vec::new(),
        }
    }

    pub fn total_units(&self) -> u32 {
        self.lines.iter().map(|line| line.units).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_units() == 0
    }

    /// Fold another receipt of the same group into this one, combining lines per batch.
    pub fn merge(&mut self, other: AllocationReceipt) {
        for line in other.lines {
            match self
                .lines
                .iter_mut()
                .find(|existing| existing.batch_id == line.batch_id)
            {
                Some(existing) => existing.units += line.units,
                None => self.lines.push(line),
            }
        }
    }
}

/// Available stock for one blood group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockLevel {
    pub blood_group: BloodGroup,
    pub available_units: u32,
    pub batch_count: u32,
    pub next_expiry: Option<NaiveDate>,
}

/// Input for a deposit.
#[derive(Debug, Clone, PartialEq)]
pub struct Deposit {
    pub blood_group: BloodGroup,
    pub units: u32,
    pub collection_date: NaiveDate,
    pub location: String,
    pub source_donor_id: Option<String>,
}
