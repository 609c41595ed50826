//! Inventory batch database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, Database, DbError, DbResult};
use crate::models::{BloodGroup, InventoryBatch};

const BATCH_COLUMNS: &str = r#"
    id, blood_group, units, collection_date, expiry_date, location,
    source_donor_id, created_at, updated_at
"#;

impl Database {
    /// Insert a new batch.
    pub fn insert_batch(&self, batch: &InventoryBatch) -> DbResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO inventory_batches ({BATCH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                batch.id,
                batch.blood_group.as_str(),
                batch.units,
                batch.collection_date,
                batch.expiry_date,
                batch.location,
                batch.source_donor_id,
                batch.created_at,
                batch.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a batch by ID.
    pub fn get_batch(&self, id: &str) -> DbResult<Option<InventoryBatch>> {
        self.conn
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM inventory_batches WHERE id = ?"),
                [id],
                BatchRow::from_row,
            )
            .optional()?
            .map(InventoryBatch::try_from)
            .transpose()
    }

    /// Find the batch a deposit with this provenance should augment.
    pub fn find_matching_batch(
        &self,
        blood_group: BloodGroup,
        collection_date: NaiveDate,
        location: &str,
        source_donor_id: Option<&str>,
    ) -> DbResult<Option<InventoryBatch>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {BATCH_COLUMNS} FROM inventory_batches
                     WHERE blood_group = ?1 AND collection_date = ?2 AND location = ?3
                       AND source_donor_id IS ?4
                     ORDER BY created_at, id
                     LIMIT 1"
                ),
                params![blood_group.as_str(), collection_date, location, source_donor_id],
                BatchRow::from_row,
            )
            .optional()?
            .map(InventoryBatch::try_from)
            .transpose()
    }

    /// Add units to a batch. Returns `false` if the batch no longer exists.
    pub fn add_batch_units(&self, id: &str, units: u32, now: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE inventory_batches SET units = units + ?2, updated_at = ?3 WHERE id = ?1",
            params![id, units, now],
        )?;
        Ok(rows_affected > 0)
    }

    /// Take units from a batch only if it still holds at least that many.
    pub fn take_batch_units(&self, id: &str, units: u32, now: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE inventory_batches SET units = units - ?2, updated_at = ?3 WHERE id = ?1 AND units >= ?2",
            params![id, units, now],
        )?;
        Ok(rows_affected > 0)
    }

    /// Unexpired, non-empty batches of a group, soonest-to-expire first.
    pub fn list_allocatable_batches(
        &self,
        blood_group: BloodGroup,
        today: NaiveDate,
    ) -> DbResult<Vec<InventoryBatch>> {
        self.query_batches(
            "WHERE blood_group = ?1 AND units > 0 AND expiry_date > ?2
             ORDER BY expiry_date, collection_date, created_at, id",
            params![blood_group.as_str(), today],
        )
    }

    /// Every batch of a group, including exhausted and expired ones.
    pub fn list_batches(&self, blood_group: BloodGroup) -> DbResult<Vec<InventoryBatch>> {
        self.query_batches(
            "WHERE blood_group = ?1 ORDER BY expiry_date, created_at, id",
            params![blood_group.as_str()],
        )
    }

    /// Non-empty batches still usable today that expire on or before `until`.
    pub fn list_batches_expiring(
        &self,
        today: NaiveDate,
        until: NaiveDate,
    ) -> DbResult<Vec<InventoryBatch>> {
        self.query_batches(
            "WHERE units > 0 AND expiry_date > ?1 AND expiry_date <= ?2
             ORDER BY expiry_date, blood_group, id",
            params![today, until],
        )
    }

    /// Sum of units across unexpired batches of a group.
    pub fn available_units(&self, blood_group: BloodGroup, today: NaiveDate) -> DbResult<u32> {
        let total: u32 = self.conn.query_row(
            "SELECT COALESCE(SUM(units), 0) FROM inventory_batches
             WHERE blood_group = ?1 AND expiry_date > ?2",
            params![blood_group.as_str(), today],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn query_batches(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> DbResult<Vec<InventoryBatch>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {BATCH_COLUMNS} FROM inventory_batches {clause}"))?;
        let rows = stmt.query_map(params, BatchRow::from_row)?;

        let mut batches = Vec::new();
        for row in rows {
            batches.push(row?.try_into()?);
        }
        Ok(batches)
    }
}

/// Intermediate row struct for database mapping.
struct BatchRow {
    id: String,
    blood_group: String,
    units: u32,
    collection_date: NaiveDate,
    expiry_date: NaiveDate,
    location: String,
    source_donor_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            blood_group: row.get(1)?,
            units: row.get(2)?,
            collection_date: row.get(3)?,
            expiry_date: row.get(4)?,
            location: row.get(5)?,
            source_donor_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl TryFrom<BatchRow> for InventoryBatch {
    type Error = DbError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        Ok(InventoryBatch {
            blood_group: parse_column("blood group", &row.blood_group, BloodGroup::parse)?,
            id: row.id,
            units: row.units,
            collection_date: row.collection_date,
            expiry_date: row.expiry_date,
            location: row.location,
            source_donor_id: row.source_donor_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
