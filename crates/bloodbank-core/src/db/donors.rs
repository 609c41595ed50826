//! Donor and donation history database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, Database, DbError, DbResult};
use crate::models::{BloodGroup, DonationRecord, Donor};

const DONOR_COLUMNS: &str =
    "id, name, blood_group, contact, active, last_donation_date, created_at, updated_at";

const DONATION_COLUMNS: &str = r#"
    id, donor_id, appointment_id, request_id, batch_id, units, donated_on,
    location, notes, recorded_at
"#;

impl Database {
    /// Insert a new donor.
    pub fn insert_donor(&self, donor: &Donor) -> DbResult<()> {
        self.conn.execute(
            &format!("INSERT INTO donors ({DONOR_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                donor.id,
                donor.name,
                donor.blood_group.as_str(),
                donor.contact,
                donor.active,
                donor.last_donation_date,
                donor.created_at,
                donor.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update an existing donor's mutable fields.
    pub fn update_donor(&self, donor: &Donor) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE donors SET
                name = ?2,
                contact = ?3,
                active = ?4,
                last_donation_date = ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                donor.id,
                donor.name,
                donor.contact,
                donor.active,
                donor.last_donation_date,
                donor.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a donor by ID.
    pub fn get_donor(&self, id: &str) -> DbResult<Option<Donor>> {
        self.conn
            .query_row(
                &format!("SELECT {DONOR_COLUMNS} FROM donors WHERE id = ?"),
                [id],
                DonorRow::from_row,
            )
            .optional()?
            .map(Donor::try_from)
            .transpose()
    }

    /// Active donors of a blood group, longest since last donation first.
    pub fn list_active_donors_by_group(&self, blood_group: BloodGroup) -> DbResult<Vec<Donor>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DONOR_COLUMNS} FROM donors
             WHERE blood_group = ?1 AND active = 1
             ORDER BY last_donation_date IS NOT NULL, last_donation_date, name, id"
        ))?;
        let rows = stmt.query_map([blood_group.as_str()], DonorRow::from_row)?;

        let mut donors = Vec::new();
        for row in rows {
            donors.push(row?.try_into()?);
        }
        Ok(donors)
    }

    /// Append a donation to a donor's history.
    pub fn insert_donation(&self, donation: &DonationRecord) -> DbResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO donations ({DONATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                donation.id,
                donation.donor_id,
                donation.appointment_id,
                donation.request_id,
                donation.batch_id,
                donation.units,
                donation.donated_on,
                donation.location,
                donation.notes,
                donation.recorded_at,
            ],
        )?;
        Ok(())
    }

    /// A donor's donations in the order they happened.
    pub fn list_donations_for_donor(&self, donor_id: &str) -> DbResult<Vec<DonationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE donor_id = ?1 ORDER BY donated_on, recorded_at"
        ))?;
        let rows = stmt.query_map([donor_id], donation_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Donations booked against a request.
    pub fn list_donations_for_request(&self, request_id: &str) -> DbResult<Vec<DonationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE request_id = ?1 ORDER BY recorded_at"
        ))?;
        let rows = stmt.query_map([request_id], donation_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn donation_from_row(row: &Row<'_>) -> rusqlite::Result<DonationRecord> {
    Ok(DonationRecord {
        id: row.get(0)?,
        donor_id: row.get(1)?,
        appointment_id: row.get(2)?,
        request_id: row.get(3)?,
        batch_id: row.get(4)?,
        units: row.get(5)?,
        donated_on: row.get(6)?,
        location: row.get(7)?,
        notes: row.get(8)?,
        recorded_at: row.get(9)?,
    })
}

/// Intermediate row struct for database mapping.
struct DonorRow {
    id: String,
    name: String,
    blood_group: String,
    contact: Option<String>,
    active: bool,
    last_donation_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DonorRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            blood_group: row.get(2)?,
            contact: row.get(3)?,
            active: row.get(4)?,
            last_donation_date: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl TryFrom<DonorRow> for Donor {
    type Error = DbError;

    fn try_from(row: DonorRow) -> Result<Self, Self::Error> {
        Ok(Donor {
            blood_group: parse_column("blood group", &row.blood_group, BloodGroup::parse)?,
            id: row.id,
            name: row.name,
            contact: row.contact,
            active: row.active,
            last_donation_date: row.last_donation_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
