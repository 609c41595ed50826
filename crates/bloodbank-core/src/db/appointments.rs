//! Appointment database operations.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, Database, DbError, DbResult};
use crate::models::{Appointment, AppointmentStatus};

const APPOINTMENT_COLUMNS: &str = r#"
    id, donor_id, request_id, notification_id, scheduled_date, scheduled_time, location,
    status, units_collected, admin_notes, cancellation_reason, created_by, completed_at,
    version, created_at, updated_at
"#;

impl Database {
    /// Insert a new appointment.
    pub fn insert_appointment(&self, appointment: &Appointment) -> DbResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO appointments ({APPOINTMENT_COLUMNS}) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16
                )"
            ),
            params![
                appointment.id,
                appointment.donor_id,
                appointment.request_id,
                appointment.notification_id,
                appointment.scheduled_date,
                appointment.scheduled_time,
                appointment.location,
                appointment.status.as_str(),
                appointment.units_collected,
                appointment.admin_notes,
                appointment.cancellation_reason,
                appointment.created_by,
                appointment.completed_at,
                appointment.version,
                appointment.created_at,
                appointment.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-set write of an appointment's mutable columns.
    pub fn update_appointment_cas(
        &self,
        appointment: &Appointment,
        expected_status: AppointmentStatus,
        expected_version: u32,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE appointments SET
                status = ?4,
                units_collected = ?5,
                admin_notes = ?6,
                cancellation_reason = ?7,
                completed_at = ?8,
                location = ?9,
                updated_at = ?10,
                version = version + 1
            WHERE id = ?1 AND status = ?2 AND version = ?3
            "#,
            params![
                appointment.id,
                expected_status.as_str(),
                expected_version,
                appointment.status.as_str(),
                appointment.units_collected,
                appointment.admin_notes,
                appointment.cancellation_reason,
                appointment.completed_at,
                appointment.location,
                appointment.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get an appointment by ID.
    pub fn get_appointment(&self, id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"),
                [id],
                AppointmentRow::from_row,
            )
            .optional()?
            .map(Appointment::try_from)
            .transpose()
    }

    /// The donor's scheduled, confirmed or in-progress appointment, if any.
    pub fn open_appointment_for_donor(&self, donor_id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                     WHERE donor_id = ?1 AND status IN ('scheduled', 'confirmed', 'in_progress')
                     LIMIT 1"
                ),
                [donor_id],
                AppointmentRow::from_row,
            )
            .optional()?
            .map(Appointment::try_from)
            .transpose()
    }

    /// A donor's appointments, newest first.
    pub fn list_appointments_for_donor(&self, donor_id: &str) -> DbResult<Vec<Appointment>> {
        self.query_appointments(
            "WHERE donor_id = ?1 ORDER BY scheduled_date DESC, scheduled_time DESC",
            params![donor_id],
        )
    }

    /// Appointments booked against a request.
    pub fn list_appointments_for_request(&self, request_id: &str) -> DbResult<Vec<Appointment>> {
        self.query_appointments(
            "WHERE request_id = ?1 ORDER BY scheduled_date, scheduled_time",
            params![request_id],
        )
    }

    /// Open appointments on or after `from`, in calendar order.
    pub fn list_upcoming_appointments(&self, from: NaiveDate) -> DbResult<Vec<Appointment>> {
        self.query_appointments(
            "WHERE scheduled_date >= ?1 AND status IN ('scheduled', 'confirmed', 'in_progress')
             ORDER BY scheduled_date, scheduled_time",
            params![from],
        )
    }

    fn query_appointments(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> DbResult<Vec<Appointment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments {clause}"))?;
        let rows = stmt.query_map(params, AppointmentRow::from_row)?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.try_into()?);
        }
        Ok(appointments)
    }
}

/// Intermediate row struct for database mapping.
struct AppointmentRow {
    id: String,
    donor_id: String,
    request_id: Option<String>,
    notification_id: Option<String>,
    scheduled_date: NaiveDate,
    scheduled_time: NaiveTime,
    location: String,
    status: String,
    units_collected: Option<u32>,
    admin_notes: Option<String>,
    cancellation_reason: Option<String>,
    created_by: String,
    completed_at: Option<DateTime<Utc>>,
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AppointmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            donor_id: row.get(1)?,
            request_id: row.get(2)?,
            notification_id: row.get(3)?,
            scheduled_date: row.get(4)?,
            scheduled_time: row.get(5)?,
            location: row.get(6)?,
            status: row.get(7)?,
            units_collected: row.get(8)?,
            admin_notes: row.get(9)?,
            cancellation_reason: row.get(10)?,
            created_by: row.get(11)?,
            completed_at: row.get(12)?,
            version: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            status: parse_column("appointment status", &row.status, AppointmentStatus::parse)?,
            id: row.id,
            donor_id: row.donor_id,
            request_id: row.request_id,
            notification_id: row.notification_id,
            scheduled_date: row.scheduled_date,
            scheduled_time: row.scheduled_time,
            location: row.location,
            units_collected: row.units_collected,
            admin_notes: row.admin_notes,
            cancellation_reason: row.cancellation_reason,
            created_by: row.created_by,
            completed_at: row.completed_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodGroup, Donor};

    fn setup() -> (Database, Donor) {
        let db = Database::open_in_memory().unwrap();
        let donor = Donor::new("Ada".into(), BloodGroup::OPositive, Utc::now());
        db.insert_donor(&donor).unwrap();
        (db, donor)
    }

    fn appointment(donor_id: &str, date: NaiveDate) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            donor_id: donor_id.to_string(),
            request_id: None,
            notification_id: None,
            scheduled_date: date,
            scheduled_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            location: "Main hall".into(),
            status: AppointmentStatus::Scheduled,
            units_collected: None,
            admin_notes: None,
            cancellation_reason: None,
            created_by: "admin:ops".into(),
            completed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get_appointment() {
        let (db, donor) = setup();
        let appt = appointment(&donor.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        db.insert_appointment(&appt).unwrap();

        let stored = db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(stored, appt);
        assert_eq!(
            db.open_appointment_for_donor(&donor.id).unwrap().map(|a| a.id),
            Some(appt.id)
        );
    }

    #[test]
    fn test_update_cas_rejects_stale_version() {
        let (db, donor) = setup();
        let mut appt = appointment(&donor.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        db.insert_appointment(&appt).unwrap();

        appt.status = AppointmentStatus::Confirmed;
        assert!(db
            .update_appointment_cas(&appt, AppointmentStatus::Scheduled, 0)
            .unwrap());
        // second writer still holding version 0
        assert!(!db
            .update_appointment_cas(&appt, AppointmentStatus::Scheduled, 0)
            .unwrap());

        let stored = db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Confirmed);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_closed_appointments_free_the_donor() {
        let (db, donor) = setup();
        let mut first = appointment(&donor.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        db.insert_appointment(&first).unwrap();

        let second = appointment(&donor.id, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert!(db.insert_appointment(&second).is_err());

        first.status = AppointmentStatus::Cancelled;
        assert!(db
            .update_appointment_cas(&first, AppointmentStatus::Scheduled, 0)
            .unwrap());
        db.insert_appointment(&second).unwrap();

        let upcoming = db
            .list_upcoming_appointments(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
            .unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, second.id);
        assert_eq!(db.list_appointments_for_donor(&donor.id).unwrap().len(), 2);
    }
}
