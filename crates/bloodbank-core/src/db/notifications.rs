//! Notification database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, Database, DbError, DbResult};
use crate::models::{Notification, NotificationKind, NotificationStatus, ResponseAction};

const NOTIFICATION_COLUMNS: &str = r#"
    id, donor_id, request_id, appointment_id, kind, status, response_action,
    responded_at, message_id, created_at, sent_at, expires_at
"#;

impl Database {
    /// Insert a new notification.
    pub fn insert_notification(&self, notification: &Notification) -> DbResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
                )"
            ),
            params![
                notification.id,
                notification.donor_id,
                notification.request_id,
                notification.appointment_id,
                notification.kind.as_str(),
                notification.status.as_str(),
                notification.response_action.map(|a| a.as_str()),
                notification.responded_at,
                notification.message_id,
                notification.created_at,
                notification.sent_at,
                notification.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Write a notification's status fields if it still has `expected_status`.
    pub fn update_notification_cas(
        &self,
        notification: &Notification,
        expected_status: NotificationStatus,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE notifications SET
                status = ?3,
                response_action = ?4,
                responded_at = ?5,
                message_id = ?6,
                sent_at = ?7,
                appointment_id = ?8
            WHERE id = ?1 AND status = ?2
            "#,
            params![
                notification.id,
                expected_status.as_str(),
                notification.status.as_str(),
                notification.response_action.map(|a| a.as_str()),
                notification.responded_at,
                notification.message_id,
                notification.sent_at,
                notification.appointment_id,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a notification by ID.
    pub fn get_notification(&self, id: &str) -> DbResult<Option<Notification>> {
        self.conn
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"),
                [id],
                NotificationRow::from_row,
            )
            .optional()?
            .map(Notification::try_from)
            .transpose()
    }

    /// Every notification sent for a request, oldest first.
    pub fn list_notifications_for_request(&self, request_id: &str) -> DbResult<Vec<Notification>> {
        self.query_notifications(
            "WHERE request_id = ?1 ORDER BY created_at, id",
            params![request_id],
        )
    }

    /// Every notification sent to a donor, newest first.
    pub fn list_notifications_for_donor(&self, donor_id: &str) -> DbResult<Vec<Notification>> {
        self.query_notifications(
            "WHERE donor_id = ?1 ORDER BY created_at DESC, id",
            params![donor_id],
        )
    }

    fn query_notifications(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> DbResult<Vec<Notification>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications {clause}"))?;
        let rows = stmt.query_map(params, NotificationRow::from_row)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?.try_into()?);
        }
        Ok(notifications)
    }
}

/// Intermediate row struct for database mapping.
struct NotificationRow {
    id: String,
    donor_id: String,
    request_id: Option<String>,
    appointment_id: Option<String>,
    kind: String,
    status: String,
    response_action: Option<String>,
    responded_at: Option<DateTime<Utc>>,
    message_id: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl NotificationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            donor_id: row.get(1)?,
            request_id: row.get(2)?,
            appointment_id: row.get(3)?,
            kind: row.get(4)?,
            status: row.get(5)?,
            response_action: row.get(6)?,
            responded_at: row.get(7)?,
            message_id: row.get(8)?,
            created_at: row.get(9)?,
            sent_at: row.get(10)?,
            expires_at: row.get(11)?,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = DbError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let response_action = row
            .response_action
            .as_deref()
            .map(|raw| parse_column("response action", raw, ResponseAction::parse))
            .transpose()?;

        Ok(Notification {
            kind: parse_column("notification kind", &row.kind, NotificationKind::parse)?,
            status: parse_column("notification status", &row.status, NotificationStatus::parse)?,
            response_action,
            id: row.id,
            donor_id: row.donor_id,
            request_id: row.request_id,
            appointment_id: row.appointment_id,
            responded_at: row.responded_at,
            message_id: row.message_id,
            created_at: row.created_at,
            sent_at: row.sent_at,
            expires_at: row.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodGroup, Donor};
    use chrono::Duration;

    #[test]
    fn test_notification_round_trip_and_cas() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let donor = Donor::new("Ada".into(), BloodGroup::OPositive, now);
        db.insert_donor(&donor).unwrap();

        let mut notification = Notification {
            id: "n1".into(),
            donor_id: donor.id.clone(),
            request_id: None,
            appointment_id: None,
            kind: NotificationKind::DonationOutreach,
            status: NotificationStatus::Sent,
            response_action: None,
            responded_at: None,
            message_id: Some("msg-000001".into()),
            created_at: now,
            sent_at: Some(now),
            expires_at: now + Duration::hours(48),
        };
        db.insert_notification(&notification).unwrap();

        notification.status = NotificationStatus::Responded;
        notification.response_action = Some(ResponseAction::Accept);
        notification.responded_at = Some(now);
        assert!(db
            .update_notification_cas(&notification, NotificationStatus::Sent)
            .unwrap());
        assert!(!db
            .update_notification_cas(&notification, NotificationStatus::Sent)
            .unwrap());

        let stored = db.get_notification("n1").unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Responded);
        assert_eq!(stored.response_action, Some(ResponseAction::Accept));
        assert_eq!(db.list_notifications_for_donor(&donor.id).unwrap().len(), 1);
    }
}
