//! Blood request database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_column, Database, DbError, DbResult};
use crate::models::{
    AllocationReceipt, BloodGroup, BloodRequest, CollectionPlan, Fulfillment, RequestStatus,
    Requester, RequesterKind, RescheduleRequest, Urgency,
};

const REQUEST_COLUMNS: &str = r#"
    id, requester_kind, requester_id, blood_group, units_requested, urgency, status,
    patient_name, notes, units_collected, awaiting_donors, allocation, fulfillment,
    decided_by, decided_at, rejection_reason,
    collection_date, collection_location, collection_instructions,
    collected_at, verified_by, verified_at,
    reschedule_date, reschedule_reason, reschedule_requested_at,
    closure_reason, closed_by, closed_at,
    version, created_at, updated_at
"#;

impl Database {
    /// Insert a new blood request.
    pub fn insert_request(&self, request: &BloodRequest) -> DbResult<()> {
        let allocation_json = allocation_to_json(request.allocation.as_ref())?;
        let collection = request.collection.as_ref();
        let reschedule = request.reschedule.as_ref();

        self.conn.execute(
            &format!(
                "INSERT INTO blood_requests ({REQUEST_COLUMNS}) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31
                )"
            ),
            params![
                request.id,
                request.requester.kind.as_str(),
                request.requester.id,
                request.blood_group.as_str(),
                request.units_requested,
                request.urgency.as_str(),
                request.status.as_str(),
                request.patient_name,
                request.notes,
                request.units_collected,
                request.awaiting_donors,
                allocation_json,
                request.fulfillment.map(|f| f.as_str()),
                request.decided_by,
                request.decided_at,
                request.rejection_reason,
                collection.map(|c| c.date),
                collection.map(|c| c.location.as_str()),
                collection.and_then(|c| c.instructions.as_deref()),
                request.collected_at,
                request.verified_by,
                request.verified_at,
                reschedule.map(|r| r.requested_date),
                reschedule.map(|r| r.reason.as_str()),
                reschedule.map(|r| r.requested_at),
                request.closure_reason,
                request.closed_by,
                request.closed_at,
                request.version,
                request.created_at,
                request.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-set write of every mutable column.
    ///
    /// Succeeds only if the stored row still has `expected_status` and `expected_version`;
    /// the stored version becomes `expected_version + 1`. Returns `false` when the row
    /// changed underneath the caller.
    pub fn update_request_cas(
        &self,
        request: &BloodRequest,
        expected_status: RequestStatus,
        expected_version: u32,
    ) -> DbResult<bool> {
        let allocation_json = allocation_to_json(request.allocation.as_ref())?;
        let collection = request.collection.as_ref();
        let reschedule = request.reschedule.as_ref();

        let rows_affected = self.conn.execute(
            r#"
            UPDATE blood_requests SET
                status = ?4,
                units_collected = ?5,
                awaiting_donors = ?6,
                allocation = ?7,
                fulfillment = ?8,
                decided_by = ?9,
                decided_at = ?10,
                rejection_reason = ?11,
                collection_date = ?12,
                collection_location = ?13,
                collection_instructions = ?14,
                collected_at = ?15,
                verified_by = ?16,
                verified_at = ?17,
                reschedule_date = ?18,
                reschedule_reason = ?19,
                reschedule_requested_at = ?20,
                closure_reason = ?21,
                closed_by = ?22,
                closed_at = ?23,
                updated_at = ?24,
                version = version + 1
            WHERE id = ?1 AND status = ?2 AND version = ?3
            "#,
            params![
                request.id,
                expected_status.as_str(),
                expected_version,
                request.status.as_str(),
                request.units_collected,
                request.awaiting_donors,
                allocation_json,
                request.fulfillment.map(|f| f.as_str()),
                request.decided_by,
                request.decided_at,
                request.rejection_reason,
                collection.map(|c| c.date),
                collection.map(|c| c.location.as_str()),
                collection.and_then(|c| c.instructions.as_deref()),
                request.collected_at,
                request.verified_by,
                request.verified_at,
                reschedule.map(|r| r.requested_date),
                reschedule.map(|r| r.reason.as_str()),
                reschedule.map(|r| r.requested_at),
                request.closure_reason,
                request.closed_by,
                request.closed_at,
                request.updated_at,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a request by ID.
    pub fn get_request(&self, id: &str) -> DbResult<Option<BloodRequest>> {
        self.conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM blood_requests WHERE id = ?"),
                [id],
                RequestRow::from_row,
            )
            .optional()?
            .map(BloodRequest::try_from)
            .transpose()
    }

    /// List requests in a status, oldest first.
    pub fn list_requests_by_status(&self, status: RequestStatus) -> DbResult<Vec<BloodRequest>> {
        self.query_requests(
            "WHERE status = ?1 ORDER BY created_at, id",
            params![status.as_str()],
        )
    }

    /// Pending requests flagged for donor outreach, most urgent first.
    pub fn list_requests_awaiting_donors(&self) -> DbResult<Vec<BloodRequest>> {
        let mut requests = self.query_requests(
            "WHERE status = 'pending' AND awaiting_donors = 1 ORDER BY created_at, id",
            params![],
        )?;
        requests.sort_by(|a, b| b.urgency.cmp(&a.urgency));
        Ok(requests)
    }

    /// Approved requests with a reschedule awaiting an admin decision.
    pub fn list_reschedule_requests(&self) -> DbResult<Vec<BloodRequest>> {
        self.query_requests(
            "WHERE status = 'approved' AND reschedule_date IS NOT NULL ORDER BY reschedule_requested_at, id",
            params![],
        )
    }

    /// Requests raised by one requester, newest first.
    pub fn list_requests_for_requester(&self, requester: &Requester) -> DbResult<Vec<BloodRequest>> {
        self.query_requests(
            "WHERE requester_kind = ?1 AND requester_id = ?2 ORDER BY created_at DESC, id",
            params![requester.kind.as_str(), requester.id],
        )
    }

    fn query_requests(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> DbResult<Vec<BloodRequest>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {REQUEST_COLUMNS} FROM blood_requests {clause}"))?;
        let rows = stmt.query_map(params, RequestRow::from_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }
}

fn allocation_to_json(allocation: Option<&AllocationReceipt>) -> DbResult<Option<String>> {
    allocation
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

/// Intermediate row struct for database mapping.
struct RequestRow {
    id: String,
    requester_kind: String,
    requester_id: String,
    blood_group: String,
    units_requested: u32,
    urgency: String,
    status: String,
    patient_name: Option<String>,
    notes: Option<String>,
    units_collected: u32,
    awaiting_donors: bool,
    allocation: Option<String>,
    fulfillment: Option<String>,
    decided_by: Option<String>,
    decided_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    collection_date: Option<NaiveDate>,
    collection_location: Option<String>,
    collection_instructions: Option<String>,
    collected_at: Option<DateTime<Utc>>,
    verified_by: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    reschedule_date: Option<NaiveDate>,
    reschedule_reason: Option<String>,
    reschedule_requested_at: Option<DateTime<Utc>>,
    closure_reason: Option<String>,
    closed_by: Option<String>,
    closed_at: Option<DateTime<Utc>>,
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            requester_kind: row.get(1)?,
            requester_id: row.get(2)?,
            blood_group: row.get(3)?,
            units_requested: row.get(4)?,
            urgency: row.get(5)?,
            status: row.get(6)?,
            patient_name: row.get(7)?,
            notes: row.get(8)?,
            units_collected: row.get(9)?,
            awaiting_donors: row.get(10)?,
            allocation: row.get(11)?,
            fulfillment: row.get(12)?,
            decided_by: row.get(13)?,
            decided_at: row.get(14)?,
            rejection_reason: row.get(15)?,
            collection_date: row.get(16)?,
            collection_location: row.get(17)?,
            collection_instructions: row.get(18)?,
            collected_at: row.get(19)?,
            verified_by: row.get(20)?,
            verified_at: row.get(21)?,
            reschedule_date: row.get(22)?,
            reschedule_reason: row.get(23)?,
            reschedule_requested_at: row.get(24)?,
            closure_reason: row.get(25)?,
            closed_by: row.get(26)?,
            closed_at: row.get(27)?,
            version: row.get(28)?,
            created_at: row.get(29)?,
            updated_at: row.get(30)?,
        })
    }
}

impl TryFrom<RequestRow> for BloodRequest {
    type Error = DbError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let allocation = row
            .allocation
            .as_deref()
            .map(serde_json::from_str::<AllocationReceipt>)
            .transpose()?;

        let fulfillment = row
            .fulfillment
            .as_deref()
            .map(|raw| parse_column("fulfillment", raw, Fulfillment::parse))
            .transpose()?;

        let collection = match (row.collection_date, row.collection_location) {
            (Some(date), Some(location)) => Some(CollectionPlan {
                date,
                location,
                instructions: row.collection_instructions,
            }),
            _ => None,
        };

        let reschedule = match (row.reschedule_date, row.reschedule_requested_at) {
            (Some(requested_date), Some(requested_at)) => Some(RescheduleRequest {
                requested_date,
                reason: row.reschedule_reason.unwrap_or_default(),
                requested_at,
            }),
            _ => None,
        };

        Ok(BloodRequest {
            requester: Requester {
                kind: parse_column("requester kind", &row.requester_kind, RequesterKind::parse)?,
                id: row.requester_id,
            },
            blood_group: parse_column("blood group", &row.blood_group, BloodGroup::parse)?,
            urgency: parse_column("urgency", &row.urgency, Urgency::parse)?,
            status: parse_column("request status", &row.status, RequestStatus::parse)?,
            id: row.id,
            units_requested: row.units_requested,
            patient_name: row.patient_name,
            notes: row.notes,
            units_collected: row.units_collected,
            awaiting_donors: row.awaiting_donors,
            allocation,
            fulfillment,
            decided_by: row.decided_by,
            decided_at: row.decided_at,
            rejection_reason: row.rejection_reason,
            collection,
            collected_at: row.collected_at,
            verified_by: row.verified_by,
            verified_at: row.verified_at,
            reschedule,
            closure_reason: row.closure_reason,
            closed_by: row.closed_by,
            closed_at: row.closed_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
