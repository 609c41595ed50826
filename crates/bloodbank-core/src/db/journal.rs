//! Append-only, hash-chained journal of request transitions.
//!
//! Every event stores the hash of its predecessor, so editing or removing a past event
//! breaks every hash after it. The schema forbids UPDATE and DELETE on the table; the chain
//! catches tampering that bypasses those triggers.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{parse_column, Database, DbError, DbResult};
use crate::models::RequestStatus;

/// A transition about to be journaled.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub request_id: String,
    /// `None` for creation
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    /// Label of the acting party, e.g. `admin:ops-1`
    pub actor: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// A stored journal event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEvent {
    pub seq: i64,
    pub request_id: String,
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    pub actor: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub hash: String,
}

/// Outcome of walking the whole chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub events_checked: usize,
    /// Sequence number of the first event whose hash does not match its content
    pub first_broken_seq: Option<i64>,
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        self.first_broken_seq.is_none()
    }
}

/// Canonical hashed form of an event.
#[derive(Serialize)]
struct HashedEvent<'a> {
    prev_hash: Option<&'a str>,
    request_id: &'a str,
    from_status: Option<&'a str>,
    to_status: &'a str,
    actor: &'a str,
    detail: Option<&'a str>,
    at: String,
}

fn event_hash(prev_hash: Option<&str>, entry: &JournalEntry) -> DbResult<String> {
    let canonical = serde_json::to_vec(&HashedEvent {
        prev_hash,
        request_id: &entry.request_id,
        from_status: entry.from_status.map(|s| s.as_str()),
        to_status: entry.to_status.as_str(),
        actor: &entry.actor,
        detail: entry.detail.as_deref(),
        at: entry.at.to_rfc3339_opts(SecondsFormat::Nanos, true),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

const EVENT_COLUMNS: &str =
    "seq, request_id, from_status, to_status, actor, detail, at, prev_hash, hash";

impl Database {
    /// Append an event, chaining it to the latest event in the journal.
    pub fn append_request_event(&self, entry: &JournalEntry) -> DbResult<RequestEvent> {
        let prev_hash: Option<String> = self
            .conn
            .query_row(
                "SELECT hash FROM request_events ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let hash = event_hash(prev_hash.as_deref(), entry)?;

        self.conn.execute(
            "INSERT INTO request_events (request_id, from_status, to_status, actor, detail, at, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.request_id,
                entry.from_status.map(|s| s.as_str()),
                entry.to_status.as_str(),
                entry.actor,
                entry.detail,
                entry.at,
                prev_hash,
                hash,
            ],
        )?;

        Ok(RequestEvent {
            seq: self.conn.last_insert_rowid(),
            request_id: entry.request_id.clone(),
            from_status: entry.from_status,
            to_status: entry.to_status,
            actor: entry.actor.clone(),
            detail: entry.detail.clone(),
            at: entry.at,
            prev_hash,
            hash,
        })
    }

    /// A request's transition history, oldest first.
    pub fn list_request_events(&self, request_id: &str) -> DbResult<Vec<RequestEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM request_events WHERE request_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt.query_map([request_id], EventRow::from_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.try_into()?);
        }
        Ok(events)
    }

    /// Recompute every hash in order and report the first mismatch.
    pub fn verify_journal_chain(&self) -> DbResult<ChainVerification> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {EVENT_COLUMNS} FROM request_events ORDER BY seq"))?;
        let rows = stmt.query_map([], EventRow::from_row)?;

        let mut expected_prev: Option<String> = None;
        let mut events_checked = 0;
        for row in rows {
            let event: RequestEvent = row?.try_into()?;
            events_checked += 1;

            let entry = JournalEntry {
                request_id: event.request_id.clone(),
                from_status: event.from_status,
                to_status: event.to_status,
                actor: event.actor.clone(),
                detail: event.detail.clone(),
                at: event.at,
            };
            let recomputed = event_hash(expected_prev.as_deref(), &entry)?;
            if event.prev_hash != expected_prev || recomputed != event.hash {
                return Ok(ChainVerification {
                    events_checked,
                    first_broken_seq: Some(event.seq),
                });
            }
            expected_prev = Some(event.hash);
        }

        Ok(ChainVerification {
            events_checked,
            first_broken_seq: None,
        })
    }
}

/// Intermediate row struct for database mapping.
struct EventRow {
    seq: i64,
    request_id: String,
    from_status: Option<String>,
    to_status: String,
    actor: String,
    detail: Option<String>,
    at: DateTime<Utc>,
    prev_hash: Option<String>,
    hash: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            request_id: row.get(1)?,
            from_status: row.get(2)?,
            to_status: row.get(3)?,
            actor: row.get(4)?,
            detail: row.get(5)?,
            at: row.get(6)?,
            prev_hash: row.get(7)?,
            hash: row.get(8)?,
        })
    }
}

impl TryFrom<EventRow> for RequestEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let from_status = row
            .from_status
            .as_deref()
            .map(|raw| parse_column("request status", raw, RequestStatus::parse))
            .transpose()?;

        Ok(RequestEvent {
            seq: row.seq,
            request_id: row.request_id,
            from_status,
            to_status: parse_column("request status", &row.to_status, RequestStatus::parse)?,
            actor: row.actor,
            detail: row.detail,
            at: row.at,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}
