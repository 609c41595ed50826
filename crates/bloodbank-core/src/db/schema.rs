//! SQLite schema definition.

/// Complete database schema for the blood-bank core.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Donors
-- ============================================================================

CREATE TABLE IF NOT EXISTS donors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    blood_group TEXT NOT NULL,
    contact TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    last_donation_date TEXT,                     -- eligibility is derived from this, never stored
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_donors_group ON donors(blood_group, active);

-- ============================================================================
-- Blood Requests
-- ============================================================================

CREATE TABLE IF NOT EXISTS blood_requests (
    id TEXT PRIMARY KEY,
    requester_kind TEXT NOT NULL CHECK (requester_kind IN ('hospital', 'external', 'admin')),
    requester_id TEXT NOT NULL,
    blood_group TEXT NOT NULL,
    units_requested INTEGER NOT NULL CHECK (units_requested >= 1),
    urgency TEXT NOT NULL,
    status TEXT NOT NULL,                        -- pending, approved, collected, verified, rejected, cancelled, no_show
    patient_name TEXT,
    notes TEXT,
    units_collected INTEGER NOT NULL DEFAULT 0
        CHECK (units_collected >= 0 AND units_collected <= units_requested),
    awaiting_donors INTEGER NOT NULL DEFAULT 0,
    allocation TEXT,                             -- JSON AllocationReceipt
    fulfillment TEXT,                            -- stock, donations
    decided_by TEXT,
    decided_at TEXT,
    rejection_reason TEXT,
    collection_date TEXT,
    collection_location TEXT,
    collection_instructions TEXT,
    collected_at TEXT,
    verified_by TEXT,
    verified_at TEXT,
    reschedule_date TEXT,                        -- non-NULL while a reschedule awaits a decision
    reschedule_reason TEXT,
    reschedule_requested_at TEXT,
    closure_reason TEXT,
    closed_by TEXT,
    closed_at TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_requests_status ON blood_requests(status);
CREATE INDEX IF NOT EXISTS idx_requests_requester ON blood_requests(requester_kind, requester_id);

-- ============================================================================
-- Inventory
-- ============================================================================

CREATE TABLE IF NOT EXISTS inventory_batches (
    id TEXT PRIMARY KEY,
    blood_group TEXT NOT NULL,
    units INTEGER NOT NULL CHECK (units >= 0),
    collection_date TEXT NOT NULL,
    expiry_date TEXT NOT NULL CHECK (expiry_date > collection_date),
    location TEXT NOT NULL,
    source_donor_id TEXT REFERENCES donors(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- FIFO allocation walks this index
CREATE INDEX IF NOT EXISTS idx_batches_fifo ON inventory_batches(blood_group, expiry_date);

-- ============================================================================
-- Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    donor_id TEXT NOT NULL REFERENCES donors(id),
    request_id TEXT REFERENCES blood_requests(id),
    notification_id TEXT,
    scheduled_date TEXT NOT NULL,
    scheduled_time TEXT NOT NULL,
    location TEXT NOT NULL,
    status TEXT NOT NULL,                        -- scheduled, confirmed, in_progress, completed, no_show, cancelled
    units_collected INTEGER CHECK (units_collected IS NULL OR units_collected >= 1),
    admin_notes TEXT,
    cancellation_reason TEXT,
    created_by TEXT NOT NULL,
    completed_at TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- A donor has at most one open appointment
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_one_open ON appointments(donor_id)
    WHERE status IN ('scheduled', 'confirmed', 'in_progress');
CREATE INDEX IF NOT EXISTS idx_appointments_request ON appointments(request_id);
CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments(scheduled_date);

-- ============================================================================
-- Donation History (Append-Only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS donations (
    id TEXT PRIMARY KEY,
    donor_id TEXT NOT NULL REFERENCES donors(id),
    appointment_id TEXT REFERENCES appointments(id),
    request_id TEXT REFERENCES blood_requests(id),
    batch_id TEXT NOT NULL,                      -- no FK: batches may be purged externally
    units INTEGER NOT NULL CHECK (units >= 1),
    donated_on TEXT NOT NULL,
    location TEXT NOT NULL,
    notes TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_donations_donor ON donations(donor_id, donated_on);

CREATE TRIGGER IF NOT EXISTS donations_no_update BEFORE UPDATE ON donations
BEGIN
    SELECT RAISE(ABORT, 'Donation history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS donations_no_delete BEFORE DELETE ON donations
BEGIN
    SELECT RAISE(ABORT, 'Donation history is append-only');
END;

-- ============================================================================
-- Notifications
-- ============================================================================

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    donor_id TEXT NOT NULL REFERENCES donors(id),
    request_id TEXT REFERENCES blood_requests(id),
    appointment_id TEXT REFERENCES appointments(id),
    kind TEXT NOT NULL,
    status TEXT NOT NULL,                        -- pending, sent, read, responded (expiry is computed)
    response_action TEXT,
    responded_at TEXT,
    message_id TEXT,
    created_at TEXT NOT NULL,
    sent_at TEXT,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_request ON notifications(request_id, donor_id);
CREATE INDEX IF NOT EXISTS idx_notifications_donor ON notifications(donor_id);

-- ============================================================================
-- Request Transition Journal (Append-Only, Hash-Chained)
-- ============================================================================

CREATE TABLE IF NOT EXISTS request_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL REFERENCES blood_requests(id),
    from_status TEXT,                            -- NULL for creation
    to_status TEXT NOT NULL,
    actor TEXT NOT NULL,
    detail TEXT,
    at TEXT NOT NULL,
    prev_hash TEXT,                              -- NULL for the first event
    hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_events_request ON request_events(request_id, seq);

CREATE TRIGGER IF NOT EXISTS request_events_no_update BEFORE UPDATE ON request_events
BEGIN
    SELECT RAISE(ABORT, 'Request journal is append-only');
END;

CREATE TRIGGER IF NOT EXISTS request_events_no_delete BEFORE DELETE ON request_events
BEGIN
    SELECT RAISE(ABORT, 'Request journal is append-only');
END;
"#;
