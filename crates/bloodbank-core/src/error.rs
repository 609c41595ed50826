//! Error taxonomy for core operations.

use thiserror::Error;

use crate::db::DbError;
use crate::models::OpContext;

/// Errors returned by core operations.
///
/// Everything except [`CoreError::Storage`] is an expected outcome the caller can act on.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input, rejected before any state change.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The entity is no longer in the status the operation needs; re-fetch and retry.
    #[error("{entity} {id} is {actual}, expected {expected}")]
    StaleState {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    /// Not enough unexpired stock; triggers donor outreach rather than failing the request.
    #[error("Insufficient {blood_group} inventory: requested {requested}, available {available}")]
    InsufficientInventory {
        blood_group: String,
        requested: u32,
        available: u32,
    },

    /// Donor fails eligibility. Advisory for admin overrides, blocking for automated flows.
    #[error("Donor {donor_id} is not eligible: {reason}")]
    IneligibleDonor {
        donor_id: String,
        days_until_eligible: u32,
        reason: String,
    },

    /// The target status is not a legal successor of the current one.
    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// Compare-and-set lost against a concurrent writer.
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Not permitted: {0}")]
    Unauthorized(String),

    /// Storage unavailable or corrupt; the only fatal class.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn stale(
        entity: &'static str,
        id: &str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        CoreError::StaleState {
            entity,
            id: id.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub(crate) fn concurrent(entity: &'static str, id: &str) -> Self {
        CoreError::ConcurrentModification {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying against freshly read state can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ConcurrentModification { .. } | CoreError::StaleState { .. }
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(DbError::Sqlite(e))
    }
}

/// Reject blank free-text fields such as reasons.
pub(crate) fn require_text(field: &str, value: &str) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Admin-only operations.
pub(crate) fn require_admin(ctx: &OpContext, action: &str) -> CoreResult<()> {
    if ctx.actor.is_admin() {
        Ok(())
    } else {
        Err(CoreError::Unauthorized(format!(
            "{} may not {action}",
            ctx.actor.label()
        )))
    }
}
