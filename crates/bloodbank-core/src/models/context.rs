//! Caller identity and clock passed explicitly into every core operation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Who is performing an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Admin(String),
    Hospital(String),
    External(String),
    Donor(String),
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::Admin(id) | Actor::Hospital(id) | Actor::External(id) | Actor::Donor(id) => id,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Actor::Admin(_) => "admin",
            Actor::Hospital(_) => "hospital",
            Actor::External(_) => "external",
            Actor::Donor(_) => "donor",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    /// Label written into audit fields, e.g. `admin:ops-1`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.role(), self.id())
    }
}

/// Per-operation context.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub actor: Actor,
    pub now: DateTime<Utc>,
}

impl OpContext {
    pub fn new(actor: Actor, now: DateTime<Utc>) -> Self {
        Self { actor, now }
    }

    /// Context stamped with the current wall-clock time.
    pub fn now(actor: Actor) -> Self {
        Self::new(actor, Utc::now())
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}
