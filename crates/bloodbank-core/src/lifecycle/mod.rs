//! Request lifecycle: the state machine a blood request moves through.
//!
//! ```text
//!            approve (stock)                confirm_collection        verify
//! pending ─────────────────────▶ approved ───────────────────▶ collected ──────▶ verified
//!    │  ▲        ▲                  │  ▲
//!    │  │        │ donations cover  │  │ request_reschedule / resolve_reschedule
//!    │  │        └──────────────────┘  └── (flag on approved)
//!    │  └── approve without stock: stays pending, flagged for outreach
//!    ├──▶ rejected
//!    └──▶ cancelled ◀── approved ──▶ no_show
//! ```
//!
//! Every transition is a compare-and-set on `(status, version)` inside one transaction,
//! and is appended to the hash-chained journal.

mod outreach;

pub use outreach::*;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::db::{Database, JournalEntry, RequestEvent};
use crate::error::{require_admin, require_text, CoreError, CoreResult};
use crate::ledger::InventoryLedger;
use crate::models::{
    AllocationReceipt, BloodRequest, CollectionPlan, DonationRecord, Fulfillment, NewBloodRequest,
    OpContext, RequestStatus, Requester, RequesterKind, RescheduleRequest, Urgency,
};

const ENTITY: &str = "BloodRequest";

/// Collection details supplied on approval. Unset fields fall back to policy defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectionDetails {
    pub date: Option<NaiveDate>,
    pub location: Option<String>,
    pub instructions: Option<String>,
}

/// Units from one donation credited to a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribution {
    pub request_id: String,
    pub units_attributed: u32,
    pub units_collected: u32,
    /// This donation completed the request
    pub fulfilled: bool,
}

enum ApproveOutcome {
    Approved(BloodRequest),
    Shortfall { requested: u32, available: u32 },
}

/// Blood request state machine.
pub struct RequestLifecycleManager<'a> {
    db: &'a Database,
    config: &'a CoreConfig,
    ledger: InventoryLedger<'a>,
}

impl<'a> RequestLifecycleManager<'a> {
    pub fn new(db: &'a Database, config: &'a CoreConfig) -> Self {
        Self {
            db,
            config,
            ledger: InventoryLedger::new(db, config),
        }
    }

    /// Raise a new request. Stock levels never block creation.
    #[tracing::instrument(skip(self, ctx))]
    pub fn create(&self, ctx: &OpContext, input: NewBloodRequest) -> CoreResult<BloodRequest> {
        let requester = Requester::from_actor(&ctx.actor).ok_or_else(|| {
            CoreError::Unauthorized(format!("{} may not raise requests", ctx.actor.label()))
        })?;

        let max = self.config.max_units_per_request;
        if input.units_requested == 0 || input.units_requested > max {
            return Err(CoreError::Validation(format!(
                "Units requested must be between 1 and {max}, got {}",
                input.units_requested
            )));
        }
        if input.urgency == Urgency::Critical && requester.kind != RequesterKind::Hospital {
            return Err(CoreError::Validation(
                "Critical urgency is reserved for hospital requesters".into(),
            ));
        }

        let input = NewBloodRequest {
            patient_name: trimmed(input.patient_name),
            notes: trimmed(input.notes),
            ..input
        };
        let request = BloodRequest::new(requester, input, ctx.now);

        self.db.atomic(|| {
            self.db.insert_request(&request)?;
            self.journal(ctx, &request, None, None)?;
            Ok::<_, CoreError>(())
        })?;

        info!(
            request_id = %request.id,
            blood_group = %request.blood_group,
            units = request.units_requested,
            urgency = request.urgency.as_str(),
            "request created"
        );
        Ok(request)
    }

    /// Approve a pending request against stock.
    ///
    /// Allocates whatever donations have not already covered. If stock is short the
    /// request stays pending, is flagged for donor outreach (committed), and
    /// [`CoreError::InsufficientInventory`] is returned.
    #[tracing::instrument(skip(self, ctx))]
    pub fn approve(
        &self,
        ctx: &OpContext,
        request_id: &str,
        details: CollectionDetails,
    ) -> CoreResult<BloodRequest> {
        require_admin(ctx, "approve requests")?;
        let collection = self.collection_plan(ctx, details)?;

        let outcome = self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            expect_status(&request, RequestStatus::Pending)?;
            let (status, version) = (request.status, request.version);

            let needed = request.units_outstanding();
            let receipt = match self.ledger.try_allocate(ctx, request.blood_group, needed) {
                Ok(receipt) => receipt,
                Err(CoreError::InsufficientInventory {
                    requested,
                    available,
                    ..
                }) => {
                    if !request.awaiting_donors {
                        request.awaiting_donors = true;
                        self.persist(ctx, &mut request, status, version, Some("awaiting donors"))?;
                    }
                    return Ok(ApproveOutcome::Shortfall {
                        requested,
                        available,
                    });
                }
                Err(e) => return Err(e),
            };

            let mut allocation = request
                .allocation
                .take()
                .unwrap_or_else(|| AllocationReceipt::empty(request.blood_group));
            allocation.merge(receipt);

            request.allocation = Some(allocation);
            request.status = RequestStatus::Approved;
            request.fulfillment = Some(Fulfillment::Stock);
            request.awaiting_donors = false;
            request.decided_by = Some(ctx.actor.label());
            request.decided_at = Some(ctx.now);
            request.collection = Some(collection.clone());
            let detail = format!("allocated {needed} unit(s) from stock");
            self.persist(ctx, &mut request, status, version, Some(&detail))?;
            Ok(ApproveOutcome::Approved(request))
        })?;

        match outcome {
            ApproveOutcome::Approved(request) => Ok(request),
            ApproveOutcome::Shortfall {
                requested,
                available,
            } => {
                let request = self.load(request_id)?;
                warn!(
                    request_id,
                    blood_group = %request.blood_group,
                    requested,
                    available,
                    "insufficient stock, request flagged for donor outreach"
                );
                Err(CoreError::InsufficientInventory {
                    blood_group: request.blood_group.to_string(),
                    requested,
                    available,
                })
            }
        }
    }

    /// Reject a pending request. Any donation-attributed units return to general stock.
    #[tracing::instrument(skip(self, ctx))]
    pub fn reject(&self, ctx: &OpContext, request_id: &str, reason: &str) -> CoreResult<BloodRequest> {
        require_admin(ctx, "reject requests")?;
        let reason = require_text("rejection reason", reason)?;

        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            expect_status(&request, RequestStatus::Pending)?;
            let (status, version) = (request.status, request.version);

            self.release_allocation(ctx, &mut request)?;
            request.status = RequestStatus::Rejected;
            request.awaiting_donors = false;
            request.decided_by = Some(ctx.actor.label());
            request.decided_at = Some(ctx.now);
            request.rejection_reason = Some(reason.clone());
            self.persist(ctx, &mut request, status, version, Some(&reason))?;
            Ok(request)
        })
    }

    /// Requester acknowledges physical pickup. The ledger is not touched again.
    #[tracing::instrument(skip(self, ctx))]
    pub fn confirm_collection(&self, ctx: &OpContext, request_id: &str) -> CoreResult<BloodRequest> {
        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            require_requester(ctx, &request, "confirm collection")?;
            expect_status(&request, RequestStatus::Approved)?;
            let (status, version) = (request.status, request.version);

            request.status = RequestStatus::Collected;
            request.collected_at = Some(ctx.now);
            request.reschedule = None;
            self.persist(ctx, &mut request, status, version, None)?;
            Ok(request)
        })
    }

    /// Admin sign-off on a collected request.
    #[tracing::instrument(skip(self, ctx))]
    pub fn verify(&self, ctx: &OpContext, request_id: &str) -> CoreResult<BloodRequest> {
        require_admin(ctx, "verify collections")?;

        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            expect_status(&request, RequestStatus::Collected)?;
            let (status, version) = (request.status, request.version);

            request.status = RequestStatus::Verified;
            request.verified_by = Some(ctx.actor.label());
            request.verified_at = Some(ctx.now);
            self.persist(ctx, &mut request, status, version, None)?;
            Ok(request)
        })
    }

    /// Ask for a different collection date. The request stays approved with the
    /// reschedule pending until an admin resolves it.
    #[tracing::instrument(skip(self, ctx))]
    pub fn request_reschedule(
        &self,
        ctx: &OpContext,
        request_id: &str,
        new_date: NaiveDate,
        reason: &str,
    ) -> CoreResult<BloodRequest> {
        let reason = require_text("reschedule reason", reason)?;
        if new_date < ctx.today() {
            return Err(CoreError::Validation(format!(
                "Reschedule date {new_date} is in the past"
            )));
        }

        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            require_requester(ctx, &request, "reschedule collection")?;
            expect_status(&request, RequestStatus::Approved)?;
            if request.reschedule.is_some() {
                return Err(CoreError::Validation(
                    "A reschedule request is already awaiting a decision".into(),
                ));
            }
            let (status, version) = (request.status, request.version);

            request.reschedule = Some(RescheduleRequest {
                requested_date: new_date,
                reason: reason.clone(),
                requested_at: ctx.now,
            });
            let detail = format!("reschedule to {new_date} requested: {reason}");
            self.persist(ctx, &mut request, status, version, Some(&detail))?;
            Ok(request)
        })
    }

    /// Accept or decline a pending reschedule. Accepting moves the collection date.
    #[tracing::instrument(skip(self, ctx))]
    pub fn resolve_reschedule(
        &self,
        ctx: &OpContext,
        request_id: &str,
        accept: bool,
        note: Option<String>,
    ) -> CoreResult<BloodRequest> {
        require_admin(ctx, "resolve reschedule requests")?;

        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            expect_status(&request, RequestStatus::Approved)?;
            let Some(reschedule) = request.reschedule.take() else {
                return Err(CoreError::stale(
                    ENTITY,
                    request_id,
                    "approved with a pending reschedule",
                    "approved",
                ));
            };
            let (status, version) = (request.status, request.version);

            let verdict = if accept {
                let mut plan = request.collection.take().unwrap_or_else(|| CollectionPlan {
                    date: reschedule.requested_date,
                    location: self.config.default_collection_location.clone(),
                    instructions: None,
                });
                plan.date = reschedule.requested_date;
                request.collection = Some(plan);
                format!("reschedule to {} accepted", reschedule.requested_date)
            } else {
                format!("reschedule to {} declined", reschedule.requested_date)
            };
            let detail = match trimmed(note) {
                Some(note) => format!("{verdict}: {note}"),
                None => verdict,
            };
            self.persist(ctx, &mut request, status, version, Some(&detail))?;
            Ok(request)
        })
    }

    /// Cancel a pending or approved request, restoring every unit set aside for it.
    #[tracing::instrument(skip(self, ctx))]
    pub fn cancel(&self, ctx: &OpContext, request_id: &str, reason: &str) -> CoreResult<BloodRequest> {
        let reason = require_text("cancellation reason", reason)?;

        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            if !ctx.actor.is_admin() {
                require_requester(ctx, &request, "cancel")?;
            }
            if !request.status.holds_inventory() {
                return Err(CoreError::stale(
                    ENTITY,
                    request_id,
                    "pending or approved",
                    request.status.as_str(),
                ));
            }
            let (status, version) = (request.status, request.version);

            self.close(ctx, &mut request, RequestStatus::Cancelled, &reason)?;
            self.persist(ctx, &mut request, status, version, Some(&reason))?;
            Ok(request)
        })
    }

    /// Close an approved request whose collection date has passed, restoring its units.
    #[tracing::instrument(skip(self, ctx))]
    pub fn mark_no_show(&self, ctx: &OpContext, request_id: &str, reason: &str) -> CoreResult<BloodRequest> {
        require_admin(ctx, "mark requests as no-show")?;
        let reason = require_text("no-show reason", reason)?;

        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            expect_status(&request, RequestStatus::Approved)?;
            match &request.collection {
                Some(plan) if plan.date < ctx.today() => {}
                Some(plan) => {
                    return Err(CoreError::Validation(format!(
                        "Collection date {} has not passed",
                        plan.date
                    )))
                }
                None => {
                    return Err(CoreError::Validation(
                        "Request has no collection date".into(),
                    ))
                }
            }
            let (status, version) = (request.status, request.version);

            self.close(ctx, &mut request, RequestStatus::NoShow, &reason)?;
            self.persist(ctx, &mut request, status, version, Some(&reason))?;
            Ok(request)
        })
    }

    /// Credit units from a completed donation to the request it was booked for.
    ///
    /// Only a pending request absorbs units, and only up to what it still needs; the
    /// rest stay in general inventory. The donation that closes the gap approves the
    /// request with collection set `collection_lead_days` out. Later donations find the
    /// request approved and credit nothing.
    pub(crate) fn reevaluate_fulfillment(
        &self,
        ctx: &OpContext,
        request_id: &str,
        batch_id: &str,
        units: u32,
    ) -> CoreResult<Option<Attribution>> {
        self.db.atomic(|| {
            let mut request = self.load(request_id)?;
            if request.status != RequestStatus::Pending || request.is_fulfilled() {
                debug!(
                    request_id,
                    status = request.status.as_str(),
                    "request no longer absorbs donations"
                );
                return Ok(None);
            }
            let (status, version) = (request.status, request.version);

            let attributable = units.min(request.units_outstanding());
            let receipt = self.ledger.allocate_from_batch(ctx, batch_id, attributable)?;
            let mut allocation = request
                .allocation
                .take()
                .unwrap_or_else(|| AllocationReceipt::empty(request.blood_group));
            allocation.merge(receipt);
            request.allocation = Some(allocation);
            request.units_collected += attributable;

            let fulfilled = request.is_fulfilled();
            let detail = if fulfilled {
                let date = ctx.today() + Duration::days(i64::from(self.config.collection_lead_days));
                request.status = RequestStatus::Approved;
                request.fulfillment = Some(Fulfillment::Donations);
                request.awaiting_donors = false;
                request.decided_at = Some(ctx.now);
                request.collection = Some(CollectionPlan {
                    date,
                    location: self.config.default_collection_location.clone(),
                    instructions: None,
                });
                format!("fulfilled by donations, collection on {date}")
            } else {
                format!(
                    "{attributable} donated unit(s) credited, {}/{} collected",
                    request.units_collected, request.units_requested
                )
            };
            self.persist(ctx, &mut request, status, version, Some(&detail))?;

            Ok(Some(Attribution {
                request_id: request.id.clone(),
                units_attributed: attributable,
                units_collected: request.units_collected,
                fulfilled,
            }))
        })
    }

    pub fn get(&self, request_id: &str) -> CoreResult<BloodRequest> {
        self.load(request_id)
    }

    pub fn list_by_status(&self, status: RequestStatus) -> CoreResult<Vec<BloodRequest>> {
        Ok(self.db.list_requests_by_status(status)?)
    }

    /// Pending requests flagged for donor outreach, most urgent first.
    pub fn list_awaiting_donors(&self) -> CoreResult<Vec<BloodRequest>> {
        Ok(self.db.list_requests_awaiting_donors()?)
    }

    /// Approved requests with a reschedule awaiting a decision.
    pub fn list_reschedule_requests(&self) -> CoreResult<Vec<BloodRequest>> {
        Ok(self.db.list_reschedule_requests()?)
    }

    /// Requests raised by `requester`, newest first.
    pub fn list_for_requester(&self, requester: &Requester) -> CoreResult<Vec<BloodRequest>> {
        Ok(self.db.list_requests_for_requester(requester)?)
    }

    /// Donations credited or booked against a request, in the order they were recorded.
    pub fn donations(&self, request_id: &str) -> CoreResult<Vec<DonationRecord>> {
        self.load(request_id)?;
        Ok(self.db.list_donations_for_request(request_id)?)
    }

    /// Journaled transitions of a request, oldest first.
    pub fn history(&self, request_id: &str) -> CoreResult<Vec<RequestEvent>> {
        self.load(request_id)?;
        Ok(self.db.list_request_events(request_id)?)
    }

    fn load(&self, request_id: &str) -> CoreResult<BloodRequest> {
        self.db
            .get_request(request_id)?
            .ok_or_else(|| CoreError::not_found(ENTITY, request_id))
    }

    fn collection_plan(&self, ctx: &OpContext, details: CollectionDetails) -> CoreResult<CollectionPlan> {
        let default_date = ctx.today() + Duration::days(i64::from(self.config.collection_lead_days));
        let date = details.date.unwrap_or(default_date);
        if date < ctx.today() {
            return Err(CoreError::Validation(format!(
                "Collection date {date} is in the past"
            )));
        }
        Ok(CollectionPlan {
            date,
            location: trimmed(details.location)
                .unwrap_or_else(|| self.config.default_collection_location.clone()),
            instructions: trimmed(details.instructions),
        })
    }

    /// Terminal closure shared by cancel and no-show.
    fn close(
        &self,
        ctx: &OpContext,
        request: &mut BloodRequest,
        to: RequestStatus,
        reason: &str,
    ) -> CoreResult<()> {
        self.release_allocation(ctx, request)?;
        request.status = to;
        request.awaiting_donors = false;
        request.reschedule = None;
        request.closure_reason = Some(reason.to_string());
        request.closed_by = Some(ctx.actor.label());
        request.closed_at = Some(ctx.now);
        Ok(())
    }

    fn release_allocation(&self, ctx: &OpContext, request: &mut BloodRequest) -> CoreResult<()> {
        if let Some(receipt) = request.allocation.take().filter(|r| !r.is_empty()) {
            let restored = self.ledger.restore(ctx, &receipt)?;
            debug!(request_id = %request.id, restored, "allocation released");
        }
        Ok(())
    }

    /// Compare-and-set write followed by a journal entry. The new status must be the old
    /// one or a legal successor of it.
    fn persist(
        &self,
        ctx: &OpContext,
        request: &mut BloodRequest,
        expected_status: RequestStatus,
        expected_version: u32,
        detail: Option<&str>,
    ) -> CoreResult<()> {
        if expected_status != request.status && !expected_status.can_transition_to(request.status) {
            return Err(CoreError::InvalidTransition {
                entity: ENTITY,
                id: request.id.clone(),
                from: expected_status.as_str().to_string(),
                to: request.status.as_str().to_string(),
            });
        }

        request.updated_at = ctx.now;
        if !self
            .db
            .update_request_cas(request, expected_status, expected_version)?
        {
            return Err(CoreError::concurrent(ENTITY, &request.id));
        }
        request.version = expected_version + 1;
        self.journal(ctx, request, Some(expected_status), detail)?;

        if expected_status != request.status {
            info!(
                request_id = %request.id,
                from = expected_status.as_str(),
                to = request.status.as_str(),
                actor = %ctx.actor.label(),
                "request transition"
            );
        }
        Ok(())
    }

    fn journal(
        &self,
        ctx: &OpContext,
        request: &BloodRequest,
        from: Option<RequestStatus>,
        detail: Option<&str>,
    ) -> CoreResult<()> {
        self.db.append_request_event(&JournalEntry {
            request_id: request.id.clone(),
            from_status: from,
            to_status: request.status,
            actor: ctx.actor.label(),
            detail: detail.map(str::to_string),
            at: ctx.now,
        })?;
        Ok(())
    }
}

fn expect_status(request: &BloodRequest, expected: RequestStatus) -> CoreResult<()> {
    if request.status == expected {
        Ok(())
    } else {
        Err(CoreError::stale(
            ENTITY,
            &request.id,
            expected.as_str(),
            request.status.as_str(),
        ))
    }
}

fn require_requester(ctx: &OpContext, request: &BloodRequest, action: &str) -> CoreResult<()> {
    if request.requester.is(&ctx.actor) {
        Ok(())
    } else {
        Err(CoreError::Unauthorized(format!(
            "only the original requester may {action}"
        )))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
