//! Donor outreach for requests that stock could not cover.
//!
//! An outreach cycle writes one pending notification per contacted donor, commits, and
//! only then hands each message to the dispatcher. A dispatch failure leaves its
//! notification pending; it never undoes the cycle.

use std::collections::HashSet;

use bloodbank_notify::{outreach_message, parse_reply, NotificationDispatcher, OutreachDetails};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{RequestLifecycleManager, ENTITY};
use crate::eligibility::DonorEligibilityTracker;
use crate::error::{require_admin, CoreError, CoreResult};
use crate::models::{
    Actor, Donor, Notification, NotificationKind, NotificationStatus, OpContext, RequestStatus,
    ResponseAction,
};

/// A notification the dispatcher refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchFailure {
    pub donor_id: String,
    pub notification_id: String,
    pub error: String,
}

/// Result of one outreach cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachReport {
    pub request_id: String,
    /// Notifications the dispatcher accepted
    pub sent: Vec<String>,
    pub failed: Vec<DispatchFailure>,
    /// Eligible donors skipped because they already hold an active notification
    pub already_notified: u32,
}

impl OutreachReport {
    pub fn contacted(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

impl<'a> RequestLifecycleManager<'a> {
    /// Notify eligible, available donors of the request's blood group.
    ///
    /// Donors with an active notification for this request are skipped, so each donor
    /// holds at most one. At most `outreach_batch_limit` donors are contacted.
    #[tracing::instrument(skip(self, ctx, dispatcher))]
    pub fn start_outreach(
        &self,
        ctx: &OpContext,
        request_id: &str,
        dispatcher: &dyn NotificationDispatcher,
    ) -> CoreResult<OutreachReport> {
        require_admin(ctx, "start donor outreach")?;
        let tracker = DonorEligibilityTracker::new(self.db, self.config);
        let expires_at = ctx.now + Duration::hours(i64::from(self.config.outreach_ttl_hours));

        let (request, queued, already_notified) = self.db.atomic(|| {
            let request = self.load(request_id)?;
            if request.status != RequestStatus::Pending {
                return Err(CoreError::stale(
                    ENTITY,
                    request_id,
                    RequestStatus::Pending.as_str(),
                    request.status.as_str(),
                ));
            }
            if !request.awaiting_donors {
                return Err(CoreError::Validation(format!(
                    "Request {request_id} is not awaiting donors; approve it first"
                )));
            }

            let notified: HashSet<String> = self
                .active_for_request(request_id, ctx.now)?
                .into_iter()
                .map(|n| n.donor_id)
                .collect();

            let mut already_notified = 0;
            let mut queued: Vec<(Donor, Notification)> = Vec::new();
            for (donor, _) in tracker.eligible_donors(request.blood_group, ctx.today())? {
                if notified.contains(&donor.id) {
                    already_notified += 1;
                    continue;
                }
                if queued.len() >= self.config.outreach_batch_limit as usize {
                    break;
                }

                let notification = Notification {
                    id: uuid::Uuid::new_v4().to_string(),
                    donor_id: donor.id.clone(),
                    request_id: Some(request.id.clone()),
                    appointment_id: None,
                    kind: NotificationKind::DonationOutreach,
                    status: NotificationStatus::Pending,
                    response_action: None,
                    responded_at: None,
                    message_id: None,
                    created_at: ctx.now,
                    sent_at: None,
                    expires_at,
                };
                self.db.insert_notification(&notification)?;
                queued.push((donor, notification));
            }
            Ok((request, queued, already_notified))
        })?;

        let mut report = OutreachReport {
            request_id: request.id.clone(),
            sent: Vec::new(),
            failed: Vec::new(),
            already_notified,
        };

        for (donor, mut notification) in queued {
            let payload = outreach_message(&OutreachDetails {
                donor_name: &donor.name,
                blood_group: request.blood_group.as_str(),
                units_needed: request.units_outstanding(),
                urgency: request.urgency.as_str(),
                request_id: &request.id,
                respond_by: expires_at,
            });

            match dispatcher.send(donor.recipient(), &payload) {
                Ok(ack) => {
                    notification.status = NotificationStatus::Sent;
                    notification.message_id = Some(ack.message_id);
                    notification.sent_at = Some(ack.accepted_at);
                    // Already delivered: a failed record is logged, not raised
                    match self
                        .db
                        .update_notification_cas(&notification, NotificationStatus::Pending)
                    {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            donor_id = %donor.id,
                            notification_id = %notification.id,
                            "notification moved on before its send was recorded"
                        ),
                        Err(e) => warn!(
                            donor_id = %donor.id,
                            notification_id = %notification.id,
                            error = %e,
                            "could not record outreach send"
                        ),
                    }
                    report.sent.push(notification.id);
                }
                Err(e) => {
                    warn!(
                        donor_id = %donor.id,
                        notification_id = %notification.id,
                        error = %e,
                        "outreach dispatch failed"
                    );
                    report.failed.push(DispatchFailure {
                        donor_id: donor.id,
                        notification_id: notification.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            request_id = %report.request_id,
            sent = report.sent.len(),
            failed = report.failed.len(),
            already_notified = report.already_notified,
            "outreach cycle finished"
        );
        Ok(report)
    }

    /// Record a donor's accept/decline. Expired or answered notifications are stale.
    #[tracing::instrument(skip(self, ctx))]
    pub fn record_response(
        &self,
        ctx: &OpContext,
        notification_id: &str,
        action: ResponseAction,
    ) -> CoreResult<Notification> {
        self.db.atomic(|| {
            let mut notification = self.load_notification(ctx, notification_id)?;
            let stored = notification.status;
            let effective = notification.effective_status(ctx.now);
            if !notification.is_active(ctx.now) {
                return Err(CoreError::stale(
                    "Notification",
                    notification_id,
                    "awaiting a response",
                    effective.as_str(),
                ));
            }

            notification.status = NotificationStatus::Responded;
            notification.response_action = Some(action);
            notification.responded_at = Some(ctx.now);
            if !self.db.update_notification_cas(&notification, stored)? {
                return Err(CoreError::concurrent("Notification", notification_id));
            }

            info!(
                notification_id,
                donor_id = %notification.donor_id,
                action = action.as_str(),
                "donor responded"
            );
            Ok(notification)
        })
    }

    /// Record a free-text or JSON reply, interpreting it as accept or decline.
    pub fn record_reply(
        &self,
        ctx: &OpContext,
        notification_id: &str,
        reply: &str,
    ) -> CoreResult<Notification> {
        let action = parse_reply(reply).map_err(|e| CoreError::Validation(e.to_string()))?;
        self.record_response(ctx, notification_id, action)
    }

    /// Note that the donor opened the message. No effect once expired or answered.
    pub fn mark_read(&self, ctx: &OpContext, notification_id: &str) -> CoreResult<Notification> {
        self.db.atomic(|| {
            let mut notification = self.load_notification(ctx, notification_id)?;
            let stored = notification.status;
            if !notification.is_active(ctx.now) || stored == NotificationStatus::Read {
                return Ok(notification);
            }

            notification.status = NotificationStatus::Read;
            if !self.db.update_notification_cas(&notification, stored)? {
                return Err(CoreError::concurrent("Notification", notification_id));
            }
            Ok(notification)
        })
    }

    /// Outreach notifications for a request still awaiting a response at `now`.
    pub fn active_for_request(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Notification>> {
        Ok(self
            .db
            .list_notifications_for_request(request_id)?
            .into_iter()
            .filter(|n| n.kind == NotificationKind::DonationOutreach && n.is_active(now))
            .collect())
    }

    /// Load a notification the acting party is allowed to see: its donor or an admin.
    fn load_notification(&self, ctx: &OpContext, notification_id: &str) -> CoreResult<Notification> {
        let notification = self
            .db
            .get_notification(notification_id)?
            .ok_or_else(|| CoreError::not_found("Notification", notification_id))?;

        match &ctx.actor {
            Actor::Admin(_) => Ok(notification),
            Actor::Donor(id) if *id == notification.donor_id => Ok(notification),
            other => Err(CoreError::Unauthorized(format!(
                "{} may not answer another donor's notification",
                other.label()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::db::Database;
    use crate::eligibility::NewDonor;
    use crate::lifecycle::CollectionDetails;
    use crate::models::{BloodGroup, NewBloodRequest, Urgency};
    use bloodbank_notify::{DispatchAck, DispatchError, DispatchResult, NotificationPayload, OutboxDispatcher};
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Refusing;

    impl NotificationDispatcher for Refusing {
        fn send(&self, _recipient: &str, _payload: &NotificationPayload) -> DispatchResult<DispatchAck> {
            Err(DispatchError::Unavailable("gateway down".into()))
        }
    }

    /// Accepts every message, but first answers all pending outreach for the request
    /// through a second connection, as a fast donor would.
    struct AnsweredBeforeRecorded {
        db: Mutex<Database>,
        request_id: String,
    }

    impl NotificationDispatcher for AnsweredBeforeRecorded {
        fn send(&self, _recipient: &str, _payload: &NotificationPayload) -> DispatchResult<DispatchAck> {
            let db = self.db.lock().unwrap();
            for mut notification in db.list_notifications_for_request(&self.request_id).unwrap() {
                if notification.status == NotificationStatus::Pending {
                    notification.status = NotificationStatus::Responded;
                    notification.response_action = Some(ResponseAction::Accept);
                    notification.responded_at = Some(at_nine());
                    assert!(db
                        .update_notification_cas(&notification, NotificationStatus::Pending)
                        .unwrap());
                }
            }
            Ok(DispatchAck {
                message_id: uuid::Uuid::new_v4().to_string(),
                accepted_at: at_nine(),
            })
        }
    }

    fn at_nine() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn admin() -> OpContext {
        OpContext::new(Actor::Admin("ops".into()), at_nine())
    }

    fn setup(db: &Database, config: &CoreConfig, donors: usize) -> (String, Vec<Donor>) {
        let tracker = DonorEligibilityTracker::new(db, config);
        let donors = (0..donors)
            .map(|i| {
                tracker
                    .register_donor(
                        &admin(),
                        NewDonor {
                            name: format!("Donor {i}"),
                            blood_group: BloodGroup::ONegative,
                            contact: Some(format!("donor{i}@example.org")),
                            last_donation_date: None,
                        },
                    )
                    .unwrap()
            })
            .collect();

        let manager = RequestLifecycleManager::new(db, config);
        let hospital = OpContext::new(Actor::Hospital("st-marys".into()), at_nine());
        let request = manager
            .create(
                &hospital,
                NewBloodRequest {
                    blood_group: BloodGroup::ONegative,
                    units_requested: 2,
                    urgency: Urgency::Critical,
                    patient_name: None,
                    notes: None,
                },
            )
            .unwrap();
        assert!(manager
            .approve(&admin(), &request.id, CollectionDetails::default())
            .is_err());
        (request.id, donors)
    }

    #[test]
    fn test_outreach_contacts_each_donor_once() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let (request_id, _) = setup(&db, &config, 3);
        let manager = RequestLifecycleManager::new(&db, &config);
        let outbox = OutboxDispatcher::new();

        let first = manager.start_outreach(&admin(), &request_id, &outbox).unwrap();
        assert_eq!(first.sent.len(), 3);
        assert_eq!(outbox.pending(), 3);

        let second = manager.start_outreach(&admin(), &request_id, &outbox).unwrap();
        assert_eq!(second.contacted(), 0);
        assert_eq!(second.already_notified, 3);

        let messages = outbox.drain();
        assert!(messages[0].payload.subject.starts_with("Urgent"));
    }

    #[test]
    fn test_outreach_respects_batch_limit() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig {
            outreach_batch_limit: 2,
            ..CoreConfig::default()
        };
        let (request_id, _) = setup(&db, &config, 5);
        let manager = RequestLifecycleManager::new(&db, &config);

        let report = manager
            .start_outreach(&admin(), &request_id, &OutboxDispatcher::new())
            .unwrap();
        assert_eq!(report.sent.len(), 2);
    }

    #[test]
    fn test_failed_dispatch_stays_pending() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let (request_id, _) = setup(&db, &config, 1);
        let manager = RequestLifecycleManager::new(&db, &config);

        let report = manager.start_outreach(&admin(), &request_id, &Refusing).unwrap();
        assert_eq!(report.failed.len(), 1);

        let stored = db
            .get_notification(&report.failed[0].notification_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
    }

    #[test]
    fn test_lost_send_record_does_not_stop_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.sqlite3");
        let db = Database::open(&path).unwrap();
        let config = CoreConfig::default();
        let (request_id, _) = setup(&db, &config, 2);
        let manager = RequestLifecycleManager::new(&db, &config);
        let dispatcher = AnsweredBeforeRecorded {
            db: Mutex::new(Database::open(&path).unwrap()),
            request_id: request_id.clone(),
        };

        let report = manager.start_outreach(&admin(), &request_id, &dispatcher).unwrap();
        assert_eq!(report.sent.len(), 2);
        assert!(report.failed.is_empty());

        // The donors' answers win over the late send bookkeeping
        for id in &report.sent {
            let stored = db.get_notification(id).unwrap().unwrap();
            assert_eq!(stored.status, NotificationStatus::Responded);
            assert_eq!(stored.response_action, Some(ResponseAction::Accept));
            assert!(stored.message_id.is_none());
        }
    }

    #[test]
    fn test_response_after_expiry_is_stale() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let (request_id, donors) = setup(&db, &config, 1);
        let manager = RequestLifecycleManager::new(&db, &config);

        let report = manager
            .start_outreach(&admin(), &request_id, &OutboxDispatcher::new())
            .unwrap();
        let notification_id = &report.sent[0];

        let late = OpContext::new(
            Actor::Donor(donors[0].id.clone()),
            at_nine() + Duration::hours(49),
        );
        let result = manager.record_response(&late, notification_id, ResponseAction::Accept);
        assert!(matches!(result, Err(CoreError::StaleState { .. })));
        assert!(manager.active_for_request(&request_id, late.now).unwrap().is_empty());
    }

    #[test]
    fn test_reply_is_recorded_once() {
        let db = Database::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let (request_id, donors) = setup(&db, &config, 1);
        let manager = RequestLifecycleManager::new(&db, &config);

        let report = manager
            .start_outreach(&admin(), &request_id, &OutboxDispatcher::new())
            .unwrap();
        let notification_id = &report.sent[0];
        let donor = OpContext::new(Actor::Donor(donors[0].id.clone()), at_nine());

        let stranger = OpContext::new(Actor::Donor("someone-else".into()), at_nine());
        assert!(matches!(
            manager.record_reply(&stranger, notification_id, "yes"),
            Err(CoreError::Unauthorized(_))
        ));

        let read = manager.mark_read(&donor, notification_id).unwrap();
        assert_eq!(read.status, NotificationStatus::Read);

        let answered = manager.record_reply(&donor, notification_id, "Yes, I can come").unwrap();
        assert_eq!(answered.response_action, Some(ResponseAction::Accept));
        assert!(manager
            .record_response(&donor, notification_id, ResponseAction::Decline)
            .is_err());
    }
}
