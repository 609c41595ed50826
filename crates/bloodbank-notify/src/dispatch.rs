//! Dispatcher trait and the in-process outbox implementation.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dispatch errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Recipient rejected: {0}")]
    Rejected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// What a notification is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Ask an eligible donor to come in for a request
    DonationOutreach,
    /// A visit has been booked
    AppointmentScheduled,
    /// A booked visit was called off
    AppointmentCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DonationOutreach => "donation_outreach",
            NotificationKind::AppointmentScheduled => "appointment_scheduled",
            NotificationKind::AppointmentCancelled => "appointment_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "donation_outreach" => Some(NotificationKind::DonationOutreach),
            "appointment_scheduled" => Some(NotificationKind::AppointmentScheduled),
            "appointment_cancelled" => Some(NotificationKind::AppointmentCancelled),
            _ => None,
        }
    }
}

/// Message content handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    /// Request or appointment the message refers to
    pub reference: Option<String>,
}

/// Transport acknowledgment. Says nothing about whether the donor will respond.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchAck {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Sends notifications to donors (email/SMS/push live behind this).
pub trait NotificationDispatcher: Send + Sync {
    fn send(&self, recipient: &str, payload: &NotificationPayload) -> DispatchResult<DispatchAck>;
}

/// A queued outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub message_id: String,
    pub recipient: String,
    pub payload: NotificationPayload,
    pub queued_at: DateTime<Utc>,
}

/// Dispatcher that queues messages in memory for the host application to deliver.
#[derive(Debug, Default)]
pub struct OutboxDispatcher {
    queue: Mutex<Outbox>,
}

#[derive(Debug, Default)]
struct Outbox {
    next_seq: u64,
    messages: Vec<OutboundMessage>,
}

impl OutboxDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued message, leaving the outbox empty.
    pub fn drain(&self) -> Vec<OutboundMessage> {
        match self.queue.lock() {
            Ok(mut outbox) => std::mem::take(&mut outbox.messages),
            Err(poisoned) => std::mem::take(&mut poisoned.into_inner().messages),
        }
    }

    /// Number of messages waiting for delivery.
    pub fn pending(&self) -> usize {
        match self.queue.lock() {
            Ok(outbox) => outbox.messages.len(),
            Err(poisoned) => poisoned.into_inner().messages.len(),
        }
    }
}

impl NotificationDispatcher for OutboxDispatcher {
    fn send(&self, recipient: &str, payload: &NotificationPayload) -> DispatchResult<DispatchAck> {
        if recipient.trim().is_empty() {
            return Err(DispatchError::Rejected("empty recipient".into()));
        }

        let mut outbox = self
            .queue
            .lock()
            .map_err(|_| DispatchError::Unavailable("outbox lock poisoned".into()))?;

        outbox.next_seq += 1;
        let message_id = format!("msg-{:06}", outbox.next_seq);
        let now = Utc::now();

        outbox.messages.push(OutboundMessage {
            message_id: message_id.clone(),
            recipient: recipient.to_string(),
            payload: payload.clone(),
            queued_at: now,
        });

        tracing::debug!(%recipient, %message_id, kind = payload.kind.as_str(), "queued notification");

        Ok(DispatchAck {
            message_id,
            accepted_at: now,
        })
    }
}
