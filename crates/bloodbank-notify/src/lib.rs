//! Donor notification boundary for the blood-bank core.
//!
//! The core never delivers messages itself. It hands a [`NotificationPayload`] to a
//! [`NotificationDispatcher`] and only cares about the acknowledgment; donor replies come
//! back later as separate calls, optionally parsed from free text with [`parse_reply`].

pub mod dispatch;
pub mod reply;
pub mod templates;

pub use dispatch::*;
pub use reply::*;
pub use templates::*;
