//! Domain models for the blood-bank core.

mod appointment;
mod blood_group;
mod context;
mod donor;
mod inventory;
mod notification;
mod request;

pub use appointment::*;
pub use blood_group::*;
pub use context::*;
pub use donor::*;
pub use inventory::*;
pub use notification::*;
pub use request::*;
