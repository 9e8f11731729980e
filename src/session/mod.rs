//! Command sessions.
//!
//! A [`CommandSession`] owns the pod record and the channel for its lifetime
//! and runs every delivery, alert, status and lifecycle operation against
//! them. Delivery commands report a [`DeliveryCommandResult`] or
//! [`CancelDeliveryResult`] so that a command of unknown fate is never
//! mistaken for a failure.

mod command;
mod error;
mod results;

pub use command::{CommandSession, DeliveryOptions};
pub use error::{PodCommsError, PodCommsResult};
pub use results::{CancelDeliveryResult, DeliveryCommandResult};
