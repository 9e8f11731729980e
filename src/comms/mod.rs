//! Pod orchestration.
//!
//! [`PodComms`] owns everything belonging to one physical pod: the channel,
//! the [`PodState`](crate::pod::PodState) and the lock that serializes them.
//!
//! ```text
//!  pair(insulin)              run_session(name)
//!     │                            │
//!     ▼                            ▼
//!  ┌──────────── pod lock (held for the whole exchange) ────────────┐
//!  │ LTK exchange → session negotiation → AssignAddress → SetupPod  │
//!  │                        or                                      │
//!  │ session negotiation if the link came back                      │
//!  └────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//!                         SessionHandle ──► CommandSession
//! ```
//!
//! A [`SessionHandle`] holds the lock until dropped. Because command
//! sessions borrow the handle, two sessions against the same pod cannot
//! interleave.

mod config;
mod pod_comms;

pub use config::{PodCommsBuilder, PodCommsConfig};
pub use pod_comms::{PodComms, SessionHandle};
