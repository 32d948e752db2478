//! Billing session lifecycle.
//!
//! [`BillingSessionCoordinator`] owns the session state machine; the types in
//! [`state`] describe what it tracks.

mod coordinator;
mod state;

pub use coordinator::BillingSessionCoordinator;
pub use state::{SessionSnapshot, SessionState, SessionType};
