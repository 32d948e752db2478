//! # navbill-core
//!
//! Billing session coordination for the navigation SDK.
//!
//! This crate is framework-agnostic and can be used by:
//! - the SDK's navigation service (free drive, active guidance)
//! - the `navbill` CLI
//! - tests, with a substituted backend
//!
//! ## Key Concepts
//!
//! - **Session**: a logical period during which usage is metered
//! - **Active count**: outstanding begin calls; sessions nest
//! - **Backend**: the external billing service, reached through
//!   [`BillingBackend`]
//! - **Usage event**: a best-effort ping independent of open/close

pub mod backend;
pub mod config;
pub mod context;
pub mod event_bus;
pub mod heartbeat;
pub mod logging;
pub mod paths;
pub mod session;

// Re-export commonly used types
pub use backend::{BillingBackend, BillingError, Completion};
pub use config::{BillingConfig, ConfigError};
pub use context::{BillingContext, BillingContextBuilder};
pub use event_bus::{BillingEvent, BillingEventBus};
pub use session::{BillingSessionCoordinator, SessionSnapshot, SessionState, SessionType};
