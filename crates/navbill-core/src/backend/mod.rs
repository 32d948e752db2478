//! Billing backend capability.
//!
//! The coordinator never talks to a billing service directly. It issues
//! requests through [`BillingBackend`], whose implementations decide where
//! and when the work happens. Completions may run on any thread, possibly
//! long after the request call has returned.

pub mod http;
pub mod recording;

use crate::session::SessionType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpBillingBackend;
pub use recording::{BackendRequest, RecordingBackend};

/// Outcome delivered to a [`Completion`].
pub type BillingResult = Result<(), BillingError>;

/// Continuation invoked exactly once with the outcome of a backend request.
pub type Completion = Box<dyn FnOnce(BillingResult) + Send + 'static>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("Billing request failed: {0}")]
    RequestFailed(String),

    #[error("Billing service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Billing transport error: {0}")]
    Transport(String),

    #[error("Invalid billing response: {0}")]
    InvalidResponse(String),

    #[error("No open billing session")]
    NoSession,
}

/// Backend request kinds, used for logging and failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendOperation {
    OpenSession,
    PauseSession,
    ResumeSession,
    CloseSession,
    UsageEvent,
}

impl BackendOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendOperation::OpenSession => "open_session",
            BackendOperation::PauseSession => "pause_session",
            BackendOperation::ResumeSession => "resume_session",
            BackendOperation::CloseSession => "close_session",
            BackendOperation::UsageEvent => "usage_event",
        }
    }
}

impl std::fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external billing service.
///
/// Implementations must be safe to call concurrently. Requests taking a
/// [`Completion`] report their outcome through it; `pause_session` and
/// `close_session` are fire-and-forget.
pub trait BillingBackend: Send + Sync {
    /// Token of the currently open session, if it is still valid.
    fn current_token(&self) -> Option<String>;

    fn open_session(&self, session_type: SessionType, completion: Completion);

    fn pause_session(&self);

    fn resume_session(&self, completion: Completion);

    fn close_session(&self);

    /// Best-effort usage ping, independent of session open/close.
    fn report_usage_event(&self, completion: Completion);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_displays_status_and_body() {
        let err = BillingError::Http {
            status: 503,
            body: "maintenance".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("503"));
        assert!(message.contains("maintenance"));
    }

    #[test]
    fn operation_serializes_as_snake_case() {
        let json = serde_json::to_string(&BackendOperation::ResumeSession).unwrap();
        assert_eq!(json, "\"resume_session\"");
        assert_eq!(BackendOperation::UsageEvent.to_string(), "usage_event");
    }
}
