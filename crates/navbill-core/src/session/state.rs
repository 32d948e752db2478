//! Session types, states and snapshots.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Category of billable activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Passive navigation without a route.
    FreeDrive,
    /// Turn-by-turn guidance along a route.
    ActiveGuidance,
}

impl SessionType {
    /// Maximum duration the backend may keep a session of this type open.
    ///
    /// This is a policy value handed to the backend; it is never enforced
    /// by the coordinator.
    pub fn max_session_interval(self) -> Duration {
        match self {
            SessionType::FreeDrive => Duration::from_secs(60 * 60),
            SessionType::ActiveGuidance => Duration::from_secs(12 * 60 * 60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::FreeDrive => "free_drive",
            SessionType::ActiveGuidance => "active_guidance",
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "free_drive" => Ok(SessionType::FreeDrive),
            "active_guidance" => Ok(SessionType::ActiveGuidance),
            other => Err(format!("Unknown session type: {other}")),
        }
    }
}

/// Lifecycle state of the billing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Stopped,
    Paused,
    Running,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Stopped => "stopped",
            SessionState::Paused => "paused",
            SessionState::Running => "running",
        };
        f.write_str(name)
    }
}

/// Consistent copy of the coordinator's guarded session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,

    /// Outstanding `begin_session` calls not yet matched by `stop_session`.
    pub active_count: usize,

    /// Most recently requested session type.
    pub session_type: Option<SessionType>,
}
