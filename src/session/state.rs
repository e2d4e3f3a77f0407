//! Lifecycle states, caller commands and which commands each state allows.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Finalizing,
    Localizing,
    Ready,
    Failed,
}

impl SessionState {
    /// A scan or localization is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Scanning | SessionState::Finalizing | SessionState::Localizing
        )
    }

    /// Whether `command` may be issued in this state.
    ///
    /// At most one of Scanning/Finalizing/Localizing is ever active, so
    /// `BeginScan` and `BeginLocalize` are refused while busy rather than
    /// queued.
    pub fn allows(&self, command: Command) -> bool {
        use SessionState::*;

        match command {
            Command::Configure => matches!(self, Idle),
            Command::BeginScan => matches!(self, Idle | Failed),
            Command::FinishScan | Command::StopScan => matches!(self, Scanning),
            Command::BeginLocalize => matches!(self, Idle),
            Command::PlaceObject | Command::ClearObjects => matches!(self, Ready),
            Command::Exit => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Finalizing => "finalizing",
            SessionState::Localizing => "localizing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands a caller can issue to the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Push mapping settings to the engine and reset it
    Configure,
    BeginScan,
    /// End mapping and let the engine finalize what it has
    FinishScan,
    /// Cancel mapping; no outcome is delivered
    StopScan,
    BeginLocalize,
    PlaceObject,
    ClearObjects,
    Exit,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Configure => "Configure",
            Command::BeginScan => "BeginScan",
            Command::FinishScan => "FinishScan",
            Command::StopScan => "StopScan",
            Command::BeginLocalize => "BeginLocalize",
            Command::PlaceObject => "PlaceObject",
            Command::ClearObjects => "ClearObjects",
            Command::Exit => "Exit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast to observers on every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
}
