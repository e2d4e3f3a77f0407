//! Mapping session lifecycle
//!
//! [`SessionManager`] owns the lifecycle state, drives the mapping engine and
//! tracker, persists finalized maps and delivers one outcome per scan or
//! localization. [`SessionContext`] is the part of that state that survives
//! restarts.

mod context;
mod manager;
mod outcome;
mod state;

pub use context::{SessionContext, KEY_CURRENT_MAP_PATH, KEY_LAST_SIGNATURE};
pub use manager::{Engines, SessionManager};
pub use outcome::{FailureReason, LocalizeOutcome, MappingOutcome};
pub use state::{Command, SessionEvent, SessionState};
