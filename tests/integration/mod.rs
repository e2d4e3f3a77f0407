//! Integration tests for anchorkeep
//!
//! These tests drive the session manager end to end against mock engines,
//! real blob storage and a real SQLite database.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod persistence;
pub mod session_flow;
