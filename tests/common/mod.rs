//! Shared test utilities for anchorkeep
//!
//! - Session harness wired to mock engines and a scratch data directory
//! - Map fixtures

pub mod fixtures;
