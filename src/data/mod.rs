//! Durable key/value state and map history, backed by SQLite.

mod app_state;
mod database;
mod map_sessions;
mod migrations;

pub use app_state::AppStateStore;
pub use database::{Database, DatabaseError};
pub use map_sessions::{MapSessionRecord, MapSessionStore};
