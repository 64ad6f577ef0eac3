//! Persistent state: SQLite datastore for incidents and archive locations.

pub mod incident;
pub mod sqlite;
