//! SQLite persistence for studyloom.
//!
//! Implements the `studyloom_core::Store` trait over a single SQLite
//! database file with WAL journaling and foreign keys on.

pub mod sqlite;

pub use sqlite::SqliteStore;
