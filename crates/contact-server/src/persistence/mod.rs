//! Persistence layer for the contact server.
//!
//! SQLite-backed storage for transceiver samples, sessions, live positions
//! and sector occupancy.

pub mod db;
pub mod occupancy;
pub mod positions;
pub mod samples;
pub mod sessions;

pub use db::{init_database, Database};
