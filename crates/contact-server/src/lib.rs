//! Contact server: time-boxed ATC contact correlation and sector occupancy
//! tracking on a fixed polling cycle.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod correlator;
pub mod loops;
pub mod persistence;
pub mod polygon_cache;
pub mod state;
pub mod store;
