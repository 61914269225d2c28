//! Data store seam.
//!
//! The correlator and the cycle loop only talk to these traits. Every sample
//! query is bounded by a time window so no caller ever pulls the full sample
//! history.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use contact_core::{
    ControllerSession, FlightSession, PositionSample, SectorOccupancyRecord, SubjectKind,
    TimeWindow, TransceiverSample,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to decode stored row: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Positions of every flight in one polling snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub flights: Vec<PositionSample>,
}

#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Samples of one subject inside `window`.
    async fn samples_for(
        &self,
        kind: SubjectKind,
        callsign: &str,
        window: TimeWindow,
    ) -> Result<Vec<TransceiverSample>, StoreError>;

    /// Samples of every callsign of `kind` inside `window`.
    async fn counterpart_samples(
        &self,
        kind: SubjectKind,
        window: TimeWindow,
    ) -> Result<Vec<TransceiverSample>, StoreError>;

    /// Controller sessions overlapping `window`.
    async fn controller_sessions(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ControllerSession>, StoreError>;

    /// Most recent session for a flight callsign.
    async fn flight_session(&self, callsign: &str) -> Result<Option<FlightSession>, StoreError>;

    /// Latest polling snapshot of flight positions.
    async fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Newest well-formed position stored for a callsign.
    async fn last_position(&self, callsign: &str) -> Result<Option<PositionSample>, StoreError>;
}

/// Occupancy writes are idempotent per (callsign, sector, entry time), so a
/// write replayed after an interrupted flush never duplicates a row.
#[async_trait]
pub trait OccupancyStore: Send + Sync {
    /// Persist a newly opened record.
    async fn append_occupancy(&self, record: &SectorOccupancyRecord) -> Result<(), StoreError>;

    /// Stamp exit time and altitude on a stored record, inserting it if it
    /// was never persisted open.
    async fn close_occupancy(&self, record: &SectorOccupancyRecord) -> Result<(), StoreError>;

    /// All records without an exit timestamp.
    async fn open_occupancy(&self) -> Result<Vec<SectorOccupancyRecord>, StoreError>;

    /// Every record for a callsign, oldest first.
    async fn occupancy_for(&self, callsign: &str)
        -> Result<Vec<SectorOccupancyRecord>, StoreError>;
}
