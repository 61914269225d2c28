//! In-memory store backed by DashMap, for tests and local replay.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;

use contact_core::{
    ControllerSession, FlightSession, PositionSample, SectorOccupancyRecord, SubjectKind,
    TimeWindow, TransceiverSample,
};

use super::{OccupancyStore, SampleStore, Snapshot, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    samples: DashMap<SubjectKind, Vec<TransceiverSample>>,
    controller_sessions: DashMap<String, ControllerSession>,
    flight_sessions: DashMap<String, FlightSession>,
    snapshot: Mutex<Option<Snapshot>>,
    last_positions: DashMap<String, PositionSample>,
    occupancy: Mutex<Vec<SectorOccupancyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sample(&self, sample: TransceiverSample) {
        self.samples.entry(sample.kind).or_default().push(sample);
    }

    pub fn upsert_controller_session(&self, session: ControllerSession) {
        self.controller_sessions
            .insert(session.callsign.clone(), session);
    }

    pub fn upsert_flight_session(&self, session: FlightSession) {
        self.flight_sessions.insert(session.callsign.clone(), session);
    }

    /// Replace the latest snapshot and remember each usable position.
    pub fn set_snapshot(&self, snapshot: Snapshot) {
        for flight in snapshot.flights.iter().filter(|f| f.is_usable()) {
            let newer = self
                .last_positions
                .get(&flight.callsign)
                .map_or(true, |last| last.timestamp <= flight.timestamp);
            if newer {
                self.last_positions
                    .insert(flight.callsign.clone(), flight.clone());
            }
        }
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    /// All occupancy records, in insertion order.
    pub fn occupancy_records(&self) -> Vec<SectorOccupancyRecord> {
        self.occupancy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn same_record(a: &SectorOccupancyRecord, b: &SectorOccupancyRecord) -> bool {
    a.callsign == b.callsign
        && a.sector_name == b.sector_name
        && a.entry_timestamp == b.entry_timestamp
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn samples_for(
        &self,
        kind: SubjectKind,
        callsign: &str,
        window: TimeWindow,
    ) -> Result<Vec<TransceiverSample>, StoreError> {
        Ok(self
            .samples
            .get(&kind)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| {
                        s.callsign.eq_ignore_ascii_case(callsign) && window.contains(s.timestamp)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn counterpart_samples(
        &self,
        kind: SubjectKind,
        window: TimeWindow,
    ) -> Result<Vec<TransceiverSample>, StoreError> {
        Ok(self
            .samples
            .get(&kind)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| window.contains(s.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn controller_sessions(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ControllerSession>, StoreError> {
        Ok(self
            .controller_sessions
            .iter()
            .filter(|s| s.logon_time <= window.end && s.last_seen_time >= window.start)
            .map(|s| s.value().clone())
            .collect())
    }

    async fn flight_session(&self, callsign: &str) -> Result<Option<FlightSession>, StoreError> {
        Ok(self
            .flight_sessions
            .get(&callsign.to_ascii_uppercase())
            .map(|s| s.value().clone()))
    }

    async fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn last_position(&self, callsign: &str) -> Result<Option<PositionSample>, StoreError> {
        Ok(self
            .last_positions
            .get(&callsign.to_ascii_uppercase())
            .map(|p| p.value().clone()))
    }
}

#[async_trait]
impl OccupancyStore for MemoryStore {
    async fn append_occupancy(&self, record: &SectorOccupancyRecord) -> Result<(), StoreError> {
        let mut records = self.occupancy.lock().unwrap_or_else(|e| e.into_inner());
        if records.iter().any(|r| same_record(r, record)) {
            return Ok(());
        }
        if record.is_open()
            && records
                .iter()
                .any(|r| r.is_open() && r.callsign == record.callsign)
        {
            return Err(StoreError::Unavailable(format!(
                "{} already has an open occupancy record",
                record.callsign
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn close_occupancy(&self, record: &SectorOccupancyRecord) -> Result<(), StoreError> {
        let mut records = self.occupancy.lock().unwrap_or_else(|e| e.into_inner());
        match records
            .iter_mut()
            .find(|r| same_record(r, record))
        {
            Some(existing) => {
                existing.exit_timestamp = record.exit_timestamp;
                existing.exit_altitude_ft = record.exit_altitude_ft;
            }
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn open_occupancy(&self) -> Result<Vec<SectorOccupancyRecord>, StoreError> {
        Ok(self
            .occupancy_records()
            .into_iter()
            .filter(|r| r.is_open())
            .collect())
    }

    async fn occupancy_for(
        &self,
        callsign: &str,
    ) -> Result<Vec<SectorOccupancyRecord>, StoreError> {
        let mut records: Vec<_> = self
            .occupancy_records()
            .into_iter()
            .filter(|r| r.callsign == callsign)
            .collect();
        records.sort_by_key(|r| r.entry_timestamp);
        Ok(records)
    }
}
