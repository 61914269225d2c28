//! Sector occupancy state machine.
//!
//! Each callsign is either untracked or inside exactly one sector. A
//! transition closes the open record and, unless the flight left controlled
//! airspace, opens a new one at the same sample.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{PositionSample, SampleError, SectorOccupancyRecord};
use crate::polygon::PolygonSet;

/// Records emitted by one position update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccupancyUpdate {
    /// Previous record, now stamped with exit time and altitude.
    pub closed: Option<SectorOccupancyRecord>,
    /// Newly opened record for the sector just entered.
    pub opened: Option<SectorOccupancyRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Missing or out-of-range coordinates, or a non-finite altitude.
    Malformed,
    /// Older than the last sample already applied for this callsign.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// Still in the same sector (or still outside all sectors).
    Unchanged,
    Changed(OccupancyUpdate),
    Skipped(SkipReason),
}

impl TrackOutcome {
    pub fn closed(&self) -> Option<&SectorOccupancyRecord> {
        match self {
            TrackOutcome::Changed(update) => update.closed.as_ref(),
            _ => None,
        }
    }

    pub fn opened(&self) -> Option<&SectorOccupancyRecord> {
        match self {
            TrackOutcome::Changed(update) => update.opened.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedFlight {
    open: Option<SectorOccupancyRecord>,
    last_timestamp: DateTime<Utc>,
    last_altitude_ft: f64,
}

impl TrackedFlight {
    fn close_open(
        &mut self,
        timestamp: DateTime<Utc>,
        altitude_ft: f64,
    ) -> Option<SectorOccupancyRecord> {
        let mut record = self.open.take()?;
        record.close(timestamp, altitude_ft);
        Some(record)
    }
}

/// Per-callsign open-record table. At most one open record per callsign.
#[derive(Debug, Default)]
pub struct SectorTracker {
    flights: HashMap<String, TrackedFlight>,
}

impl SectorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one position sample.
    pub fn track_position(&mut self, sample: &PositionSample, sectors: &PolygonSet) -> TrackOutcome {
        let Some(position) = sample.position.filter(|_| sample.altitude_ft.is_finite()) else {
            return TrackOutcome::Skipped(SkipReason::Malformed);
        };

        if let Some(existing) = self.flights.get(&sample.callsign) {
            if sample.timestamp < existing.last_timestamp {
                return TrackOutcome::Skipped(SkipReason::Stale);
            }
        }

        let current = sectors
            .sector_at(position.lat, position.lon)
            .map(|sector| sector.name.clone());

        let flight = self
            .flights
            .entry(sample.callsign.clone())
            .or_insert_with(|| TrackedFlight {
                open: None,
                last_timestamp: sample.timestamp,
                last_altitude_ft: sample.altitude_ft,
            });
        flight.last_timestamp = sample.timestamp;
        flight.last_altitude_ft = sample.altitude_ft;

        let open_sector = flight.open.as_ref().map(|r| r.sector_name.as_str());
        if open_sector == current.as_deref() {
            return TrackOutcome::Unchanged;
        }

        let closed = flight.close_open(sample.timestamp, sample.altitude_ft);
        let opened = current.map(|sector_name| {
            SectorOccupancyRecord::open(
                sample.callsign.clone(),
                sector_name,
                sample.timestamp,
                sample.altitude_ft,
            )
        });
        flight.open = opened.clone();

        TrackOutcome::Changed(OccupancyUpdate { closed, opened })
    }

    /// Convenience form taking raw values; returns the closed record, if any.
    pub fn track(
        &mut self,
        callsign: &str,
        lat: f64,
        lon: f64,
        altitude_ft: f64,
        timestamp: DateTime<Utc>,
        sectors: &PolygonSet,
    ) -> Result<Option<SectorOccupancyRecord>, SampleError> {
        let sample = PositionSample::new(callsign, lat, lon, altitude_ft, timestamp)?;
        Ok(self.track_position(&sample, sectors).closed().cloned())
    }

    /// Forget a callsign, closing any open record at its last observed sample.
    pub fn end_session(&mut self, callsign: &str) -> Option<SectorOccupancyRecord> {
        let mut flight = self.flights.remove(callsign)?;
        let (timestamp, altitude_ft) = (flight.last_timestamp, flight.last_altitude_ft);
        flight.close_open(timestamp, altitude_ft)
    }

    /// End every tracked session whose callsign is absent from `live`.
    ///
    /// Closed records come back sorted by callsign.
    pub fn reap_missing(&mut self, live: &HashSet<String>) -> Vec<SectorOccupancyRecord> {
        let mut missing: Vec<String> = self
            .flights
            .keys()
            .filter(|callsign| !live.contains(*callsign))
            .cloned()
            .collect();
        missing.sort();
        missing
            .into_iter()
            .filter_map(|callsign| self.end_session(&callsign))
            .collect()
    }

    /// End every session, e.g. at shutdown.
    pub fn close_all(&mut self) -> Vec<SectorOccupancyRecord> {
        let mut callsigns: Vec<String> = self.flights.keys().cloned().collect();
        callsigns.sort();
        callsigns
            .into_iter()
            .filter_map(|callsign| self.end_session(&callsign))
            .collect()
    }

    /// Re-adopt an open record loaded from storage.
    ///
    /// `last_seen` is the newest stored position for the callsign; a later
    /// close uses it instead of the entry sample. Rejected when the record
    /// is already closed or the callsign has an open record.
    pub fn restore(
        &mut self,
        record: SectorOccupancyRecord,
        last_seen: Option<&PositionSample>,
    ) -> bool {
        if !record.is_open() {
            return false;
        }
        if let Some(existing) = self.flights.get(&record.callsign) {
            if existing.open.is_some() {
                return false;
            }
        }
        let (last_timestamp, last_altitude_ft) = match last_seen {
            Some(sample)
                if sample.callsign.eq_ignore_ascii_case(&record.callsign)
                    && sample.timestamp >= record.entry_timestamp
                    && sample.altitude_ft.is_finite() =>
            {
                (sample.timestamp, sample.altitude_ft)
            }
            _ => (record.entry_timestamp, record.entry_altitude_ft),
        };
        self.flights.insert(
            record.callsign.clone(),
            TrackedFlight {
                last_timestamp,
                last_altitude_ft,
                open: Some(record),
            },
        );
        true
    }

    pub fn open_record(&self, callsign: &str) -> Option<&SectorOccupancyRecord> {
        self.flights.get(callsign).and_then(|flight| flight.open.as_ref())
    }

    pub fn open_count(&self) -> usize {
        self.flights.values().filter(|f| f.open.is_some()).count()
    }

    pub fn tracked_count(&self) -> usize {
        self.flights.len()
    }
}

/// How aggregations treat records that are still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "until", rename_all = "snake_case")]
pub enum OpenRecordPolicy {
    /// Leave open records out.
    Exclude,
    /// Count open records as lasting until the given instant.
    OngoingUntil(DateTime<Utc>),
}

/// Total seconds spent per sector across the given records.
pub fn occupancy_seconds_by_sector(
    records: &[SectorOccupancyRecord],
    policy: OpenRecordPolicy,
) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for record in records {
        let seconds = match (record.duration_seconds(), policy) {
            (Some(seconds), _) => seconds,
            (None, OpenRecordPolicy::Exclude) => continue,
            (None, OpenRecordPolicy::OngoingUntil(now)) => {
                (now - record.entry_timestamp).num_seconds().max(0)
            }
        };
        *totals.entry(record.sector_name.clone()).or_insert(0) += seconds;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::SectorPolygon;
    use chrono::TimeZone;
    use serde_json::Map;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn square(name: &str, lat0: f64, lon0: f64, size: f64) -> SectorPolygon {
        SectorPolygon::from_lat_lon(
            name,
            &[
                [lat0, lon0],
                [lat0, lon0 + size],
                [lat0 + size, lon0 + size],
                [lat0 + size, lon0],
            ],
            None,
            Map::new(),
        )
        .unwrap()
    }

    /// A at lon 0..1, B at lon 1..2 (shared edge goes to A by name), gap after lon 3.
    fn sectors() -> PolygonSet {
        PolygonSet::new(vec![
            square("A", 0.0, 0.0, 1.0),
            square("B", 0.0, 1.0, 1.0),
            square("C", 0.0, 3.0, 1.0),
        ])
    }

    fn sample(lon: f64, alt: f64, ts: i64) -> PositionSample {
        PositionSample::new("QFA1", 0.5, lon, alt, t(ts)).unwrap()
    }

    #[test]
    fn a_a_b_yields_one_closed_and_one_open_record() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();

        let first = tracker.track_position(&sample(0.5, 3000.0, 0), &sectors);
        assert_eq!(first.opened().unwrap().sector_name, "A");
        assert!(first.closed().is_none());

        assert_eq!(
            tracker.track_position(&sample(0.6, 3500.0, 60), &sectors),
            TrackOutcome::Unchanged
        );

        let third = tracker.track_position(&sample(1.5, 4000.0, 120), &sectors);
        let closed = third.closed().unwrap();
        assert_eq!(closed.sector_name, "A");
        assert_eq!(closed.entry_timestamp, t(0));
        assert_eq!(closed.entry_altitude_ft, 3000.0);
        assert_eq!(closed.exit_timestamp, Some(t(120)));
        assert_eq!(closed.exit_altitude_ft, Some(4000.0));
        assert_eq!(closed.duration_seconds(), Some(120));

        let opened = third.opened().unwrap();
        assert_eq!(opened.sector_name, "B");
        assert_eq!(opened.entry_timestamp, t(120));
        assert!(opened.is_open());
        assert_eq!(tracker.open_count(), 1);
    }

    #[test]
    fn leaving_into_open_airspace_closes_without_opening() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        tracker.track_position(&sample(0.5, 3000.0, 0), &sectors);

        let out = tracker.track_position(&sample(2.5, 9000.0, 60), &sectors);
        assert_eq!(out.closed().unwrap().sector_name, "A");
        assert!(out.opened().is_none());
        assert!(tracker.open_record("QFA1").is_none());

        // Staying outside is a no-op, re-entering opens.
        assert_eq!(
            tracker.track_position(&sample(2.6, 9000.0, 120), &sectors),
            TrackOutcome::Unchanged
        );
        let back = tracker.track_position(&sample(3.5, 9000.0, 180), &sectors);
        assert!(back.closed().is_none());
        assert_eq!(back.opened().unwrap().sector_name, "C");
    }

    #[test]
    fn first_sample_outside_all_sectors_creates_nothing() {
        let mut tracker = SectorTracker::new();
        let out = tracker.track_position(&sample(2.5, 1000.0, 0), &sectors());
        assert_eq!(out, TrackOutcome::Unchanged);
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn malformed_sample_is_skipped_and_record_stays_open() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        tracker.track_position(&sample(0.5, 3000.0, 0), &sectors);

        let bad = PositionSample::new("QFA1", 123.0, 0.5, 3000.0, t(60)).unwrap();
        assert_eq!(
            tracker.track_position(&bad, &sectors),
            TrackOutcome::Skipped(SkipReason::Malformed)
        );
        let nan_alt = PositionSample::new("QFA1", 0.5, 1.5, f64::NAN, t(60)).unwrap();
        assert_eq!(
            tracker.track_position(&nan_alt, &sectors),
            TrackOutcome::Skipped(SkipReason::Malformed)
        );
        assert_eq!(tracker.open_record("QFA1").unwrap().sector_name, "A");
    }

    #[test]
    fn stale_sample_is_skipped() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        tracker.track_position(&sample(0.5, 3000.0, 120), &sectors);
        assert_eq!(
            tracker.track_position(&sample(1.5, 3000.0, 60), &sectors),
            TrackOutcome::Skipped(SkipReason::Stale)
        );
        assert_eq!(tracker.open_record("QFA1").unwrap().sector_name, "A");
    }

    #[test]
    fn end_session_closes_at_last_observed_sample() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        tracker.track_position(&sample(0.5, 3000.0, 0), &sectors);
        tracker.track_position(&sample(0.7, 3200.0, 60), &sectors);

        let closed = tracker.end_session("QFA1").unwrap();
        assert_eq!(closed.exit_timestamp, Some(t(60)));
        assert_eq!(closed.exit_altitude_ft, Some(3200.0));
        assert_eq!(tracker.tracked_count(), 0);
        assert!(tracker.end_session("QFA1").is_none());
    }

    #[test]
    fn reap_missing_closes_only_absent_callsigns() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        tracker.track_position(&sample(0.5, 3000.0, 0), &sectors);
        let other = PositionSample::new("VOZ2", 0.5, 1.5, 5000.0, t(0)).unwrap();
        tracker.track_position(&other, &sectors);

        let live: HashSet<String> = ["QFA1".to_string()].into_iter().collect();
        let closed = tracker.reap_missing(&live);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].callsign, "VOZ2");
        assert!(tracker.open_record("QFA1").is_some());
        assert!(tracker.open_record("VOZ2").is_none());
    }

    #[test]
    fn at_most_one_open_record_per_callsign() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        for (i, lon) in [0.5, 1.5, 0.5, 3.5, 2.5, 1.5].iter().enumerate() {
            tracker.track_position(&sample(*lon, 1000.0, i as i64 * 60), &sectors);
            assert!(tracker.open_count() <= 1);
        }
        let restored = SectorOccupancyRecord::open("QFA1", "C", t(0), 0.0);
        assert!(!tracker.restore(restored, None));
    }

    #[test]
    fn restore_adopts_open_record() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        assert!(tracker.restore(SectorOccupancyRecord::open("QFA1", "A", t(0), 2000.0), None));
        // Same sector continues the restored record.
        assert_eq!(
            tracker.track_position(&sample(0.5, 2500.0, 60), &sectors),
            TrackOutcome::Unchanged
        );
        let closed = tracker.close_all();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_timestamp, Some(t(60)));
    }

    #[test]
    fn restored_record_closes_at_last_stored_sample() {
        let mut tracker = SectorTracker::new();
        let record = SectorOccupancyRecord::open("QFA1", "A", t(0), 2000.0);
        let last_seen = sample(0.5, 3500.0, 3000);
        assert!(tracker.restore(record, Some(&last_seen)));

        let closed = tracker.reap_missing(&HashSet::new());
        assert_eq!(closed[0].exit_timestamp, Some(t(3000)));
        assert_eq!(closed[0].exit_altitude_ft, Some(3500.0));
    }

    #[test]
    fn restore_ignores_last_sample_older_than_entry() {
        let mut tracker = SectorTracker::new();
        let record = SectorOccupancyRecord::open("QFA1", "A", t(600), 2000.0);
        assert!(tracker.restore(record, Some(&sample(0.5, 3500.0, 0))));
        assert_eq!(tracker.close_all()[0].exit_timestamp, Some(t(600)));
    }

    #[test]
    fn open_record_policy_is_explicit() {
        let mut closed = SectorOccupancyRecord::open("QFA1", "A", t(0), 0.0);
        closed.close(t(100), 0.0);
        let open = SectorOccupancyRecord::open("QFA1", "B", t(100), 0.0);
        let records = vec![closed, open];

        let excluded = occupancy_seconds_by_sector(&records, OpenRecordPolicy::Exclude);
        assert_eq!(excluded.get("A"), Some(&100));
        assert_eq!(excluded.get("B"), None);

        let ongoing = occupancy_seconds_by_sector(&records, OpenRecordPolicy::OngoingUntil(t(160)));
        assert_eq!(ongoing.get("B"), Some(&60));
    }

    #[test]
    fn raw_track_returns_closed_record() {
        let sectors = sectors();
        let mut tracker = SectorTracker::new();
        assert_eq!(tracker.track("QFA1", 0.5, 0.5, 1000.0, t(0), &sectors), Ok(None));
        let closed = tracker
            .track("QFA1", 0.5, 1.5, 1000.0, t(60), &sectors)
            .unwrap()
            .unwrap();
        assert_eq!(closed.sector_name, "A");
        assert!(tracker.track("", 0.5, 1.5, 1000.0, t(60), &sectors).is_err());
    }
}
