//! SQLite implementation of the store traits.

use async_trait::async_trait;

use contact_core::{
    ControllerSession, FlightSession, PositionSample, SectorOccupancyRecord, SubjectKind,
    TimeWindow, TransceiverSample,
};

use super::{OccupancyStore, SampleStore, Snapshot, StoreError};
use crate::persistence::{occupancy, positions, samples, sessions, Database};

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn ingest_samples(&self, batch: &[TransceiverSample]) -> Result<(), StoreError> {
        samples::insert_samples(self.db.pool(), batch).await
    }

    pub async fn ingest_controller_session(
        &self,
        session: &ControllerSession,
    ) -> Result<(), StoreError> {
        sessions::upsert_controller_session(self.db.pool(), session).await
    }

    pub async fn ingest_flight_session(&self, session: &FlightSession) -> Result<(), StoreError> {
        sessions::upsert_flight_session(self.db.pool(), session).await
    }

    pub async fn ingest_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        positions::insert_snapshot(self.db.pool(), snapshot).await
    }
}

#[async_trait]
impl SampleStore for SqliteStore {
    async fn samples_for(
        &self,
        kind: SubjectKind,
        callsign: &str,
        window: TimeWindow,
    ) -> Result<Vec<TransceiverSample>, StoreError> {
        samples::load_samples_for(self.db.pool(), kind, callsign, window).await
    }

    async fn counterpart_samples(
        &self,
        kind: SubjectKind,
        window: TimeWindow,
    ) -> Result<Vec<TransceiverSample>, StoreError> {
        samples::load_samples_in_window(self.db.pool(), kind, window).await
    }

    async fn controller_sessions(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ControllerSession>, StoreError> {
        sessions::load_controller_sessions(self.db.pool(), window).await
    }

    async fn flight_session(&self, callsign: &str) -> Result<Option<FlightSession>, StoreError> {
        sessions::load_latest_flight_session(self.db.pool(), callsign).await
    }

    async fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        positions::load_latest_snapshot(self.db.pool()).await
    }

    async fn last_position(&self, callsign: &str) -> Result<Option<PositionSample>, StoreError> {
        positions::load_last_position(self.db.pool(), callsign).await
    }
}

#[async_trait]
impl OccupancyStore for SqliteStore {
    async fn append_occupancy(&self, record: &SectorOccupancyRecord) -> Result<(), StoreError> {
        occupancy::insert_occupancy(self.db.pool(), record).await
    }

    async fn close_occupancy(&self, record: &SectorOccupancyRecord) -> Result<(), StoreError> {
        occupancy::close_occupancy(self.db.pool(), record).await
    }

    async fn open_occupancy(&self) -> Result<Vec<SectorOccupancyRecord>, StoreError> {
        occupancy::load_open_occupancy(self.db.pool()).await
    }

    async fn occupancy_for(
        &self,
        callsign: &str,
    ) -> Result<Vec<SectorOccupancyRecord>, StoreError> {
        occupancy::load_occupancy_for(self.db.pool(), callsign).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use chrono::{DateTime, TimeZone, Utc};
    use contact_core::GeoPoint;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn store() -> SqliteStore {
        SqliteStore::new(init_database(":memory:", 1).await.unwrap())
    }

    #[tokio::test]
    async fn sample_queries_respect_the_window() {
        let store = store().await;
        let batch: Vec<_> = (0..5)
            .map(|i| {
                TransceiverSample::new(
                    SubjectKind::Flight,
                    "QFA1",
                    118_700_000,
                    t(i * 60),
                    Some(GeoPoint::new(-33.9, 151.1).unwrap()),
                )
                .unwrap()
            })
            .collect();
        store.ingest_samples(&batch).await.unwrap();

        let window = TimeWindow::new(t(60), t(180)).unwrap();
        let own = store
            .samples_for(SubjectKind::Flight, "QFA1", window)
            .await
            .unwrap();
        assert_eq!(own.len(), 3);
        assert_eq!(own[0].timestamp, t(60));
        assert_eq!(own[0].position, batch[1].position);

        let other_kind = store
            .counterpart_samples(SubjectKind::ControllerPosition, window)
            .await
            .unwrap();
        assert!(other_kind.is_empty());
    }

    #[tokio::test]
    async fn missing_coordinates_round_trip_as_none() {
        let store = store().await;
        let sample = TransceiverSample::with_raw_position(
            SubjectKind::ControllerPosition,
            "SY_TWR",
            120_500_000,
            t(0),
            None,
            Some(151.0),
        )
        .unwrap();
        store.ingest_samples(&[sample]).await.unwrap();

        let loaded = store
            .counterpart_samples(
                SubjectKind::ControllerPosition,
                TimeWindow::new(t(-10), t(10)).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].position.is_none());
    }

    #[tokio::test]
    async fn latest_snapshot_returns_newest_poll_only() {
        let store = store().await;
        for (secs, callsign) in [(0, "QFA1"), (60, "VOZ2")] {
            let snapshot = Snapshot {
                taken_at: t(secs),
                flights: vec![PositionSample::new(callsign, -33.9, 151.1, 5000.0, t(secs)).unwrap()],
            };
            store.ingest_snapshot(&snapshot).await.unwrap();
        }

        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.taken_at, t(60));
        assert_eq!(latest.flights.len(), 1);
        assert_eq!(latest.flights[0].callsign, "VOZ2");
    }

    #[tokio::test]
    async fn non_finite_altitude_does_not_drop_the_snapshot() {
        let store = store().await;
        let snapshot = Snapshot {
            taken_at: t(0),
            flights: vec![
                PositionSample::new("QFA1", -33.9, 151.1, 3000.0, t(0)).unwrap(),
                PositionSample::new("VOZ2", -33.8, 151.2, f64::NAN, t(0)).unwrap(),
            ],
        };
        store.ingest_snapshot(&snapshot).await.unwrap();

        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.flights.len(), 2);
        assert_eq!(latest.flights[0].altitude_ft, 3000.0);
        assert_eq!(latest.flights[1].callsign, "VOZ2");
        assert!(latest.flights[1].altitude_ft.is_nan());
        assert!(!latest.flights[1].is_usable());
    }

    #[tokio::test]
    async fn last_position_skips_unusable_rows() {
        let store = store().await;
        for (secs, altitude) in [(0, 3000.0), (60, 4000.0), (120, f64::NAN)] {
            let snapshot = Snapshot {
                taken_at: t(secs),
                flights: vec![PositionSample::new("QFA1", -33.9, 151.1, altitude, t(secs)).unwrap()],
            };
            store.ingest_snapshot(&snapshot).await.unwrap();
        }

        let last = store.last_position("qfa1").await.unwrap().unwrap();
        assert_eq!(last.timestamp, t(60));
        assert_eq!(last.altitude_ft, 4000.0);
        assert!(store.last_position("VOZ2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subject_lookups_ignore_callsign_case() {
        let store = store().await;
        let sample = TransceiverSample::new(SubjectKind::Flight, "qfa1", 118_700_000, t(0), None)
            .unwrap();
        store.ingest_samples(&[sample]).await.unwrap();
        store
            .ingest_flight_session(&FlightSession::new("QFA1", None, None, t(0), t(60)).unwrap())
            .await
            .unwrap();

        let window = TimeWindow::new(t(-10), t(10)).unwrap();
        let own = store
            .samples_for(SubjectKind::Flight, "Qfa1", window)
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].callsign, "QFA1");
        assert!(store.flight_session("qfa1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_open_record_for_a_callsign_is_rejected() {
        let store = store().await;
        let first = SectorOccupancyRecord::open("QFA1", "SY_APP", t(0), 3000.0);
        let second = SectorOccupancyRecord::open("QFA1", "ML_CTR", t(60), 9000.0);

        store.append_occupancy(&first).await.unwrap();
        assert!(store.append_occupancy(&second).await.is_err());
    }

    #[tokio::test]
    async fn closing_updates_the_open_row() {
        let store = store().await;
        let open = SectorOccupancyRecord::open("QFA1", "SY_APP", t(0), 3000.0);
        store.append_occupancy(&open).await.unwrap();

        let mut closed = open.clone();
        closed.exit_timestamp = Some(t(300));
        closed.exit_altitude_ft = Some(8000.0);
        store.close_occupancy(&closed).await.unwrap();

        assert!(store.open_occupancy().await.unwrap().is_empty());
        let history = store.occupancy_for("QFA1").await.unwrap();
        assert_eq!(history, vec![closed]);
    }

    #[tokio::test]
    async fn replayed_occupancy_writes_leave_one_row() {
        let store = store().await;
        let open = SectorOccupancyRecord::open("QFA1", "SY_APP", t(0), 3000.0);
        store.append_occupancy(&open).await.unwrap();
        store.append_occupancy(&open).await.unwrap();

        let mut closed = open.clone();
        closed.exit_timestamp = Some(t(300));
        closed.exit_altitude_ft = Some(8000.0);
        store.close_occupancy(&closed).await.unwrap();
        store.close_occupancy(&closed).await.unwrap();

        assert_eq!(store.occupancy_for("QFA1").await.unwrap(), vec![closed]);
    }

    #[tokio::test]
    async fn controller_sessions_filter_by_overlap() {
        let store = store().await;
        store
            .ingest_controller_session(&ControllerSession::new("SY_TWR", 4, t(0), t(600)).unwrap())
            .await
            .unwrap();
        store
            .ingest_controller_session(&ControllerSession::new("ML_CTR", 6, t(1000), t(2000)).unwrap())
            .await
            .unwrap();

        let sessions = store
            .controller_sessions(TimeWindow::new(t(500), t(900)).unwrap())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].callsign, "SY_TWR");
    }
}
