//! In-memory state shared by the cycle loop and the binary.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use contact_core::{
    PolygonSet, PositionSample, SectorOccupancyRecord, SectorTracker, SkipReason, TrackOutcome,
};

use crate::backoff::Backoff;
use crate::config::PolygonPolicy;
use crate::polygon_cache::{ConfigurationError, PolygonCache};
use crate::store::Snapshot;

/// An occupancy write that has not reached the store yet.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Close(SectorOccupancyRecord),
    Open(SectorOccupancyRecord),
}

/// What one snapshot did to the tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotUpdate {
    pub closed: Vec<SectorOccupancyRecord>,
    pub opened: Vec<SectorOccupancyRecord>,
    /// Callsigns present in the previous snapshot and gone from this one.
    pub ended: Vec<String>,
    pub malformed: usize,
    pub stale: usize,
}

impl SnapshotUpdate {
    /// Closes first so a sector change never holds two open rows.
    pub fn writes(&self) -> Vec<PendingWrite> {
        self.closed
            .iter()
            .cloned()
            .map(PendingWrite::Close)
            .chain(self.opened.iter().cloned().map(PendingWrite::Open))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

struct Tracking {
    tracker: SectorTracker,
    live: HashSet<String>,
    last_snapshot_at: Option<DateTime<Utc>>,
}

/// Application state - polygon cache, occupancy tracker and loop bookkeeping.
pub struct AppState {
    polygons: PolygonCache,
    polygon_path: PathBuf,
    tracking_enabled: AtomicBool,
    tracking: Mutex<Tracking>,
    pending_writes: Mutex<Vec<PendingWrite>>,
    /// Departed callsigns whose session lookup failed.
    pending_departures: Mutex<Vec<String>>,
    cycle_busy: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    backoff: Mutex<Backoff>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    pub fn new(polygon_path: impl Into<PathBuf>, polling_interval: Duration) -> Self {
        Self {
            polygons: PolygonCache::new(),
            polygon_path: polygon_path.into(),
            tracking_enabled: AtomicBool::new(false),
            tracking: Mutex::new(Tracking {
                tracker: SectorTracker::new(),
                live: HashSet::new(),
                last_snapshot_at: None,
            }),
            pending_writes: Mutex::new(Vec::new()),
            pending_departures: Mutex::new(Vec::new()),
            cycle_busy: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            backoff: Mutex::new(Backoff::for_polling_interval(polling_interval)),
        }
    }

    pub fn polygon_path(&self) -> &Path {
        &self.polygon_path
    }

    /// Load the polygon source. Under `FailOpen` a bad source disables
    /// sector tracking instead of failing.
    pub async fn load_polygons(&self, policy: PolygonPolicy) -> Result<(), ConfigurationError> {
        match self.polygons.load(&self.polygon_path).await {
            Ok(_) => {
                self.tracking_enabled.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => match policy {
                PolygonPolicy::FailClosed => Err(err),
                PolygonPolicy::FailOpen => {
                    tracing::warn!("{} (sector tracking disabled)", err);
                    self.tracking_enabled.store(false, Ordering::SeqCst);
                    Ok(())
                }
            },
        }
    }

    /// Re-read the polygon source. On failure the previous set stays active.
    pub async fn reload_polygons(&self) -> bool {
        match self.polygons.reload(&self.polygon_path).await {
            Ok(_) => {
                self.tracking_enabled.store(true, Ordering::SeqCst);
                true
            }
            Err(err) => {
                tracing::warn!("Polygon reload failed, keeping previous set: {}", err);
                false
            }
        }
    }

    pub fn install_polygons(&self, set: PolygonSet) {
        self.polygons.insert(self.polygon_path.clone(), set);
        self.tracking_enabled.store(true, Ordering::SeqCst);
    }

    /// Active polygon set, `None` while tracking is disabled.
    pub fn polygons(&self) -> Option<Arc<PolygonSet>> {
        if !self.tracking_enabled.load(Ordering::SeqCst) {
            return None;
        }
        self.polygons.get(&self.polygon_path)
    }

    pub fn tracking_enabled(&self) -> bool {
        self.polygons().is_some()
    }

    /// Feed a polling snapshot to the tracker.
    ///
    /// Returns `None` when the snapshot is not newer than the last one applied.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) -> Option<SnapshotUpdate> {
        let sectors = self.polygons();
        let mut tracking = lock(&self.tracking);
        if tracking
            .last_snapshot_at
            .is_some_and(|last| snapshot.taken_at <= last)
        {
            return None;
        }
        tracking.last_snapshot_at = Some(snapshot.taken_at);

        let mut update = SnapshotUpdate::default();
        let live: HashSet<String> = snapshot
            .flights
            .iter()
            .map(|flight| flight.callsign.clone())
            .collect();

        if let Some(sectors) = sectors {
            for flight in &snapshot.flights {
                match tracking.tracker.track_position(flight, &sectors) {
                    TrackOutcome::Unchanged => {}
                    TrackOutcome::Changed(change) => {
                        update.closed.extend(change.closed);
                        update.opened.extend(change.opened);
                    }
                    TrackOutcome::Skipped(SkipReason::Malformed) => {
                        tracing::warn!("Skipping malformed position for {}", flight.callsign);
                        update.malformed += 1;
                    }
                    TrackOutcome::Skipped(SkipReason::Stale) => {
                        tracing::debug!("Skipping stale position for {}", flight.callsign);
                        update.stale += 1;
                    }
                }
            }
            update.closed.extend(tracking.tracker.reap_missing(&live));
        }

        let mut ended: Vec<String> = tracking.live.difference(&live).cloned().collect();
        ended.sort();
        update.ended = ended;
        tracking.live = live;

        Some(update)
    }

    /// Re-adopt open records loaded from storage, each with the newest
    /// stored position for its callsign. Returns how many were kept.
    pub fn restore_open(
        &self,
        records: Vec<(SectorOccupancyRecord, Option<PositionSample>)>,
    ) -> usize {
        let mut tracking = lock(&self.tracking);
        let mut restored = 0;
        for (record, last_seen) in records {
            let callsign = record.callsign.clone();
            if tracking.tracker.restore(record, last_seen.as_ref()) {
                tracking.live.insert(callsign);
                restored += 1;
            } else {
                tracing::warn!("Discarding duplicate open occupancy record for {}", callsign);
            }
        }
        restored
    }

    /// Close every open record, e.g. at shutdown.
    pub fn close_all_sessions(&self) -> Vec<SectorOccupancyRecord> {
        let mut tracking = lock(&self.tracking);
        tracking.live.clear();
        tracking.tracker.close_all()
    }

    pub fn open_records(&self) -> usize {
        lock(&self.tracking).tracker.open_count()
    }

    pub fn open_record(&self, callsign: &str) -> Option<SectorOccupancyRecord> {
        lock(&self.tracking).tracker.open_record(callsign).cloned()
    }

    /// Queue writes behind any left over from a failed flush.
    pub fn queue_writes(&self, writes: Vec<PendingWrite>) {
        lock(&self.pending_writes).extend(writes);
    }

    /// Oldest queued write. It stays queued until [`Self::complete_write`].
    pub fn next_pending_write(&self) -> Option<PendingWrite> {
        lock(&self.pending_writes).first().cloned()
    }

    /// Drop the oldest queued write once the store has accepted it.
    pub fn complete_write(&self) {
        let mut pending = lock(&self.pending_writes);
        if !pending.is_empty() {
            pending.remove(0);
        }
    }

    pub fn pending_write_count(&self) -> usize {
        lock(&self.pending_writes).len()
    }

    /// Keep departures for the next cycle, without duplicates.
    pub fn defer_departures(&self, callsigns: Vec<String>) {
        let mut pending = lock(&self.pending_departures);
        for callsign in callsigns {
            if !pending.contains(&callsign) {
                pending.push(callsign);
            }
        }
    }

    pub fn take_departures(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.pending_departures))
    }

    pub fn pending_departure_count(&self) -> usize {
        lock(&self.pending_departures).len()
    }

    /// Claim the cycle slot. `None` while the previous cycle still holds it.
    pub fn try_begin_cycle(self: &Arc<Self>) -> Option<CycleGuard> {
        self.cycle_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard {
                state: Arc::clone(self),
            })
    }

    pub fn cycle_busy(&self) -> bool {
        self.cycle_busy.load(Ordering::SeqCst)
    }

    pub fn record_cycle_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        lock(&self.backoff).reset();
    }

    pub fn record_cycle_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed cycle and return the backoff delay.
    pub fn record_cycle_failed(&self) -> Duration {
        self.failed.fetch_add(1, Ordering::Relaxed);
        lock(&self.backoff).fail()
    }

    pub fn backoff_ready(&self) -> bool {
        lock(&self.backoff).ready()
    }

    pub fn cycle_stats(&self) -> CycleStats {
        CycleStats {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Holds the cycle slot; releases it on drop.
pub struct CycleGuard {
    state: Arc<AppState>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.state.cycle_busy.store(false, Ordering::SeqCst);
    }
}
