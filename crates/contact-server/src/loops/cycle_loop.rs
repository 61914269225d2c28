//! Polling-cycle loop.
//!
//! Each tick takes the latest snapshot, advances sector occupancy, persists
//! the resulting records and correlates flights that left the network. A
//! tick that arrives while the previous cycle still runs is skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use contact_core::Subject;

use crate::batch::{run_batch, BatchOutcome, BatchSettings};
use crate::correlator::Correlator;
use crate::state::{AppState, PendingWrite};
use crate::store::{OccupancyStore, SampleStore, StoreError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything one cycle needs.
pub struct CycleContext {
    pub state: Arc<AppState>,
    pub samples: Arc<dyn SampleStore>,
    pub occupancy: Arc<dyn OccupancyStore>,
    pub correlator: Arc<Correlator>,
    pub batch: BatchSettings,
    pub polling_interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub duplicate: bool,
    pub flights: usize,
    pub closed: usize,
    pub opened: usize,
    pub malformed: usize,
    pub stale: usize,
    pub outcomes: Vec<BatchOutcome>,
}

/// Start the polling-cycle loop. Returns after shutdown once open records
/// have been closed and flushed.
pub async fn run_cycle_loop(ctx: Arc<CycleContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(ctx.polling_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let cancel = CancellationToken::new();
    let mut in_flight: Option<JoinHandle<()>> = None;

    tracing::info!(
        "Cycle loop started (interval {:?}, batch concurrency {})",
        ctx.polling_interval,
        ctx.batch.concurrency
    );
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Cycle loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                if !ctx.state.backoff_ready() {
                    tracing::debug!("Cycle deferred by store backoff");
                    continue;
                }
                let Some(guard) = ctx.state.try_begin_cycle() else {
                    ctx.state.record_cycle_skipped();
                    tracing::warn!(
                        "Previous cycle still running, skipping tick ({} skipped so far)",
                        ctx.state.cycle_stats().skipped
                    );
                    continue;
                };

                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                in_flight = Some(tokio::spawn(async move {
                    let _guard = guard;
                    match run_cycle(&ctx, &cancel).await {
                        Ok(report) => {
                            ctx.state.record_cycle_completed();
                            log_report(&report);
                        }
                        Err(err) => {
                            let delay = ctx.state.record_cycle_failed();
                            tracing::warn!("Cycle failed: {} (backing off {:?})", err, delay);
                        }
                    }
                }));
            }
        }
    }

    cancel.cancel();
    if let Some(mut handle) = in_flight.take() {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("In-flight cycle ended abnormally: {}", err),
            Err(_) => {
                tracing::warn!("In-flight cycle still running after {:?}, aborting", SHUTDOWN_GRACE);
                handle.abort();
            }
        }
    }

    let closed = ctx.state.close_all_sessions();
    let count = closed.len();
    ctx.state
        .queue_writes(closed.into_iter().map(PendingWrite::Close).collect());
    match flush_writes(&ctx.state, ctx.occupancy.as_ref()).await {
        Ok(written) => tracing::info!(
            "Closed {} open occupancy record(s), flushed {} write(s)",
            count,
            written
        ),
        Err(err) => tracing::warn!(
            "Final occupancy flush failed, {} write(s) lost: {}",
            ctx.state.pending_write_count(),
            err
        ),
    }
}

/// Run one cycle.
pub async fn run_cycle(
    ctx: &CycleContext,
    cancel: &CancellationToken,
) -> Result<CycleReport, StoreError> {
    // Writes left over from a failed cycle go out before anything new.
    flush_writes(&ctx.state, ctx.occupancy.as_ref()).await?;

    let Some(snapshot) = ctx.samples.latest_snapshot().await? else {
        return Ok(CycleReport::default());
    };
    let Some(update) = ctx.state.apply_snapshot(&snapshot) else {
        return Ok(CycleReport {
            duplicate: true,
            ..CycleReport::default()
        });
    };

    ctx.state.queue_writes(update.writes());
    // A failed flush is retried next cycle; departed flights still get
    // correlated now.
    let flushed = flush_writes(&ctx.state, ctx.occupancy.as_ref()).await;

    let subjects = departed_subjects(ctx, update.ended.clone()).await;
    let outcomes = if subjects.is_empty() {
        Vec::new()
    } else {
        run_batch(&ctx.correlator, subjects, ctx.batch, cancel).await
    };
    flushed?;

    Ok(CycleReport {
        duplicate: false,
        flights: snapshot.flights.len(),
        closed: update.closed.len(),
        opened: update.opened.len(),
        malformed: update.malformed,
        stale: update.stale,
        outcomes,
    })
}

/// Sessions for flights that left the network, including departures
/// deferred by an earlier failed lookup. A failed lookup defers that
/// callsign to the next cycle; the rest still get correlated.
async fn departed_subjects(ctx: &CycleContext, ended: Vec<String>) -> Vec<Subject> {
    let mut callsigns = ctx.state.take_departures();
    for callsign in ended {
        if !callsigns.contains(&callsign) {
            callsigns.push(callsign);
        }
    }

    let mut subjects = Vec::with_capacity(callsigns.len());
    let mut deferred = Vec::new();
    for callsign in callsigns {
        match ctx.samples.flight_session(&callsign).await {
            Ok(Some(session)) => subjects.push(Subject::Flight(session)),
            Ok(None) => tracing::debug!("No session recorded for departed flight {}", callsign),
            Err(err) => {
                tracing::warn!("Session lookup for departed flight {} failed: {}", callsign, err);
                deferred.push(callsign);
            }
        }
    }
    if !deferred.is_empty() {
        ctx.state.defer_departures(deferred);
    }
    subjects
}

/// Write queued occupancy changes in order. A write leaves the queue only
/// after the store accepts it, so an interrupted flush loses nothing.
async fn flush_writes(state: &AppState, store: &dyn OccupancyStore) -> Result<usize, StoreError> {
    let mut written = 0;
    while let Some(write) = state.next_pending_write() {
        match &write {
            PendingWrite::Close(record) => store.close_occupancy(record).await?,
            PendingWrite::Open(record) => store.append_occupancy(record).await?,
        }
        state.complete_write();
        written += 1;
    }
    Ok(written)
}

/// Re-adopt the open records left in storage by a previous run. Each record
/// is paired with the callsign's last stored position so a later close lands
/// on the last observed sample rather than the entry.
pub async fn restore_open_records(
    state: &AppState,
    samples: &dyn SampleStore,
    occupancy: &dyn OccupancyStore,
) -> Result<usize, StoreError> {
    let open = occupancy.open_occupancy().await?;
    let mut records = Vec::with_capacity(open.len());
    for record in open {
        let last_seen = samples.last_position(&record.callsign).await?;
        records.push((record, last_seen));
    }
    Ok(state.restore_open(records))
}

fn log_report(report: &CycleReport) {
    if report.duplicate {
        tracing::debug!("Snapshot unchanged since last cycle");
        return;
    }
    tracing::debug!(
        "Cycle: {} flight(s), {} closed, {} opened, {} malformed, {} stale",
        report.flights,
        report.closed,
        report.opened,
        report.malformed,
        report.stale
    );
    for outcome in &report.outcomes {
        if outcome.is_failure() {
            continue;
        }
        tracing::info!(
            "{}: {} ATC contact(s), {:.1}% of session on frequency",
            outcome.callsign,
            outcome.summary.atc_contacts_detected,
            outcome.summary.controller_time_percentage
        );
        match serde_json::to_string(&outcome.summary) {
            Ok(json) => tracing::debug!("{} breakdown: {}", outcome.callsign, json),
            Err(err) => tracing::warn!("Failed to encode summary for {}: {}", outcome.callsign, err),
        }
    }
}
