//! Time-boxed correlation against a sample store.
//!
//! Every run owns a [`Deadline`]: a tokio instant plus a cancellation token.
//! Store I/O races the deadline in a `select!`; the synchronous matching
//! loop polls it between counterpart groups.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use contact_core::{
    Correlation, CorrelationEngine, CorrelationError as EngineError, CorrelationSettings,
    ControllerTypeProfile, InteractionSummary, Subject, SubjectKind, TransceiverSample,
};

use crate::store::{SampleStore, StoreError};

/// Expiry instant plus an owned cancellation signal for one run.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
    token: CancellationToken,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
            token: CancellationToken::new(),
        }
    }

    /// Deadline that is also cancelled when `parent` is.
    pub fn with_token(budget: Duration, parent: &CancellationToken) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
            token: parent.child_token(),
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("no samples to correlate")]
    NoData,
    #[error("correlation timed out after {0:?}")]
    Timeout(Duration),
    #[error("correlation cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CorrelationError {
    pub fn kind(&self) -> &'static str {
        match self {
            CorrelationError::NoData => "no_data",
            CorrelationError::Timeout(_) => "timeout",
            CorrelationError::Cancelled => "cancelled",
            CorrelationError::Store(_) => "store",
        }
    }
}

pub struct Correlator {
    store: Arc<dyn SampleStore>,
    profile: ControllerTypeProfile,
    settings: CorrelationSettings,
}

impl Correlator {
    pub fn new(
        store: Arc<dyn SampleStore>,
        profile: ControllerTypeProfile,
        settings: CorrelationSettings,
    ) -> Self {
        Self {
            store,
            profile,
            settings,
        }
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    /// Correlate `subject`, falling back to the empty summary on any failure.
    pub async fn correlate(
        &self,
        subject: &Subject,
        window_secs: i64,
        timeout_secs: u64,
    ) -> InteractionSummary {
        let deadline = Deadline::after(Duration::from_secs(timeout_secs));
        self.correlate_within(subject, window_secs, &deadline).await
    }

    pub async fn correlate_within(
        &self,
        subject: &Subject,
        window_secs: i64,
        deadline: &Deadline,
    ) -> InteractionSummary {
        match self.try_correlate(subject, window_secs, deadline).await {
            Ok(correlation) => correlation.summary,
            Err(err) => {
                log_failure(subject, &err);
                InteractionSummary::empty()
            }
        }
    }

    pub async fn try_correlate(
        &self,
        subject: &Subject,
        window_secs: i64,
        deadline: &Deadline,
    ) -> Result<Correlation, CorrelationError> {
        tokio::select! {
            biased;
            _ = deadline.token().cancelled() => Err(CorrelationError::Cancelled),
            _ = sleep_until(deadline.at()) => Err(CorrelationError::Timeout(deadline.budget())),
            result = self.run(subject, window_secs, deadline) => result,
        }
    }

    async fn run(
        &self,
        subject: &Subject,
        window_secs: i64,
        deadline: &Deadline,
    ) -> Result<Correlation, CorrelationError> {
        if let Subject::Controller(session) = subject {
            if session.is_observer() {
                return Err(CorrelationError::NoData);
            }
        }

        let window = subject.match_window(window_secs.max(0));
        let kind = subject.kind();

        let own = self
            .store
            .samples_for(kind, subject.callsign(), window)
            .await?;
        if own.is_empty() {
            return Err(CorrelationError::NoData);
        }

        let mut counterparts = self
            .store
            .counterpart_samples(kind.counterpart(), window)
            .await?;
        let observers: HashSet<String> = self
            .store
            .controller_sessions(window)
            .await?
            .into_iter()
            .filter(|session| session.is_observer())
            .map(|session| session.callsign.to_ascii_uppercase())
            .collect();
        drop_observers(&mut counterparts, &observers);
        if counterparts.is_empty() {
            return Err(CorrelationError::NoData);
        }

        let engine = CorrelationEngine::new(
            self.profile.clone(),
            CorrelationSettings {
                window_seconds: window_secs,
                ..self.settings.clone()
            },
        );
        let mut keep_going = || !deadline.is_expired() && !deadline.token().is_cancelled();
        engine
            .correlate_with_probe(subject, &own, &counterparts, &mut keep_going)
            .map_err(|err| match err {
                EngineError::NoSubjectSamples(_) | EngineError::NoCounterpartSamples => {
                    CorrelationError::NoData
                }
                EngineError::Interrupted if deadline.token().is_cancelled() => {
                    CorrelationError::Cancelled
                }
                EngineError::Interrupted => CorrelationError::Timeout(deadline.budget()),
            })
    }
}

fn drop_observers(samples: &mut Vec<TransceiverSample>, observers: &HashSet<String>) {
    if observers.is_empty() {
        return;
    }
    samples.retain(|sample| {
        sample.kind != SubjectKind::ControllerPosition
            || !observers.contains(&sample.callsign.to_ascii_uppercase())
    });
}

fn log_failure(subject: &Subject, err: &CorrelationError) {
    match err {
        CorrelationError::NoData => tracing::debug!(
            "No correlation data for {} {}",
            subject.kind().as_str(),
            subject.callsign()
        ),
        _ => tracing::warn!(
            "Correlation for {} {} failed ({}): {}",
            subject.kind().as_str(),
            subject.callsign(),
            err.kind(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use contact_core::{ControllerSession, FlightSession, GeoPoint};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(kind: SubjectKind, callsign: &str, secs: i64, lat: f64, lon: f64) -> TransceiverSample {
        TransceiverSample::new(
            kind,
            callsign,
            120_500_000,
            t(secs),
            Some(GeoPoint::new(lat, lon).unwrap()),
        )
        .unwrap()
    }

    fn flight() -> Subject {
        Subject::Flight(FlightSession::new("QFA1", None, None, t(0), t(120)).unwrap())
    }

    fn correlator(store: Arc<MemoryStore>) -> Correlator {
        Correlator::new(
            store,
            ControllerTypeProfile::default(),
            CorrelationSettings::default(),
        )
    }

    #[test]
    fn deadline_reports_remaining_budget() {
        let deadline = Deadline::after(Duration::from_secs(0));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn child_deadline_follows_parent_cancellation() {
        let parent = CancellationToken::new();
        let deadline = Deadline::with_token(Duration::from_secs(30), &parent);
        parent.cancel();
        assert!(deadline.token().is_cancelled());

        let store = Arc::new(MemoryStore::new());
        store.insert_sample(sample(SubjectKind::Flight, "QFA1", 0, -33.9, 151.2));
        let err = correlator(store)
            .try_correlate(&flight(), 180, &deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Cancelled));
    }

    #[tokio::test]
    async fn missing_subject_samples_is_no_data() {
        let store = Arc::new(MemoryStore::new());
        let err = correlator(store)
            .try_correlate(&flight(), 180, &Deadline::after(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::NoData));
        assert_eq!(err.kind(), "no_data");
    }

    #[tokio::test]
    async fn observer_counterparts_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_sample(sample(SubjectKind::Flight, "QFA1", 0, -33.95, 151.18));
        store.insert_sample(sample(SubjectKind::ControllerPosition, "SY_OBS", 0, -33.95, 151.18));
        store.upsert_controller_session(ControllerSession::new("SY_OBS", 0, t(-600), t(600)).unwrap());

        let summary = correlator(store).correlate(&flight(), 180, 30).await;
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn observer_subject_yields_empty_summary() {
        let store = Arc::new(MemoryStore::new());
        store.insert_sample(sample(SubjectKind::ControllerPosition, "SY_OBS", 0, -33.95, 151.18));
        store.insert_sample(sample(SubjectKind::Flight, "QFA1", 0, -33.95, 151.18));
        let observer =
            Subject::Controller(ControllerSession::new("SY_OBS", 0, t(0), t(60)).unwrap());

        let err = correlator(store)
            .try_correlate(&observer, 180, &Deadline::after(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::NoData));
    }

    #[tokio::test]
    async fn matching_flight_gets_a_breakdown() {
        let store = Arc::new(MemoryStore::new());
        for secs in [0, 60, 120] {
            store.insert_sample(sample(SubjectKind::Flight, "QFA1", secs, -33.95, 151.18));
            store.insert_sample(sample(SubjectKind::ControllerPosition, "SY_TWR", secs, -33.94, 151.17));
        }

        let summary = correlator(store).correlate(&flight(), 180, 30).await;
        let entry = &summary.breakdown["SY_TWR"];
        assert_eq!(entry.proximity_threshold_nm, 15.0);
        assert!(summary.atc_contacts_detected > 0);
    }
}
