//! Bounded-concurrency correlation over many subjects.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use contact_core::{InteractionSummary, Subject, SubjectKind};

use crate::config::Config;
use crate::correlator::{CorrelationError, Correlator, Deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub window_secs: i64,
    pub timeout_secs: u64,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.batch_concurrency,
            window_secs: config.window_secs,
            timeout_secs: config.timeout_secs,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            window_secs: 180,
            timeout_secs: 30,
        }
    }
}

/// Result for one subject. `failure` names the error kind when the summary
/// is the empty fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub callsign: String,
    pub kind: SubjectKind,
    pub summary: InteractionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<&'static str>,
}

impl BatchOutcome {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Correlate every subject, at most `settings.concurrency` at a time.
///
/// A failed or timed-out subject gets the empty summary and never stops the
/// rest of the batch. Outcomes are ordered by callsign.
pub async fn run_batch(
    correlator: &Correlator,
    subjects: Vec<Subject>,
    settings: BatchSettings,
    shutdown: &CancellationToken,
) -> Vec<BatchOutcome> {
    let budget = Duration::from_secs(settings.timeout_secs);
    let mut outcomes: Vec<BatchOutcome> = stream::iter(subjects)
        .map(|subject| async move {
            let deadline = Deadline::with_token(budget, shutdown);
            let result = correlator
                .try_correlate(&subject, settings.window_secs, &deadline)
                .await;
            outcome_for(&subject, result.map(|c| c.summary))
        })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by(|a, b| {
        a.callsign
            .cmp(&b.callsign)
            .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
    });
    outcomes
}

fn outcome_for(
    subject: &Subject,
    result: Result<InteractionSummary, CorrelationError>,
) -> BatchOutcome {
    let (summary, failure) = match result {
        Ok(summary) => (summary, None),
        Err(err) => {
            match &err {
                CorrelationError::NoData => tracing::debug!(
                    "Batch: no data for {} {}",
                    subject.kind().as_str(),
                    subject.callsign()
                ),
                _ => tracing::warn!(
                    "Batch: {} {} skipped ({}): {}",
                    subject.kind().as_str(),
                    subject.callsign(),
                    err.kind(),
                    err
                ),
            }
            (InteractionSummary::empty(), Some(err.kind()))
        }
    };
    BatchOutcome {
        callsign: subject.callsign().to_string(),
        kind: subject.kind(),
        summary,
        failure,
    }
}
