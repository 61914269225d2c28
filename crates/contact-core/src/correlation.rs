//! Frequency/time/distance correlation of transceiver samples.
//!
//! The same routine serves both directions. For a flight subject the
//! counterparts are controller positions; for a controller subject they are
//! aircraft. The proximity threshold always comes from the controller side
//! of the pair via [`classify`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classifier::{classify, Classification, ControllerTypeProfile};
use crate::models::{
    ContactBreakdown, InteractionSummary, MatchRecord, Subject, SubjectKind, TimeWindow,
    TransceiverSample,
};
use crate::spatial::great_circle_distance_nm;

/// Tunables for one correlation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// Padding around the session and the maximum sample time difference.
    pub window_seconds: i64,
    /// Feed cadence; each match counts for this much time on frequency.
    pub polling_interval_seconds: i64,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            window_seconds: 180,
            polling_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("no samples for subject {0} in the match window")]
    NoSubjectSamples(String),
    #[error("no counterpart samples in the match window")]
    NoCounterpartSamples,
    #[error("correlation interrupted")]
    Interrupted,
}

/// Full result of a correlation: the summary plus the accepted pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Correlation {
    pub summary: InteractionSummary,
    pub matches: Vec<MatchRecord>,
    pub subject_sample_count: usize,
    pub counterpart_groups: usize,
}

/// Correlation routine bound to a threshold profile and settings.
#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    profile: ControllerTypeProfile,
    settings: CorrelationSettings,
}

impl CorrelationEngine {
    pub fn new(profile: ControllerTypeProfile, settings: CorrelationSettings) -> Self {
        Self { profile, settings }
    }

    pub fn profile(&self) -> &ControllerTypeProfile {
        &self.profile
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    pub fn classify(&self, callsign: &str) -> Classification {
        classify(callsign, &self.profile)
    }

    /// Correlate without interruption.
    pub fn correlate(
        &self,
        subject: &Subject,
        subject_samples: &[TransceiverSample],
        counterpart_samples: &[TransceiverSample],
    ) -> Result<Correlation, CorrelationError> {
        self.correlate_with_probe(subject, subject_samples, counterpart_samples, &mut || true)
    }

    /// Correlate, polling `keep_going` before each counterpart group.
    ///
    /// Returning `false` from the probe stops the run with
    /// [`CorrelationError::Interrupted`].
    pub fn correlate_with_probe(
        &self,
        subject: &Subject,
        subject_samples: &[TransceiverSample],
        counterpart_samples: &[TransceiverSample],
        keep_going: &mut dyn FnMut() -> bool,
    ) -> Result<Correlation, CorrelationError> {
        let window_seconds = self.settings.window_seconds.max(0);
        let window = subject.match_window(window_seconds);
        let subject_kind = subject.kind();

        let mut own: Vec<&TransceiverSample> = subject_samples
            .iter()
            .filter(|s| {
                s.kind == subject_kind
                    && s.callsign.eq_ignore_ascii_case(subject.callsign())
                    && window.contains(s.timestamp)
            })
            .collect();
        if own.is_empty() {
            return Err(CorrelationError::NoSubjectSamples(subject.callsign().to_string()));
        }
        own.sort_by_key(|s| s.timestamp);

        let groups = group_counterparts(subject, counterpart_samples, &window);
        if groups.is_empty() {
            return Err(CorrelationError::NoCounterpartSamples);
        }

        // A controller subject classifies once; a flight subject classifies
        // each counterpart group.
        let subject_classification = match subject_kind {
            SubjectKind::ControllerPosition => Some(self.classify(subject.callsign())),
            SubjectKind::Flight => None,
        };

        let max_diff = Duration::seconds(window_seconds);
        let minutes_per_match = self.settings.polling_interval_seconds.max(0) as f64 / 60.0;
        let mut breakdown = BTreeMap::new();
        let mut matches = Vec::new();

        for (counterpart, group) in &groups {
            if !keep_going() {
                return Err(CorrelationError::Interrupted);
            }

            let classification =
                subject_classification.unwrap_or_else(|| self.classify(counterpart));
            let group_start = matches.len();

            for sample in &own {
                let lo = group.partition_point(|c| c.timestamp < sample.timestamp - max_diff);
                let hi = group.partition_point(|c| c.timestamp <= sample.timestamp + max_diff);
                for other in &group[lo..hi] {
                    if let Some(record) =
                        evaluate_pair(sample, other, &classification, window_seconds)
                    {
                        matches.push(record);
                    }
                }
            }

            let accepted = &matches[group_start..];
            if let Some(entry) =
                aggregate(accepted, subject_kind, &classification, minutes_per_match)
            {
                breakdown.insert(counterpart.clone(), entry);
            }
        }

        let mut summary = InteractionSummary {
            breakdown,
            controller_time_percentage: 0.0,
            atc_contacts_detected: matches.len() as u32,
        };
        summary.controller_time_percentage =
            (summary.total_minutes() / own.len() as f64 * 100.0).clamp(0.0, 100.0);

        Ok(Correlation {
            summary,
            matches,
            subject_sample_count: own.len(),
            counterpart_groups: groups.len(),
        })
    }
}

/// Group counterpart samples by upper-cased callsign, keeping only those
/// inside the match window. Filtering happens here, before any pairing.
fn group_counterparts<'a>(
    subject: &Subject,
    samples: &'a [TransceiverSample],
    window: &TimeWindow,
) -> BTreeMap<String, Vec<&'a TransceiverSample>> {
    let counterpart_kind = subject.kind().counterpart();
    let mut groups: BTreeMap<String, Vec<&TransceiverSample>> = BTreeMap::new();
    for sample in samples {
        if sample.kind != counterpart_kind || !window.contains(sample.timestamp) {
            continue;
        }
        groups
            .entry(sample.callsign.to_ascii_uppercase())
            .or_default()
            .push(sample);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|s| s.timestamp);
    }
    groups
}

/// Accept a pair iff frequencies match exactly, the time difference is
/// within the window and both positions are known and within range.
fn evaluate_pair(
    subject: &TransceiverSample,
    other: &TransceiverSample,
    classification: &Classification,
    window_seconds: i64,
) -> Option<MatchRecord> {
    if subject.frequency_hz <= 0 || subject.frequency_hz != other.frequency_hz {
        return None;
    }

    let time_diff_seconds = (subject.timestamp - other.timestamp).num_seconds().abs();
    if time_diff_seconds > window_seconds {
        return None;
    }

    let (Some(a), Some(b)) = (subject.position, other.position) else {
        return None;
    };
    let distance_nm = great_circle_distance_nm(a, b);
    if !distance_nm.is_finite() || distance_nm > classification.proximity_threshold_nm {
        return None;
    }

    let (flight, controller) = match subject.kind {
        SubjectKind::Flight => (subject, other),
        SubjectKind::ControllerPosition => (other, subject),
    };
    Some(MatchRecord {
        flight_callsign: flight.callsign.clone(),
        controller_callsign: controller.callsign.clone(),
        frequency_mhz: subject.frequency_mhz(),
        flight_timestamp: flight.timestamp,
        controller_timestamp: controller.timestamp,
        time_diff_seconds,
        distance_nm,
    })
}

fn aggregate(
    accepted: &[MatchRecord],
    subject_kind: SubjectKind,
    classification: &Classification,
    minutes_per_match: f64,
) -> Option<ContactBreakdown> {
    let subject_time = |m: &MatchRecord| -> DateTime<Utc> {
        match subject_kind {
            SubjectKind::Flight => m.flight_timestamp,
            SubjectKind::ControllerPosition => m.controller_timestamp,
        }
    };
    let first_contact = accepted.iter().map(subject_time).min()?;
    let last_contact = accepted.iter().map(subject_time).max()?;
    let contact_count = accepted.len() as u32;

    Some(ContactBreakdown {
        controller_type: classification.controller_type,
        proximity_threshold_nm: classification.proximity_threshold_nm,
        contact_count,
        minutes_on_frequency: contact_count as f64 * minutes_per_match,
        first_contact,
        last_contact,
    })
}
