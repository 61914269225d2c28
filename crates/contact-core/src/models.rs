//! Core data models for transceiver correlation and sector occupancy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classifier::ControllerType;

/// Errors raised when building a record from raw feed values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("callsign must not be empty")]
    EmptyCallsign,
    #[error("invalid position ({lat}, {lon})")]
    InvalidPosition { lat: f64, lon: f64 },
    #[error("window end {end} precedes start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Which side of the radio link a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Flight,
    ControllerPosition,
}

impl SubjectKind {
    /// The kind on the other end of the link.
    pub fn counterpart(self) -> Self {
        match self {
            SubjectKind::Flight => SubjectKind::ControllerPosition,
            SubjectKind::ControllerPosition => SubjectKind::Flight,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Flight => "flight",
            SubjectKind::ControllerPosition => "controller_position",
        }
    }
}

/// A validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, SampleError> {
        if !lat.is_finite()
            || !lon.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lon)
        {
            return Err(SampleError::InvalidPosition { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Build a point from optional raw coordinates, discarding anything malformed.
    pub fn from_raw(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Self::new(lat, lon).ok(),
            _ => None,
        }
    }
}

/// Trimmed and upper-cased; feeds are not consistent about case.
fn require_callsign(callsign: impl Into<String>) -> Result<String, SampleError> {
    let callsign = callsign.into().trim().to_ascii_uppercase();
    if callsign.is_empty() {
        return Err(SampleError::EmptyCallsign);
    }
    Ok(callsign)
}

/// One periodic observation of a radio's tuned frequency and position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransceiverSample {
    pub kind: SubjectKind,
    pub callsign: String,
    pub frequency_hz: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

impl TransceiverSample {
    pub fn new(
        kind: SubjectKind,
        callsign: impl Into<String>,
        frequency_hz: i64,
        timestamp: DateTime<Utc>,
        position: Option<GeoPoint>,
    ) -> Result<Self, SampleError> {
        Ok(Self {
            kind,
            callsign: require_callsign(callsign)?,
            frequency_hz,
            timestamp,
            position,
        })
    }

    /// Build a sample from raw feed coordinates.
    ///
    /// Missing or malformed coordinates leave `position` unset; the sample is
    /// kept but can never take part in a distance match.
    pub fn with_raw_position(
        kind: SubjectKind,
        callsign: impl Into<String>,
        frequency_hz: i64,
        timestamp: DateTime<Utc>,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<Self, SampleError> {
        Self::new(
            kind,
            callsign,
            frequency_hz,
            timestamp,
            GeoPoint::from_raw(lat, lon),
        )
    }

    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz as f64 / 1_000_000.0
    }
}

/// A controller's logon session. Facility level 0 is an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSession {
    pub callsign: String,
    pub facility_level: u8,
    pub logon_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
}

impl ControllerSession {
    pub fn new(
        callsign: impl Into<String>,
        facility_level: u8,
        logon_time: DateTime<Utc>,
        last_seen_time: DateTime<Utc>,
    ) -> Result<Self, SampleError> {
        if last_seen_time < logon_time {
            return Err(SampleError::InvalidWindow {
                start: logon_time,
                end: last_seen_time,
            });
        }
        Ok(Self {
            callsign: require_callsign(callsign)?,
            facility_level,
            logon_time,
            last_seen_time,
        })
    }

    pub fn is_observer(&self) -> bool {
        self.facility_level == 0
    }
}

/// One continuous occupancy of the network by one aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSession {
    pub callsign: String,
    #[serde(default)]
    pub departure: Option<String>,
    #[serde(default)]
    pub arrival: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
}

impl FlightSession {
    pub fn new(
        callsign: impl Into<String>,
        departure: Option<String>,
        arrival: Option<String>,
        logon_time: DateTime<Utc>,
        last_seen_time: DateTime<Utc>,
    ) -> Result<Self, SampleError> {
        if last_seen_time < logon_time {
            return Err(SampleError::InvalidWindow {
                start: logon_time,
                end: last_seen_time,
            });
        }
        Ok(Self {
            callsign: require_callsign(callsign)?,
            departure,
            arrival,
            logon_time,
            last_seen_time,
        })
    }
}

/// The session a correlation is computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Flight(FlightSession),
    Controller(ControllerSession),
}

impl Subject {
    pub fn callsign(&self) -> &str {
        match self {
            Subject::Flight(session) => &session.callsign,
            Subject::Controller(session) => &session.callsign,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::Flight(_) => SubjectKind::Flight,
            Subject::Controller(_) => SubjectKind::ControllerPosition,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        match self {
            Subject::Flight(session) => session.logon_time,
            Subject::Controller(session) => session.logon_time,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        match self {
            Subject::Flight(session) => session.last_seen_time,
            Subject::Controller(session) => session.last_seen_time,
        }
    }

    /// Session span padded by `window_seconds` on both sides.
    pub fn match_window(&self, window_seconds: i64) -> TimeWindow {
        TimeWindow::padded(self.start(), self.end(), window_seconds)
    }
}

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SampleError> {
        if end < start {
            return Err(SampleError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// `[start - pad, end + pad]`; a reversed input span is normalised first.
    pub fn padded(start: DateTime<Utc>, end: DateTime<Utc>, pad_seconds: i64) -> Self {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let pad = Duration::seconds(pad_seconds.max(0));
        Self {
            start: start - pad,
            end: end + pad,
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// A single accepted pairing of a flight sample with a controller sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub flight_callsign: String,
    pub controller_callsign: String,
    pub frequency_mhz: f64,
    pub flight_timestamp: DateTime<Utc>,
    pub controller_timestamp: DateTime<Utc>,
    pub time_diff_seconds: i64,
    pub distance_nm: f64,
}

/// Aggregated contact with one counterpart callsign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactBreakdown {
    /// Type of the controller position in the pairing.
    pub controller_type: ControllerType,
    pub proximity_threshold_nm: f64,
    pub contact_count: u32,
    /// `contact_count * polling_interval / 60`. An estimate from discrete
    /// samples, not a measured duration.
    pub minutes_on_frequency: f64,
    pub first_contact: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
}

/// Per-subject correlation result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InteractionSummary {
    /// Keyed by counterpart callsign: controllers for a flight subject,
    /// aircraft for a controller subject.
    pub breakdown: BTreeMap<String, ContactBreakdown>,
    /// Always within `[0, 100]`.
    pub controller_time_percentage: f64,
    pub atc_contacts_detected: u32,
}

impl InteractionSummary {
    /// The canonical empty result: no contacts, zero percent.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.breakdown.is_empty() && self.atc_contacts_detected == 0
    }

    pub fn total_minutes(&self) -> f64 {
        self.breakdown
            .values()
            .map(|entry| entry.minutes_on_frequency)
            .sum()
    }
}

/// One per-cycle position report for a flight, fed to the sector tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub callsign: String,
    /// `None` when the feed delivered missing or malformed coordinates.
    pub position: Option<GeoPoint>,
    pub altitude_ft: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(
        callsign: impl Into<String>,
        lat: f64,
        lon: f64,
        altitude_ft: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, SampleError> {
        Ok(Self {
            callsign: require_callsign(callsign)?,
            position: GeoPoint::new(lat, lon).ok(),
            altitude_ft,
            timestamp,
        })
    }

    pub fn is_usable(&self) -> bool {
        self.position.is_some() && self.altitude_ft.is_finite()
    }
}

/// A flight's stay inside one sector. Open while `exit_timestamp` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorOccupancyRecord {
    pub callsign: String,
    pub sector_name: String,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_altitude_ft: f64,
    #[serde(default)]
    pub exit_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_altitude_ft: Option<f64>,
}

impl SectorOccupancyRecord {
    pub fn open(
        callsign: impl Into<String>,
        sector_name: impl Into<String>,
        entry_timestamp: DateTime<Utc>,
        entry_altitude_ft: f64,
    ) -> Self {
        Self {
            callsign: callsign.into(),
            sector_name: sector_name.into(),
            entry_timestamp,
            entry_altitude_ft,
            exit_timestamp: None,
            exit_altitude_ft: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit_timestamp.is_none()
    }

    /// Seconds between entry and exit, `None` while the record is open.
    pub fn duration_seconds(&self) -> Option<i64> {
        self.exit_timestamp
            .map(|exit| (exit - self.entry_timestamp).num_seconds())
    }

    pub(crate) fn close(&mut self, timestamp: DateTime<Utc>, altitude_ft: f64) {
        self.exit_timestamp = Some(timestamp);
        self.exit_altitude_ft = Some(altitude_ft);
    }
}
