//! Controller and flight session persistence.

use contact_core::{ControllerSession, FlightSession, TimeWindow};
use sqlx::SqlitePool;

use super::db::{format_ts, parse_ts};
use crate::store::StoreError;

pub async fn upsert_controller_session(
    pool: &SqlitePool,
    session: &ControllerSession,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO controller_sessions (callsign, facility_level, logon_time, last_seen_time)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(callsign, logon_time) DO UPDATE SET
            facility_level = ?2,
            last_seen_time = ?4
        "#,
    )
    .bind(&session.callsign)
    .bind(i64::from(session.facility_level))
    .bind(format_ts(session.logon_time))
    .bind(format_ts(session.last_seen_time))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn upsert_flight_session(
    pool: &SqlitePool,
    session: &FlightSession,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO flight_sessions (callsign, departure, arrival, logon_time, last_seen_time)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(callsign, logon_time) DO UPDATE SET
            departure = COALESCE(?2, departure),
            arrival = COALESCE(?3, arrival),
            last_seen_time = ?5
        "#,
    )
    .bind(&session.callsign)
    .bind(&session.departure)
    .bind(&session.arrival)
    .bind(format_ts(session.logon_time))
    .bind(format_ts(session.last_seen_time))
    .execute(pool)
    .await?;

    Ok(())
}

/// Controller sessions overlapping `window`.
pub async fn load_controller_sessions(
    pool: &SqlitePool,
    window: TimeWindow,
) -> Result<Vec<ControllerSession>, StoreError> {
    let rows = sqlx::query_as::<_, ControllerSessionRow>(
        r#"
        SELECT callsign, facility_level, logon_time, last_seen_time
        FROM controller_sessions
        WHERE logon_time <= ?1 AND last_seen_time >= ?2
        "#,
    )
    .bind(format_ts(window.end))
    .bind(format_ts(window.start))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn load_latest_flight_session(
    pool: &SqlitePool,
    callsign: &str,
) -> Result<Option<FlightSession>, StoreError> {
    let row = sqlx::query_as::<_, FlightSessionRow>(
        r#"
        SELECT callsign, departure, arrival, logon_time, last_seen_time
        FROM flight_sessions
        WHERE callsign = ?1
        ORDER BY logon_time DESC
        LIMIT 1
        "#,
    )
    .bind(callsign.trim().to_ascii_uppercase())
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

#[derive(sqlx::FromRow)]
struct ControllerSessionRow {
    callsign: String,
    facility_level: i64,
    logon_time: String,
    last_seen_time: String,
}

impl TryFrom<ControllerSessionRow> for ControllerSession {
    type Error = StoreError;

    fn try_from(row: ControllerSessionRow) -> Result<Self, StoreError> {
        let facility_level = u8::try_from(row.facility_level).map_err(|_| {
            StoreError::Decode(format!("facility level {} out of range", row.facility_level))
        })?;
        ControllerSession::new(
            row.callsign,
            facility_level,
            parse_ts(&row.logon_time)?,
            parse_ts(&row.last_seen_time)?,
        )
        .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[derive(sqlx::FromRow)]
struct FlightSessionRow {
    callsign: String,
    departure: Option<String>,
    arrival: Option<String>,
    logon_time: String,
    last_seen_time: String,
}

impl TryFrom<FlightSessionRow> for FlightSession {
    type Error = StoreError;

    fn try_from(row: FlightSessionRow) -> Result<Self, StoreError> {
        FlightSession::new(
            row.callsign,
            row.departure,
            row.arrival,
            parse_ts(&row.logon_time)?,
            parse_ts(&row.last_seen_time)?,
        )
        .map_err(|e| StoreError::Decode(e.to_string()))
    }
}
