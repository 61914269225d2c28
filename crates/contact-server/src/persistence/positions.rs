//! Live flight position persistence.

use contact_core::{GeoPoint, PositionSample};
use sqlx::SqlitePool;

use super::db::{format_ts, parse_ts};
use crate::store::{Snapshot, StoreError};

/// Write every position of one polling snapshot in a single transaction.
pub async fn insert_snapshot(pool: &SqlitePool, snapshot: &Snapshot) -> Result<(), StoreError> {
    let observed_at = format_ts(snapshot.taken_at);
    let mut tx = pool.begin().await?;
    for flight in &snapshot.flights {
        sqlx::query(
            r#"
            INSERT INTO flight_positions (callsign, lat, lon, altitude_ft, observed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&flight.callsign)
        .bind(flight.position.map(|p| p.lat))
        .bind(flight.position.map(|p| p.lon))
        .bind(flight.altitude_ft.is_finite().then_some(flight.altitude_ft))
        .bind(&observed_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// The snapshot with the newest `observed_at`, if any.
pub async fn load_latest_snapshot(pool: &SqlitePool) -> Result<Option<Snapshot>, StoreError> {
    let rows = sqlx::query_as::<_, PositionRow>(
        r#"
        SELECT callsign, lat, lon, altitude_ft, observed_at
        FROM flight_positions
        WHERE observed_at = (SELECT MAX(observed_at) FROM flight_positions)
        ORDER BY callsign
        "#,
    )
    .fetch_all(pool)
    .await?;

    let Some(first) = rows.first() else {
        return Ok(None);
    };
    let taken_at = parse_ts(&first.observed_at)?;
    let flights = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<PositionSample>, _>>()?;

    Ok(Some(Snapshot { taken_at, flights }))
}

/// Newest row for `callsign` with coordinates and an altitude.
pub async fn load_last_position(
    pool: &SqlitePool,
    callsign: &str,
) -> Result<Option<PositionSample>, StoreError> {
    let row = sqlx::query_as::<_, PositionRow>(
        r#"
        SELECT callsign, lat, lon, altitude_ft, observed_at
        FROM flight_positions
        WHERE callsign = ?1
          AND lat IS NOT NULL AND lon IS NOT NULL AND altitude_ft IS NOT NULL
        ORDER BY observed_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(callsign.trim().to_ascii_uppercase())
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    callsign: String,
    lat: Option<f64>,
    lon: Option<f64>,
    /// NULL when the feed reported a non-finite altitude.
    altitude_ft: Option<f64>,
    observed_at: String,
}

impl TryFrom<PositionRow> for PositionSample {
    type Error = StoreError;

    fn try_from(row: PositionRow) -> Result<Self, StoreError> {
        Ok(PositionSample {
            callsign: row.callsign,
            position: GeoPoint::from_raw(row.lat, row.lon),
            altitude_ft: row.altitude_ft.unwrap_or(f64::NAN),
            timestamp: parse_ts(&row.observed_at)?,
        })
    }
}
