//! Transceiver sample persistence.

use contact_core::{GeoPoint, SubjectKind, TimeWindow, TransceiverSample};
use sqlx::SqlitePool;

use super::db::{format_ts, parse_ts};
use crate::store::StoreError;

/// Insert a batch inside one transaction.
pub async fn insert_samples(
    pool: &SqlitePool,
    samples: &[TransceiverSample],
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    for sample in samples {
        sqlx::query(
            r#"
            INSERT INTO transceiver_samples (kind, callsign, frequency_hz, sampled_at, lat, lon)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(sample.kind.as_str())
        .bind(&sample.callsign)
        .bind(sample.frequency_hz)
        .bind(format_ts(sample.timestamp))
        .bind(sample.position.map(|p| p.lat))
        .bind(sample.position.map(|p| p.lon))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn load_samples_for(
    pool: &SqlitePool,
    kind: SubjectKind,
    callsign: &str,
    window: TimeWindow,
) -> Result<Vec<TransceiverSample>, StoreError> {
    let rows = sqlx::query_as::<_, SampleRow>(
        r#"
        SELECT kind, callsign, frequency_hz, sampled_at, lat, lon
        FROM transceiver_samples
        WHERE kind = ?1 AND callsign = ?2 AND sampled_at >= ?3 AND sampled_at <= ?4
        ORDER BY sampled_at
        "#,
    )
    .bind(kind.as_str())
    .bind(callsign.trim().to_ascii_uppercase())
    .bind(format_ts(window.start))
    .bind(format_ts(window.end))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn load_samples_in_window(
    pool: &SqlitePool,
    kind: SubjectKind,
    window: TimeWindow,
) -> Result<Vec<TransceiverSample>, StoreError> {
    let rows = sqlx::query_as::<_, SampleRow>(
        r#"
        SELECT kind, callsign, frequency_hz, sampled_at, lat, lon
        FROM transceiver_samples
        WHERE kind = ?1 AND sampled_at >= ?2 AND sampled_at <= ?3
        ORDER BY callsign, sampled_at
        "#,
    )
    .bind(kind.as_str())
    .bind(format_ts(window.start))
    .bind(format_ts(window.end))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    kind: String,
    callsign: String,
    frequency_hz: i64,
    sampled_at: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

fn parse_kind(raw: &str) -> Result<SubjectKind, StoreError> {
    match raw {
        "flight" => Ok(SubjectKind::Flight),
        "controller_position" => Ok(SubjectKind::ControllerPosition),
        other => Err(StoreError::Decode(format!("unknown sample kind {other:?}"))),
    }
}

impl TryFrom<SampleRow> for TransceiverSample {
    type Error = StoreError;

    fn try_from(row: SampleRow) -> Result<Self, StoreError> {
        Ok(TransceiverSample {
            kind: parse_kind(&row.kind)?,
            callsign: row.callsign,
            frequency_hz: row.frequency_hz,
            timestamp: parse_ts(&row.sampled_at)?,
            position: GeoPoint::from_raw(row.lat, row.lon),
        })
    }
}
