//! Sector occupancy persistence.

use contact_core::SectorOccupancyRecord;
use sqlx::SqlitePool;

use super::db::{format_ts, parse_ts};
use crate::store::StoreError;

/// Insert a record unless a row with the same callsign, sector and entry
/// time is already stored.
pub async fn insert_occupancy(
    pool: &SqlitePool,
    record: &SectorOccupancyRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sector_occupancy
            (callsign, sector_name, entry_timestamp, entry_altitude_ft, exit_timestamp, exit_altitude_ft)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6
        WHERE NOT EXISTS (
            SELECT 1 FROM sector_occupancy
            WHERE callsign = ?1 AND sector_name = ?2 AND entry_timestamp = ?3
        )
        "#,
    )
    .bind(&record.callsign)
    .bind(&record.sector_name)
    .bind(format_ts(record.entry_timestamp))
    .bind(record.entry_altitude_ft)
    .bind(record.exit_timestamp.map(format_ts))
    .bind(record.exit_altitude_ft)
    .execute(pool)
    .await?;

    Ok(())
}

/// Stamp the exit on the matching row, inserting the closed record when no
/// row exists. Re-applying the same close leaves one row.
pub async fn close_occupancy(
    pool: &SqlitePool,
    record: &SectorOccupancyRecord,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE sector_occupancy
        SET exit_timestamp = ?1, exit_altitude_ft = ?2
        WHERE callsign = ?3 AND sector_name = ?4 AND entry_timestamp = ?5
        "#,
    )
    .bind(record.exit_timestamp.map(format_ts))
    .bind(record.exit_altitude_ft)
    .bind(&record.callsign)
    .bind(&record.sector_name)
    .bind(format_ts(record.entry_timestamp))
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        sqlx::query(
            r#"
            INSERT INTO sector_occupancy
                (callsign, sector_name, entry_timestamp, entry_altitude_ft, exit_timestamp, exit_altitude_ft)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.callsign)
        .bind(&record.sector_name)
        .bind(format_ts(record.entry_timestamp))
        .bind(record.entry_altitude_ft)
        .bind(record.exit_timestamp.map(format_ts))
        .bind(record.exit_altitude_ft)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn load_open_occupancy(pool: &SqlitePool) -> Result<Vec<SectorOccupancyRecord>, StoreError> {
    let rows = sqlx::query_as::<_, OccupancyRow>(
        r#"
        SELECT callsign, sector_name, entry_timestamp, entry_altitude_ft, exit_timestamp, exit_altitude_ft
        FROM sector_occupancy
        WHERE exit_timestamp IS NULL
        ORDER BY callsign
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn load_occupancy_for(
    pool: &SqlitePool,
    callsign: &str,
) -> Result<Vec<SectorOccupancyRecord>, StoreError> {
    let rows = sqlx::query_as::<_, OccupancyRow>(
        r#"
        SELECT callsign, sector_name, entry_timestamp, entry_altitude_ft, exit_timestamp, exit_altitude_ft
        FROM sector_occupancy
        WHERE callsign = ?1
        ORDER BY entry_timestamp
        "#,
    )
    .bind(callsign)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

#[derive(sqlx::FromRow)]
struct OccupancyRow {
    callsign: String,
    sector_name: String,
    entry_timestamp: String,
    entry_altitude_ft: f64,
    exit_timestamp: Option<String>,
    exit_altitude_ft: Option<f64>,
}

impl TryFrom<OccupancyRow> for SectorOccupancyRecord {
    type Error = StoreError;

    fn try_from(row: OccupancyRow) -> Result<Self, StoreError> {
        let exit_timestamp = row.exit_timestamp.as_deref().map(parse_ts).transpose()?;
        Ok(SectorOccupancyRecord {
            callsign: row.callsign,
            sector_name: row.sector_name,
            entry_timestamp: parse_ts(&row.entry_timestamp)?,
            entry_altitude_ft: row.entry_altitude_ft,
            exit_timestamp,
            exit_altitude_ft: row.exit_altitude_ft,
        })
    }
}
