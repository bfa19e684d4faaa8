//! Crop detail documents (1:1 with crops, written by the enrichment phase)

use chrono::{DateTime, Utc};
use grove_common::Result;
use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropDetails {
    pub crop_id: Uuid,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert or replace the detail document for a crop
pub async fn upsert(
    conn: &mut SqliteConnection,
    crop_id: Uuid,
    details: &serde_json::Value,
) -> Result<()> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO crop_details (crop_id, details, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(crop_id) DO UPDATE SET
            details = excluded.details,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(crop_id.to_string())
    .bind(details.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load(conn: &mut SqliteConnection, crop_id: Uuid) -> Result<Option<CropDetails>> {
    let row = sqlx::query(
        "SELECT details, created_at, updated_at FROM crop_details WHERE crop_id = ?",
    )
    .bind(crop_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| CropDetails {
        crop_id,
        details: super::json_column(row.get("details")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}
