//! Crop knowledge records
//!
//! Natural identity is the scientific name, compared case-insensitively through
//! `scientific_name_key`. The embedding is kept for deduplication only and is never
//! serialized into API or notification payloads.

use chrono::{DateTime, Utc};
use grove_common::events::DetailStatus;
use grove_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::identity::{normalize_key, unique_slug, SlugTable};
use super::json_column;
use super::search::Searchable;

/// Crop record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Crop {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub profile: serde_json::Value,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub detail_status: DetailStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Searchable for Crop {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![
            self.name.as_str(),
            self.scientific_name.as_str(),
            self.description.as_str(),
        ];
        fields.extend(self.tags.iter().map(String::as_str));
        fields
    }
}

/// Crop about to be inserted
#[derive(Debug, Clone)]
pub struct NewCrop {
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub profile: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
}

const CROP_COLUMNS: &str = "id, slug, name, scientific_name, description, tags, profile, embedding, detail_status, created_at, updated_at";

fn crop_from_row(row: &SqliteRow) -> Result<Crop> {
    let id: String = row.get("id");
    let status: String = row.get("detail_status");

    Ok(Crop {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("Invalid crop id {}: {}", id, e)))?,
        slug: row.get("slug"),
        name: row.get("name"),
        scientific_name: row.get("scientific_name"),
        description: row.get("description"),
        tags: json_column(row.get("tags")),
        profile: json_column(row.get("profile")),
        embedding: row
            .get::<Option<String>, _>("embedding")
            .and_then(|s| serde_json::from_str(&s).ok()),
        detail_status: DetailStatus::parse(&status).unwrap_or(DetailStatus::Pending),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Exact-identity lookup by scientific name (case-insensitive)
pub async fn find_by_scientific_name(
    conn: &mut SqliteConnection,
    scientific_name: &str,
) -> Result<Option<Crop>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM crops WHERE scientific_name_key = ?",
        CROP_COLUMNS
    ))
    .bind(normalize_key(scientific_name))
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(crop_from_row).transpose()
}

pub async fn load_by_id(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Crop>> {
    let row = sqlx::query(&format!("SELECT {} FROM crops WHERE id = ?", CROP_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(crop_from_row).transpose()
}

pub async fn load_by_slug(conn: &mut SqliteConnection, slug: &str) -> Result<Option<Crop>> {
    let row = sqlx::query(&format!("SELECT {} FROM crops WHERE slug = ?", CROP_COLUMNS))
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(crop_from_row).transpose()
}

/// All crops carrying an embedding, in insertion order
pub async fn load_embedded(conn: &mut SqliteConnection) -> Result<Vec<Crop>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM crops WHERE embedding IS NOT NULL ORDER BY rowid",
        CROP_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(crop_from_row).collect()
}

/// Insert a crop, deriving a unique slug
///
/// If a crop with the same scientific name was committed in the meantime (another
/// run raced us), that record is returned instead of creating a duplicate.
pub async fn insert_crop(conn: &mut SqliteConnection, crop: &NewCrop) -> Result<Crop> {
    let key = normalize_key(&crop.scientific_name);
    let slug = unique_slug(conn, SlugTable::Crops, &crop.name).await?;
    let now = Utc::now();
    let id = Uuid::new_v4();

    let embedding_json = crop
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO crops (
            id, slug, name, scientific_name, scientific_name_key, description,
            tags, profile, embedding, detail_status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(scientific_name_key) DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(&slug)
    .bind(crop.name.trim())
    .bind(crop.scientific_name.trim())
    .bind(&key)
    .bind(&crop.description)
    .bind(serde_json::to_string(&crop.tags)?)
    .bind(crop.profile.to_string())
    .bind(embedding_json)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        tracing::debug!(scientific_name = %crop.scientific_name, "Crop already exists, reusing");
    }

    find_by_scientific_name(conn, &crop.scientific_name)
        .await?
        .ok_or_else(|| Error::Internal(format!("Crop {} missing after insert", key)))
}

/// Advance a crop's detail status out of `pending`
///
/// A terminal status is never overwritten; returns whether the row changed.
pub async fn advance_detail_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: DetailStatus,
) -> Result<bool> {
    if status == DetailStatus::Pending {
        return Ok(false);
    }

    let result = sqlx::query(
        "UPDATE crops SET detail_status = ?, updated_at = ? WHERE id = ? AND detail_status = 'pending'",
    )
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM crops")
        .fetch_one(&mut *conn)
        .await?)
}
