//! Disease knowledge records
//!
//! Identity is disease name + crop name, case-insensitive (see [`disease_key`]).

use chrono::{DateTime, Utc};
use grove_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::identity::{disease_key, unique_slug, SlugTable};
use super::json_column;
use super::search::Searchable;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disease {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub crop_name: String,
    pub description: String,
    pub symptoms: Vec<String>,
    pub causes: Vec<String>,
    pub treatments: Vec<String>,
    pub prevention: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Searchable for Disease {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![
            self.name.as_str(),
            self.crop_name.as_str(),
            self.description.as_str(),
        ];
        for list in [&self.symptoms, &self.causes, &self.treatments, &self.prevention] {
            fields.extend(list.iter().map(String::as_str));
        }
        fields
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewDisease {
    pub name: String,
    pub crop_name: String,
    pub description: String,
    pub symptoms: Vec<String>,
    pub causes: Vec<String>,
    pub treatments: Vec<String>,
    pub prevention: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

const DISEASE_COLUMNS: &str = "id, slug, name, crop_name, description, symptoms, causes, treatments, prevention, embedding, created_at, updated_at";

fn disease_from_row(row: &SqliteRow) -> Result<Disease> {
    let id: String = row.get("id");

    Ok(Disease {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Invalid disease id {}: {}", id, e)))?,
        slug: row.get("slug"),
        name: row.get("name"),
        crop_name: row.get("crop_name"),
        description: row.get("description"),
        symptoms: json_column(row.get("symptoms")),
        causes: json_column(row.get("causes")),
        treatments: json_column(row.get("treatments")),
        prevention: json_column(row.get("prevention")),
        embedding: row
            .get::<Option<String>, _>("embedding")
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn find_by_identity(
    conn: &mut SqliteConnection,
    name: &str,
    crop_name: &str,
) -> Result<Option<Disease>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM diseases WHERE identity_key = ?",
        DISEASE_COLUMNS
    ))
    .bind(disease_key(name, crop_name))
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(disease_from_row).transpose()
}

/// Diseases with embeddings, in insertion order
pub async fn load_embedded(conn: &mut SqliteConnection) -> Result<Vec<Disease>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM diseases WHERE embedding IS NOT NULL ORDER BY rowid",
        DISEASE_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(disease_from_row).collect()
}

pub async fn load_by_ids(conn: &mut SqliteConnection, ids: &[Uuid]) -> Result<Vec<Disease>> {
    let mut diseases = Vec::with_capacity(ids.len());
    for id in ids {
        let row = sqlx::query(&format!("SELECT {} FROM diseases WHERE id = ?", DISEASE_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(row) = row {
            diseases.push(disease_from_row(&row)?);
        }
    }
    Ok(diseases)
}

/// Insert a disease; an existing record with the same identity is returned instead
pub async fn insert_disease(conn: &mut SqliteConnection, disease: &NewDisease) -> Result<Disease> {
    let key = disease_key(&disease.name, &disease.crop_name);
    let slug = unique_slug(
        conn,
        SlugTable::Diseases,
        &format!("{} {}", disease.crop_name, disease.name),
    )
    .await?;
    let now = Utc::now();

    let embedding_json = disease
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO diseases (
            id, slug, name, crop_name, identity_key, description,
            symptoms, causes, treatments, prevention, embedding, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(identity_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&slug)
    .bind(disease.name.trim())
    .bind(disease.crop_name.trim())
    .bind(&key)
    .bind(&disease.description)
    .bind(serde_json::to_string(&disease.symptoms)?)
    .bind(serde_json::to_string(&disease.causes)?)
    .bind(serde_json::to_string(&disease.treatments)?)
    .bind(serde_json::to_string(&disease.prevention)?)
    .bind(embedding_json)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    find_by_identity(conn, &disease.name, &disease.crop_name)
        .await?
        .ok_or_else(|| Error::Internal(format!("Disease {} missing after insert", key)))
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM diseases")
        .fetch_one(&mut *conn)
        .await?)
}
