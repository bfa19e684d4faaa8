//! Per-user history logs
//!
//! One row per completed run, appended inside the run's transaction. Rows are never
//! updated here; `deleted_at` is set by an external soft delete and such rows are
//! hidden from listings.

use chrono::{DateTime, Utc};
use grove_common::{Error, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::json_column;

/// Externally hosted copy of the request image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostedImage {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropSuggestionHistory {
    pub id: Uuid,
    pub user_id: String,
    pub mode: String,
    pub input: serde_json::Value,
    pub image: Option<HostedImage>,
    pub crop_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseDetectionHistory {
    pub id: Uuid,
    pub user_id: String,
    pub mode: String,
    pub crop_name: String,
    pub garden_id: Option<String>,
    pub input: serde_json::Value,
    pub image: Option<HostedImage>,
    pub healthy: bool,
    pub disease_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Crop-suggestion history entry about to be appended
#[derive(Debug, Clone)]
pub struct NewSuggestionEntry<'a> {
    pub user_id: &'a str,
    pub mode: &'a str,
    pub input: &'a serde_json::Value,
    pub image: Option<&'a HostedImage>,
    pub crop_ids: &'a [Uuid],
}

/// Disease-detection history entry about to be appended
#[derive(Debug, Clone)]
pub struct NewDetectionEntry<'a> {
    pub user_id: &'a str,
    pub mode: &'a str,
    pub crop_name: &'a str,
    pub garden_id: Option<&'a str>,
    pub input: &'a serde_json::Value,
    pub image: Option<&'a HostedImage>,
    pub healthy: bool,
    pub disease_ids: &'a [Uuid],
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Invalid history id {}: {}", raw, e)))
}

fn image_from_row(row: &SqliteRow) -> Option<HostedImage> {
    match (
        row.get::<Option<String>, _>("image_id"),
        row.get::<Option<String>, _>("image_url"),
    ) {
        (Some(id), Some(url)) => Some(HostedImage { id, url }),
        _ => None,
    }
}

pub async fn append_suggestion(
    conn: &mut SqliteConnection,
    entry: NewSuggestionEntry<'_>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO crop_suggestion_history (id, user_id, mode, input, image_id, image_url, crop_ids, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(entry.user_id)
    .bind(entry.mode)
    .bind(entry.input.to_string())
    .bind(entry.image.map(|i| i.id.as_str()))
    .bind(entry.image.map(|i| i.url.as_str()))
    .bind(serde_json::to_string(entry.crop_ids)?)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn append_detection(
    conn: &mut SqliteConnection,
    entry: NewDetectionEntry<'_>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO disease_detection_history (
            id, user_id, mode, crop_name, garden_id, input, image_id, image_url,
            healthy, disease_ids, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(entry.user_id)
    .bind(entry.mode)
    .bind(entry.crop_name)
    .bind(entry.garden_id)
    .bind(entry.input.to_string())
    .bind(entry.image.map(|i| i.id.as_str()))
    .bind(entry.image.map(|i| i.url.as_str()))
    .bind(entry.healthy)
    .bind(serde_json::to_string(entry.disease_ids)?)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Visible crop-suggestion history for a user, newest first
pub async fn list_suggestions(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<CropSuggestionHistory>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, mode, input, image_id, image_url, crop_ids, created_at
        FROM crop_suggestion_history
        WHERE user_id = ? AND deleted_at IS NULL
        ORDER BY created_at DESC, rowid DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CropSuggestionHistory {
                id: parse_id(&row.get::<String, _>("id"))?,
                user_id: row.get("user_id"),
                mode: row.get("mode"),
                input: json_column(row.get("input")),
                image: image_from_row(row),
                crop_ids: json_column(row.get("crop_ids")),
                created_at: row.get("created_at"),
            })
        })
        .collect()
}

/// Visible disease-detection history for a user, newest first
pub async fn list_detections(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<DiseaseDetectionHistory>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, mode, crop_name, garden_id, input, image_id, image_url,
               healthy, disease_ids, created_at
        FROM disease_detection_history
        WHERE user_id = ? AND deleted_at IS NULL
        ORDER BY created_at DESC, rowid DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(DiseaseDetectionHistory {
                id: parse_id(&row.get::<String, _>("id"))?,
                user_id: row.get("user_id"),
                mode: row.get("mode"),
                crop_name: row.get("crop_name"),
                garden_id: row.get("garden_id"),
                input: json_column(row.get("input")),
                image: image_from_row(row),
                healthy: row.get("healthy"),
                disease_ids: json_column(row.get("disease_ids")),
                created_at: row.get("created_at"),
            })
        })
        .collect()
}

pub async fn count_suggestions(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM crop_suggestion_history")
        .fetch_one(&mut *conn)
        .await?)
}

pub async fn count_detections(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM disease_detection_history")
        .fetch_one(&mut *conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_suggestions_is_per_user_and_hides_deleted() {
        let pool = crate::db::test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let input = json!({ "season": "summer" });
        let crop_id = Uuid::new_v4();

        let first = append_suggestion(
            &mut conn,
            NewSuggestionEntry {
                user_id: "alice",
                mode: "manual",
                input: &input,
                image: None,
                crop_ids: &[crop_id],
            },
        )
        .await
        .unwrap();
        let image = HostedImage {
            id: "grove/abc".to_string(),
            url: "https://img.example/abc.jpg".to_string(),
        };
        let second = append_suggestion(
            &mut conn,
            NewSuggestionEntry {
                user_id: "alice",
                mode: "auto",
                input: &input,
                image: Some(&image),
                crop_ids: &[],
            },
        )
        .await
        .unwrap();
        append_suggestion(
            &mut conn,
            NewSuggestionEntry {
                user_id: "bob",
                mode: "manual",
                input: &input,
                image: None,
                crop_ids: &[],
            },
        )
        .await
        .unwrap();

        let listed = list_suggestions(&mut conn, "alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[0].image, Some(image));
        assert_eq!(listed[1].crop_ids, vec![crop_id]);

        sqlx::query("UPDATE crop_suggestion_history SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(first.to_string())
            .execute(&mut *conn)
            .await
            .unwrap();

        let listed = list_suggestions(&mut conn, "alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(count_suggestions(&mut conn).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_detection_roundtrip_healthy_without_references() {
        let pool = crate::db::test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let input = json!({ "notes": "looks fine" });

        append_detection(
            &mut conn,
            NewDetectionEntry {
                user_id: "alice",
                mode: "garden",
                crop_name: "Tomato",
                garden_id: Some("garden-7"),
                input: &input,
                image: None,
                healthy: true,
                disease_ids: &[],
            },
        )
        .await
        .unwrap();

        let listed = list_detections(&mut conn, "alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].healthy);
        assert!(listed[0].disease_ids.is_empty());
        assert_eq!(listed[0].garden_id.as_deref(), Some("garden-7"));
    }
}
