//! Knowledge store for grove-ai
//!
//! SQLite persistence for crops, crop details, diseases and the per-user history
//! logs. Functions that must participate in a run's transaction take a
//! `&mut SqliteConnection` so callers can pass either a pooled connection or an
//! open `Transaction`.

pub mod crop_details;
pub mod crops;
pub mod diseases;
pub mod history;
pub mod identity;
pub mod search;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;

/// Initialize database connection pool
///
/// Creates the database file on first start and ensures all tables exist.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        // Readers never block a run's commit
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Begin a transaction that holds SQLite's write lock from the start
///
/// Runs read (slug and identity checks) before they write. A deferred transaction
/// cannot upgrade its read lock while another run writes, and fails at once instead
/// of waiting out the busy timeout.
pub async fn begin_write(pool: &SqlitePool) -> sqlx::Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

/// Create all knowledge store tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crops (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            scientific_name TEXT NOT NULL,
            scientific_name_key TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            profile TEXT NOT NULL DEFAULT '{}',
            embedding TEXT,
            detail_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crop_details (
            crop_id TEXT PRIMARY KEY REFERENCES crops(id),
            details TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS diseases (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            crop_name TEXT NOT NULL,
            identity_key TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            symptoms TEXT NOT NULL DEFAULT '[]',
            causes TEXT NOT NULL DEFAULT '[]',
            treatments TEXT NOT NULL DEFAULT '[]',
            prevention TEXT NOT NULL DEFAULT '[]',
            embedding TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crop_suggestion_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            input TEXT NOT NULL,
            image_id TEXT,
            image_url TEXT,
            crop_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS disease_detection_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            crop_name TEXT NOT NULL,
            garden_id TEXT,
            input TEXT NOT NULL,
            image_id TEXT,
            image_url TEXT,
            healthy INTEGER NOT NULL DEFAULT 0,
            disease_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crop_suggestion_history_user ON crop_suggestion_history(user_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_disease_detection_history_user ON disease_detection_history(user_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (crops, crop_details, diseases, crop_suggestion_history, disease_detection_history)"
    );

    Ok(())
}

/// Decode a JSON text column, treating NULL/invalid as the type's default
pub(crate) fn json_column<T>(raw: Option<String>) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // Single connection: every pooled handle must see the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_tables(&pool).await.expect("Failed to create tables");
    pool
}
