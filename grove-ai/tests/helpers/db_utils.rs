//! Database Test Utilities

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// In-memory database with all tables created
///
/// One connection only: every pooled handle must see the same in-memory database.
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    grove_ai::db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");
    pool
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("count query")
}

/// `detail_status` of the crop with the given slug
pub async fn crop_status(pool: &SqlitePool, slug: &str) -> String {
    sqlx::query_scalar("SELECT detail_status FROM crops WHERE slug = ?")
        .bind(slug)
        .fetch_one(pool)
        .await
        .expect("crop exists")
}
