//! Natural identity keys and slug derivation
//!
//! Identity keys are what exact-match lookups compare; slugs are the public
//! handle of a record and must be unique per table.

use grove_common::Result;
use sqlx::SqliteConnection;

/// Tables that carry a unique `slug` column
#[derive(Debug, Clone, Copy)]
pub enum SlugTable {
    Crops,
    Diseases,
}

impl SlugTable {
    fn exists_query(&self) -> &'static str {
        match self {
            SlugTable::Crops => "SELECT EXISTS(SELECT 1 FROM crops WHERE slug = ?)",
            SlugTable::Diseases => "SELECT EXISTS(SELECT 1 FROM diseases WHERE slug = ?)",
        }
    }
}

/// Normalized natural key: trimmed, inner whitespace collapsed, lowercase
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identity key for a disease: disease name + crop name
pub fn disease_key(disease_name: &str, crop_name: &str) -> String {
    format!("{}|{}", normalize_key(disease_name), normalize_key(crop_name))
}

/// URL-safe slug: lowercase ASCII alphanumerics separated by single dashes
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "record".to_string()
    } else {
        slug
    }
}

/// Derive a slug unique within `table`
///
/// Returns the base slug when free, otherwise `base-1`, `base-2`, ... until an unused
/// value is found. Must run on the same connection/transaction that inserts the record.
pub async fn unique_slug(conn: &mut SqliteConnection, table: SlugTable, name: &str) -> Result<String> {
    let base = slugify(name);
    let mut candidate = base.clone();
    let mut suffix = 0u32;

    loop {
        let taken: i64 = sqlx::query_scalar(table.exists_query())
            .bind(&candidate)
            .fetch_one(&mut *conn)
            .await?;

        if taken == 0 {
            return Ok(candidate);
        }

        suffix += 1;
        candidate = format!("{}-{}", base, suffix);
    }
}
