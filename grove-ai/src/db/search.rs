//! Token relevance search
//!
//! Narrows embedding candidates before similarity scoring. A record matches when any
//! searchable field contains any query token as a case-insensitive substring; matches
//! are ranked by how many distinct tokens appear across all searchable fields.

/// Records that expose free-text fields to relevance search
pub trait Searchable {
    /// Name fields, description and flattened list fields
    fn search_fields(&self) -> Vec<&str>;
}

/// Split a query into distinct lowercase word tokens, preserving first-seen order
pub fn tokenize(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for word in query.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let token = word.to_lowercase();
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// Number of tokens found in the concatenation of `fields`
pub fn relevance(tokens: &[String], fields: &[&str]) -> usize {
    // Newline separator: tokens are alphanumeric, so no match can straddle two fields
    let haystack = fields.join("\n").to_lowercase();
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
}

/// Filter `records` to those matching `query`, ranked by relevance (descending)
///
/// Ties keep the input order, so callers that pass records in a stable order get
/// reproducible rankings.
pub fn rank<T: Searchable>(records: Vec<T>, query: &str) -> Vec<(T, usize)> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(T, usize)> = records
        .into_iter()
        .filter_map(|record| {
            let score = relevance(&tokens, &record.search_fields());
            (score > 0).then_some((record, score))
        })
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}
