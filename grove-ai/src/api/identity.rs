//! Caller identity
//!
//! Authentication happens upstream; the gateway forwards the authenticated user id
//! in `x-user-id`. The id becomes part of room names, so it must not contain the
//! room separator.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

const MAX_USER_ID_LEN: usize = 128;

/// Authenticated caller, taken from the `x-user-id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    /// Validate a raw id from a header or query parameter
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(ApiError::Unauthorized("Missing user identity".to_string()));
        }
        if id.len() > MAX_USER_ID_LEN || id.contains(':') || id.chars().any(char::is_whitespace) {
            return Err(ApiError::Unauthorized("Malformed user identity".to_string()));
        }
        Ok(UserId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;
        UserId::parse(raw)
    }
}
