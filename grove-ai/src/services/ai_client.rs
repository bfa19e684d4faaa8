//! Generation provider adapter
//!
//! Text, vision and embedding calls against a Gemini-compatible REST API. The adapter
//! returns raw model text and never retries; retry policy belongs to the caller.

use async_trait::async_trait;
use base64::Engine;
use governor::{Quota, RateLimiter};
use grove_common::config::AiConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// Generation provider errors
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation provider is not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Provider returned status {0}: {1}")]
    Status(u16, String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider returned empty output")]
    Empty,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Network(err.to_string())
        }
    }
}

/// Image passed inline to a vision prompt
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// External text/vision/embedding generation
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError>;

    async fn generate_text_from_image(
        &self,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<String, GenerationError>;

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, GenerationError>;
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Gemini REST client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
    rate_limiter: DirectRateLimiter,
}

impl GeminiClient {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::NotConfigured("API key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    async fn post(&self, model: &str, method: &str, body: &Value) -> Result<Value, GenerationError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/models/{}:{}", self.base_url, model, method);
        tracing::debug!(model, method, "Calling generation provider");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Quota(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status(status.as_u16(), text));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))
    }

    async fn generate_content(&self, parts: Value) -> Result<String, GenerationError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });

        let response = self.post(&self.model, "generateContent", &body).await?;
        extract_candidate_text(&response)
    }
}

/// First candidate's text from a generateContent response
fn extract_candidate_text(response: &Value) -> Result<String, GenerationError> {
    let text = response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| GenerationError::Malformed("missing candidates[0] text".to_string()))?;

    if text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text.to_string())
}

fn extract_embedding(response: &Value) -> Result<Vec<f32>, GenerationError> {
    let values = response["embedding"]["values"]
        .as_array()
        .ok_or_else(|| GenerationError::Malformed("missing embedding values".to_string()))?;

    let vector = values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| GenerationError::Malformed("non-numeric embedding value".to_string()))?;

    if vector.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(vector)
}

#[async_trait]
impl GenerationProvider for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        self.generate_content(json!([{ "text": prompt }])).await
    }

    async fn generate_text_from_image(
        &self,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<String, GenerationError> {
        let data = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        self.generate_content(json!([
            { "text": prompt },
            { "inline_data": { "mime_type": image.mime_type, "data": data } },
        ]))
        .await
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });

        let response = self.post(&self.embedding_model, "embedContent", &body).await?;
        extract_embedding(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_candidate_text() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "```json\n{}\n```" }] } }]
        });
        assert_eq!(extract_candidate_text(&response).unwrap(), "```json\n{}\n```");
    }

    #[test]
    fn test_extract_candidate_text_missing_or_blank() {
        assert!(matches!(
            extract_candidate_text(&json!({ "candidates": [] })),
            Err(GenerationError::Malformed(_))
        ));
        let blank = json!({ "candidates": [{ "content": { "parts": [{ "text": "  " }] } }] });
        assert!(matches!(extract_candidate_text(&blank), Err(GenerationError::Empty)));
    }

    #[test]
    fn test_extract_embedding() {
        let response = json!({ "embedding": { "values": [0.25, -1.0, 0] } });
        assert_eq!(extract_embedding(&response).unwrap(), vec![0.25, -1.0, 0.0]);

        let bad = json!({ "embedding": { "values": [0.25, "x"] } });
        assert!(matches!(extract_embedding(&bad), Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn test_client_requires_key() {
        let result = GeminiClient::new(&AiConfig::default(), "  ".to_string());
        assert!(matches!(result, Err(GenerationError::NotConfigured(_))));
    }
}
