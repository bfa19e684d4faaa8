//! Image hosting client (Cloudinary-compatible signed uploads)

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use crate::db::history::HostedImage;

const API_BASE_URL: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Error)]
pub enum ImageHostError {
    #[error("Image host is not configured")]
    NotConfigured,

    #[error("Failed to read upload source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for ImageHostError {
    fn from(err: reqwest::Error) -> Self {
        ImageHostError::NetworkError(err.to_string())
    }
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Upload a local file under `folder`, returning its hosted id and url
    async fn upload(&self, local_path: &Path, name: &str, folder: &str)
        -> Result<HostedImage, ImageHostError>;

    async fn delete(&self, id: &str) -> Result<(), ImageHostError>;
}

/// Credentials for signed uploads
#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

pub struct CloudinaryClient {
    client: Client,
    base_url: String,
    credentials: CloudinaryCredentials,
}

impl CloudinaryClient {
    pub fn new(credentials: CloudinaryCredentials, timeout: Duration) -> Result<Self, ImageHostError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/{}", API_BASE_URL, credentials.cloud_name),
            credentials,
        })
    }

    fn timestamp() -> String {
        chrono::Utc::now().timestamp().to_string()
    }

    /// Signed form for `params` (which must not include file, api_key or signature)
    fn signed_form(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        let signature = sign(&params, &self.credentials.api_secret);
        params.push(("api_key", self.credentials.api_key.clone()));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("signature", signature));
        params
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &[(&'static str, String)],
    ) -> Result<T, ImageHostError> {
        let url = format!("{}/image/{}", self.base_url, endpoint);
        let response = self.client.post(&url).form(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ImageHostError::ApiError(status.as_u16(), text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ImageHostError::ParseError(e.to_string()))
    }
}

/// Request signature: params sorted by key, joined as `k=v&...`, secret appended, SHA-256 hex
pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let payload = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!("{:x}", Sha256::digest(format!("{}{}", payload, api_secret).as_bytes()))
}

#[async_trait]
impl ImageHost for CloudinaryClient {
    async fn upload(
        &self,
        local_path: &Path,
        name: &str,
        folder: &str,
    ) -> Result<HostedImage, ImageHostError> {
        let bytes = tokio::fs::read(local_path).await?;
        let mime = infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");
        let data_uri = format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        let mut form = self.signed_form(vec![
            ("folder", folder.to_string()),
            ("public_id", name.to_string()),
            ("timestamp", Self::timestamp()),
        ]);
        form.push(("file", data_uri));

        let uploaded: UploadResponse = self.post_form("upload", &form).await?;
        tracing::debug!(id = %uploaded.public_id, "Image uploaded");

        Ok(HostedImage {
            id: uploaded.public_id,
            url: uploaded.secure_url,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), ImageHostError> {
        let form = self.signed_form(vec![
            ("public_id", id.to_string()),
            ("timestamp", Self::timestamp()),
        ]);

        let destroyed: DestroyResponse = self.post_form("destroy", &form).await?;
        if destroyed.result != "ok" {
            tracing::warn!(id, result = %destroyed.result, "Image host did not confirm deletion");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_sorts_params_and_skips_empty() {
        let a = sign(
            &[
                ("timestamp", "1700000000".to_string()),
                ("folder", "grove".to_string()),
                ("public_id", String::new()),
            ],
            "secret",
        );
        let b = sign(
            &[
                ("folder", "grove".to_string()),
                ("timestamp", "1700000000".to_string()),
            ],
            "secret",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let expected = format!(
            "{:x}",
            Sha256::digest(b"folder=grove&timestamp=1700000000secret")
        );
        assert_eq!(a, expected);
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let params = [("timestamp", "1".to_string())];
        assert_ne!(sign(&params, "one"), sign(&params, "two"));
    }
}
