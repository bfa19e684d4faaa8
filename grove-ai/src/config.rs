//! Provider configuration for grove-ai
//!
//! Secrets resolve environment first, then TOML, with a warning when both are set.
//! Pipeline tuning values are checked once at startup.

use grove_common::config::{resolve_secret, ImageHostConfig, PipelineConfig, TomlConfig};
use grove_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::services::{
    CloudinaryClient, CloudinaryCredentials, GeminiClient, GenerationProvider, ImageHost,
    OpenMeteoClient, WeatherProvider,
};
use crate::services::weather_client::MAX_FORECAST_DAYS;

pub const AI_API_KEY_ENV: &str = "GROVE_AI_API_KEY";
pub const IMAGE_HOST_CLOUD_NAME_ENV: &str = "GROVE_IMAGE_HOST_CLOUD_NAME";
pub const IMAGE_HOST_API_KEY_ENV: &str = "GROVE_IMAGE_HOST_API_KEY";
pub const IMAGE_HOST_API_SECRET_ENV: &str = "GROVE_IMAGE_HOST_API_SECRET";

const WEATHER_TIMEOUT: Duration = Duration::from_secs(15);
const IMAGE_HOST_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolve the generation provider API key
///
/// **Priority:** ENV → TOML
pub fn resolve_ai_api_key(config: &TomlConfig) -> Result<String> {
    resolve_secret("AI API key", AI_API_KEY_ENV, config.ai.api_key.as_deref()).ok_or_else(|| {
        Error::Config(format!(
            "AI API key not configured. Please configure using one of:\n\
             1. Environment: {}=your-key-here\n\
             2. TOML config: ~/.config/grove/grove-ai.toml ([ai] api_key = \"your-key\")",
            AI_API_KEY_ENV
        ))
    })
}

/// Resolve image host credentials; `None` disables hosting
///
/// A partial set of credentials is a misconfiguration and is reported, but does not
/// stop startup.
pub fn resolve_image_host(config: &ImageHostConfig) -> Option<CloudinaryCredentials> {
    let cloud_name = resolve_secret(
        "Image host cloud name",
        IMAGE_HOST_CLOUD_NAME_ENV,
        config.cloud_name.as_deref(),
    );
    let api_key = resolve_secret("Image host API key", IMAGE_HOST_API_KEY_ENV, config.api_key.as_deref());
    let api_secret = resolve_secret(
        "Image host API secret",
        IMAGE_HOST_API_SECRET_ENV,
        config.api_secret.as_deref(),
    );

    match (cloud_name, api_key, api_secret) {
        (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryCredentials {
            cloud_name,
            api_key,
            api_secret,
        }),
        (None, None, None) => {
            info!("Image host not configured, request images will not be hosted");
            None
        }
        _ => {
            warn!("Image host credentials are incomplete (need cloud name, API key and secret), hosting disabled");
            None
        }
    }
}

/// Check pipeline tuning, clamping values that have a safe nearest setting
pub fn validate_pipeline_config(mut config: PipelineConfig) -> Result<PipelineConfig> {
    if let Some(threshold) = config.similarity_threshold {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "pipeline.similarity_threshold must be within [-1, 1], got {}",
                threshold
            )));
        }
    }

    if config.weather_days == 0 || config.weather_days > MAX_FORECAST_DAYS {
        let clamped = config.weather_days.clamp(1, MAX_FORECAST_DAYS);
        warn!(
            configured = config.weather_days,
            using = clamped,
            "pipeline.weather_days out of range"
        );
        config.weather_days = clamped;
    }

    if config.enrichment_attempts == 0 {
        warn!("pipeline.enrichment_attempts is 0, using 1");
        config.enrichment_attempts = 1;
    }

    if config.room_capacity == 0 {
        warn!("pipeline.room_capacity is 0, using 1");
        config.room_capacity = 1;
    }

    Ok(config)
}

/// External collaborators built from configuration
pub struct Providers {
    pub ai: Arc<dyn GenerationProvider>,
    pub weather: Arc<dyn WeatherProvider>,
    pub image_host: Option<Arc<dyn ImageHost>>,
}

/// Build the production providers (Gemini, Open-Meteo, Cloudinary)
pub fn build_providers(config: &TomlConfig) -> Result<Providers> {
    let api_key = resolve_ai_api_key(config)?;
    let ai = GeminiClient::new(&config.ai, api_key)
        .map_err(|e| Error::Config(format!("Generation provider: {}", e)))?;
    info!(model = %config.ai.model, embedding_model = %config.ai.embedding_model, "Generation provider ready");

    let weather = OpenMeteoClient::new(WEATHER_TIMEOUT)
        .map_err(|e| Error::Config(format!("Weather provider: {}", e)))?;

    let image_host: Option<Arc<dyn ImageHost>> = match resolve_image_host(&config.image_host) {
        Some(credentials) => {
            let cloud_name = credentials.cloud_name.clone();
            let client = CloudinaryClient::new(credentials, IMAGE_HOST_TIMEOUT)
                .map_err(|e| Error::Config(format!("Image host: {}", e)))?;
            info!(cloud_name = %cloud_name, "Image host ready");
            Some(Arc::new(client))
        }
        None => None,
    };

    Ok(Providers {
        ai: Arc::new(ai),
        weather: Arc::new(weather),
        image_host,
    })
}
