//! Pipeline requests
//!
//! HTTP bodies (`*Body`) are validated into the transient requests the pipelines
//! consume. A request is owned by its run once submitted.

use base64::Engine;
use grove_common::Error;
use serde::{Deserialize, Serialize};

/// Largest accepted image after base64 decoding
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Image attached to a request, base64 encoded in the body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBody {
    pub data: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Decoded request image
#[derive(Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("bytes", &self.bytes.len())
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl ImageBody {
    pub fn decode(&self) -> Result<ImageUpload, Error> {
        // Accept data URIs as well as bare base64
        let payload = match self.data.split_once(";base64,") {
            Some((_, rest)) => rest,
            None => self.data.as_str(),
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::InvalidInput(format!("Image is not valid base64: {}", e)))?;

        if bytes.is_empty() {
            return Err(Error::InvalidInput("Image is empty".to_string()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(Error::InvalidInput(format!(
                "Image exceeds {} bytes",
                MAX_IMAGE_BYTES
            )));
        }
        if !infer::is_image(&bytes) {
            return Err(Error::InvalidInput("Attachment is not an image".to_string()));
        }

        Ok(ImageUpload {
            bytes,
            file_name: self
                .file_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "image".to_string()),
        })
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

// ============================================================================
// Crop suggestion
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionMode {
    Manual,
    Auto,
}

impl SuggestionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionMode::Manual => "manual",
            SuggestionMode::Auto => "auto",
        }
    }
}

/// Growing conditions described by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManualAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub climate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    /// Degrees Celsius
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Relative humidity, percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Millimetres per year
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rainfall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ManualAttributes {
    fn is_empty(&self) -> bool {
        !non_blank(&self.soil_type)
            && !non_blank(&self.climate)
            && !non_blank(&self.season)
            && self.temperature.is_none()
            && self.humidity.is_none()
            && self.rainfall.is_none()
            && !non_blank(&self.space)
            && !non_blank(&self.notes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub country: String,
}

/// POST /crop-suggestions body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionBody {
    pub mode: SuggestionMode,
    #[serde(default)]
    pub attributes: Option<ManualAttributes>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub image: Option<ImageBody>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionInput {
    Manual(ManualAttributes),
    Auto(Location),
}

#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub user_id: String,
    pub input: SuggestionInput,
    pub image: Option<ImageUpload>,
}

impl SuggestionRequest {
    pub fn mode(&self) -> SuggestionMode {
        match self.input {
            SuggestionInput::Manual(_) => SuggestionMode::Manual,
            SuggestionInput::Auto(_) => SuggestionMode::Auto,
        }
    }
}

impl SuggestionBody {
    pub fn validate(self, user_id: &str) -> Result<SuggestionRequest, Error> {
        let image = self.image.as_ref().map(ImageBody::decode).transpose()?;

        let input = match self.mode {
            SuggestionMode::Manual => {
                let attributes = self.attributes.unwrap_or_default();
                if attributes.is_empty() && image.is_none() {
                    return Err(Error::InvalidInput(
                        "Manual mode needs at least one growing attribute or an image".to_string(),
                    ));
                }
                SuggestionInput::Manual(attributes)
            }
            SuggestionMode::Auto => {
                let location = self.location.ok_or_else(|| {
                    Error::InvalidInput("Auto mode requires a location".to_string())
                })?;
                if location.city.trim().is_empty() || location.country.trim().is_empty() {
                    return Err(Error::InvalidInput(
                        "Location requires city and country".to_string(),
                    ));
                }
                SuggestionInput::Auto(location)
            }
        };

        Ok(SuggestionRequest {
            user_id: user_id.to_string(),
            input,
            image,
        })
    }
}

// ============================================================================
// Disease detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Manual,
    Garden,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Manual => "manual",
            DetectionMode::Garden => "garden",
        }
    }
}

/// POST /disease-detections body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBody {
    pub mode: DetectionMode,
    pub crop_name: String,
    #[serde(default)]
    pub garden_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub image: Option<ImageBody>,
}

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub user_id: String,
    pub mode: DetectionMode,
    pub crop_name: String,
    pub garden_id: Option<String>,
    pub notes: Option<String>,
    pub image: ImageUpload,
}

impl DetectionBody {
    pub fn validate(self, user_id: &str) -> Result<DetectionRequest, Error> {
        let crop_name = self.crop_name.trim().to_string();
        if crop_name.is_empty() {
            return Err(Error::InvalidInput("cropName is required".to_string()));
        }

        let garden_id = self.garden_id.filter(|g| !g.trim().is_empty());
        if self.mode == DetectionMode::Garden && garden_id.is_none() {
            return Err(Error::InvalidInput("Garden mode requires gardenId".to_string()));
        }

        let image = self
            .image
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("A plant image is required".to_string()))?
            .decode()?;

        Ok(DetectionRequest {
            user_id: user_id.to_string(),
            mode: self.mode,
            crop_name,
            garden_id,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            image,
        })
    }
}
