//! Scripted fake collaborators
//!
//! `FakeGeneration` answers by the first line of each prompt, which the prompt
//! builders keep stable. Every call is recorded so tests can assert which
//! generation steps ran.

use async_trait::async_trait;
use grove_ai::services::{
    Coordinates, GenerationError, GenerationProvider, HostedImage, ImageHost, ImageHostError,
    ImageInput, WeatherAverages, WeatherError, WeatherProvider,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Dimension of automatically assigned embeddings
const AUTO_EMBEDDING_DIM: usize = 64;

/// Detail status written to the database just before a crop's details are generated
struct SettleBeforeDetails {
    pool: SqlitePool,
    crop_name: String,
    status: &'static str,
}

pub struct FakeGeneration {
    crops: Mutex<Vec<(String, String)>>,
    crops_by_note: Mutex<HashMap<String, Vec<(String, String)>>>,
    settle_before_details: Mutex<Option<SettleBeforeDetails>>,
    diagnosis: Mutex<Value>,
    failing_details: Mutex<HashSet<String>>,
    failing_prompt: Mutex<Option<String>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    next_basis: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    embedding_texts: Mutex<Vec<String>>,
}

impl Default for FakeGeneration {
    fn default() -> Self {
        Self {
            crops: Mutex::new(Vec::new()),
            crops_by_note: Mutex::new(HashMap::new()),
            settle_before_details: Mutex::new(None),
            diagnosis: Mutex::new(json!({"healthy": true, "diseases": []})),
            failing_details: Mutex::new(HashSet::new()),
            failing_prompt: Mutex::new(None),
            embeddings: Mutex::new(HashMap::new()),
            next_basis: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            embedding_texts: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGeneration {
    /// Suggests the given (name, scientific name) pairs
    pub fn with_crops(crops: &[(&str, &str)]) -> Self {
        let fake = Self::default();
        fake.set_crops(crops);
        fake
    }

    /// Suggest these crops instead when the conditions carry `- Notes: <note>`
    pub fn set_crops_for_note(&self, note: &str, crops: &[(&str, &str)]) {
        self.crops_by_note.lock().unwrap().insert(
            note.to_string(),
            crops
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
        );
    }

    /// Another writer settles the crop's detail status while its details are
    /// being generated
    pub fn settle_before_details(&self, pool: SqlitePool, crop_name: &str, status: &'static str) {
        *self.settle_before_details.lock().unwrap() = Some(SettleBeforeDetails {
            pool,
            crop_name: crop_name.to_string(),
            status,
        });
    }

    /// Diagnoses the given (disease, symptoms) pairs; empty means healthy
    pub fn with_diseases(diseases: &[(&str, &[&str])]) -> Self {
        let fake = Self::default();
        fake.set_diseases(diseases);
        fake
    }

    pub fn set_crops(&self, crops: &[(&str, &str)]) {
        *self.crops.lock().unwrap() = crops
            .iter()
            .map(|(n, s)| (n.to_string(), s.to_string()))
            .collect();
    }

    pub fn set_diseases(&self, diseases: &[(&str, &[&str])]) {
        let listed: Vec<Value> = diseases
            .iter()
            .map(|(name, symptoms)| json!({"name": name, "symptoms": symptoms}))
            .collect();
        *self.diagnosis.lock().unwrap() = json!({
            "healthy": listed.is_empty(),
            "diseases": listed,
        });
    }

    /// Detail generation for this crop name always fails
    pub fn fail_details_for(&self, crop_name: &str) {
        self.failing_details
            .lock()
            .unwrap()
            .insert(crop_name.to_string());
    }

    /// Any prompt starting with `prefix` fails
    pub fn fail_prompt(&self, prefix: &str) {
        *self.failing_prompt.lock().unwrap() = Some(prefix.to_string());
    }

    /// Fixed embedding for an exact embedding text
    ///
    /// Texts without one get a fresh unit basis vector, so distinct texts have
    /// similarity 0 with each other.
    pub fn set_embedding(&self, text: &str, vector: Vec<f32>) {
        self.embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    pub fn prompts_starting_with(&self, prefix: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn calls(&self, prefix: &str) -> usize {
        self.prompts_starting_with(prefix).len()
    }

    pub fn embedding_calls(&self) -> usize {
        self.embedding_texts.lock().unwrap().len()
    }

    fn respond(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(prefix) = self.failing_prompt.lock().unwrap().as_deref() {
            if prompt.starts_with(prefix) {
                return Err(GenerationError::Quota("scripted failure".to_string()));
            }
        }

        let first_line = prompt.lines().next().unwrap_or_default();

        if first_line.starts_with("Suggest crops") {
            let by_note = self.crops_by_note.lock().unwrap();
            let noted = prompt
                .lines()
                .find_map(|line| line.strip_prefix("- Notes: "))
                .and_then(|note| by_note.get(note).cloned());
            let crops: Vec<Value> = noted
                .unwrap_or_else(|| self.crops.lock().unwrap().clone())
                .iter()
                .map(|(name, scientific)| json!({"name": name, "scientificName": scientific}))
                .collect();
            // Fenced, the way providers often answer
            return Ok(format!("```json\n{}\n```", json!({ "crops": crops })));
        }

        if let Some(rest) = first_line.strip_prefix("Describe the crop ") {
            let name = rest.split(" (").next().unwrap_or(rest);
            return Ok(json!({
                "description": format!("{} is easy to grow.", name),
                "tags": ["garden"],
                "profile": {"sunlight": "full sun", "difficulty": "easy"},
            })
            .to_string());
        }

        if let Some(rest) = first_line.strip_prefix("Write a detailed growing guide for ") {
            let name = rest.split(" (").next().unwrap_or(rest);
            if self.failing_details.lock().unwrap().contains(name) {
                return Err(GenerationError::Status(500, "scripted failure".to_string()));
            }
            return Ok(json!({
                "planting": format!("Plant {} after the last frost.", name),
                "watering": "Keep the soil moist.",
            })
            .to_string());
        }

        if first_line.starts_with("Diagnose the plant") {
            return Ok(self.diagnosis.lock().unwrap().to_string());
        }

        if let Some(rest) = first_line.strip_prefix("Describe the plant disease ") {
            let name = rest.split(" affecting ").next().unwrap_or(rest);
            return Ok(json!({
                "description": format!("{} is a common fungal problem.", name),
                "symptoms": ["dark lesions"],
                "causes": ["humid weather"],
                "treatments": ["remove affected leaves"],
                "prevention": ["water at the base"],
            })
            .to_string());
        }

        Err(GenerationError::Malformed(format!("unscripted prompt: {}", first_line)))
    }
}

#[async_trait]
impl GenerationProvider for FakeGeneration {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut settle = None;
        if let Some(s) = self.settle_before_details.lock().unwrap().as_ref() {
            let prefix = format!("Write a detailed growing guide for {} (", s.crop_name);
            if prompt.starts_with(&prefix) {
                settle = Some((s.pool.clone(), s.crop_name.clone(), s.status));
            }
        }
        if let Some((pool, crop_name, status)) = settle {
            sqlx::query("UPDATE crops SET detail_status = ? WHERE name = ?")
                .bind(status)
                .bind(crop_name)
                .execute(&pool)
                .await
                .expect("settle crop status");
        }

        self.respond(prompt)
    }

    async fn generate_text_from_image(
        &self,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<String, GenerationError> {
        assert!(!image.bytes.is_empty(), "vision prompt without image bytes");
        self.respond(prompt)
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        self.embedding_texts.lock().unwrap().push(text.to_string());

        if let Some(vector) = self.embeddings.lock().unwrap().get(text) {
            return Ok(vector.clone());
        }

        let index = self.next_basis.fetch_add(1, Ordering::SeqCst) % AUTO_EMBEDDING_DIM;
        let mut vector = vec![0.0; AUTO_EMBEDDING_DIM];
        vector[index] = 1.0;
        Ok(vector)
    }
}

/// Weather provider with a fixed location table
pub struct FakeWeather {
    pub coordinates: Mutex<Option<Coordinates>>,
    pub average_calls: AtomicUsize,
}

impl Default for FakeWeather {
    fn default() -> Self {
        Self {
            coordinates: Mutex::new(Some(Coordinates {
                lat: 18.52,
                lon: 73.86,
            })),
            average_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeWeather {
    /// Geocoding finds nothing
    pub fn unknown_location(&self) {
        *self.coordinates.lock().unwrap() = None;
    }
}

#[async_trait]
impl WeatherProvider for FakeWeather {
    async fn resolve_coordinates(
        &self,
        _city: &str,
        _state: Option<&str>,
        _country: &str,
    ) -> Result<Option<Coordinates>, WeatherError> {
        Ok(*self.coordinates.lock().unwrap())
    }

    async fn averages_over_days(
        &self,
        _coordinates: Coordinates,
        _days: u32,
    ) -> Result<WeatherAverages, WeatherError> {
        self.average_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WeatherAverages {
            avg_max_temp: 31.0,
            avg_min_temp: 21.0,
            avg_humidity: 64.0,
            avg_rainfall: 3.2,
            avg_wind_speed: 14.0,
            dominant_wind_direction: "W".to_string(),
        })
    }
}

/// Image host that keeps uploads in memory and records deletions
#[derive(Default)]
pub struct FakeImageHost {
    uploads: Mutex<Vec<HostedImage>>,
    deleted: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
}

impl FakeImageHost {
    /// Every delete is rejected by the host
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn uploaded(&self) -> Vec<HostedImage> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageHost for FakeImageHost {
    async fn upload(
        &self,
        local_path: &Path,
        name: &str,
        folder: &str,
    ) -> Result<HostedImage, ImageHostError> {
        // The pipeline uploads from its local temp copy
        tokio::fs::metadata(local_path).await?;

        let id = format!("{}/{}", folder, name);
        let hosted = HostedImage {
            url: format!("https://images.test/{}.jpg", id),
            id,
        };
        self.uploads.lock().unwrap().push(hosted.clone());
        Ok(hosted)
    }

    async fn delete(&self, id: &str) -> Result<(), ImageHostError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ImageHostError::ApiError(500, format!("cannot delete {}", id)));
        }
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
