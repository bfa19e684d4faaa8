//! Disease detection pipeline
//!
//! The plant image is diagnosed with a vision prompt. Each diagnosed disease is
//! resolved by identity (disease name + crop name), then by semantic match, and
//! only then generated in full. A healthy diagnosis still writes a history entry,
//! with no disease references.

use grove_common::events::{PipelineKind, RunStatus};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{
    discard_temp_file, prompts, stage_image, Compensations, FailureKind, PipelineDeps,
    PipelineError, PipelineResult, ProgressReporter, StagedImage,
};
use crate::db::diseases::{self, Disease, NewDisease};
use crate::db::history::{self, NewDetectionEntry};
use crate::db::identity::disease_key;
use crate::db::{self, search};
use crate::models::DetectionRequest;
use crate::services::{best_match, parse_generated, HostedImage};

const IMAGE_FOLDER: &str = "grove/disease-detections";

#[derive(Debug, Deserialize)]
struct Diagnosis {
    #[serde(default)]
    healthy: bool,
    #[serde(default)]
    diseases: Vec<DiagnosedDisease>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiagnosedDisease {
    name: String,
    #[serde(default)]
    symptoms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiseaseProfile {
    description: String,
    #[serde(default)]
    symptoms: Vec<String>,
    #[serde(default)]
    causes: Vec<String>,
    #[serde(default)]
    treatments: Vec<String>,
    #[serde(default)]
    prevention: Vec<String>,
}

enum Resolution {
    Existing(Disease),
    New(NewDisease),
}

pub struct DiseaseDetectionPipeline {
    deps: PipelineDeps,
}

impl DiseaseDetectionPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Run one request to completion; results are delivered only as notifications
    pub async fn run(&self, request: DetectionRequest) {
        let run_id = Uuid::new_v4();
        let mut reporter = ProgressReporter::new(
            self.deps.hub.clone(),
            &request.user_id,
            PipelineKind::DiseaseDetection,
            run_id,
        );
        let mut compensations = Compensations::new();

        tracing::info!(
            %run_id,
            user_id = %request.user_id,
            crop = %request.crop_name,
            mode = request.mode.as_str(),
            "Disease detection run started"
        );
        reporter
            .stage(RunStatus::Initiated, 0, "Disease detection started")
            .await;

        let mut image: Option<StagedImage> = None;
        let result = self
            .execute(&request, run_id, &mut reporter, &mut compensations, &mut image)
            .await;

        match result {
            Ok(payload) => {
                compensations.disarm();
                discard_temp_file(&self.deps, image.as_ref()).await;
                reporter.complete(payload).await;
            }
            Err(err) => {
                compensations.run().await;
                reporter.fail(&err).await;
            }
        }
    }

    async fn execute(
        &self,
        request: &DetectionRequest,
        run_id: Uuid,
        reporter: &mut ProgressReporter,
        compensations: &mut Compensations,
        image: &mut Option<StagedImage>,
    ) -> PipelineResult<Map<String, Value>> {
        let staged = image.insert(
            stage_image(&self.deps, &request.image, IMAGE_FOLDER, run_id, compensations).await?,
        );
        reporter.stage(RunStatus::Initiated, 5, "Image received").await;

        reporter
            .stage(RunStatus::Analyzing, 10, "Analyzing plant image")
            .await;
        let raw = self
            .deps
            .ai
            .generate_text_from_image(
                &prompts::disease_diagnosis(&request.crop_name, request.notes.as_deref()),
                &staged.input,
            )
            .await?;
        let diagnosis: Diagnosis = parse_generated(&raw)?;
        let diagnosed = distinct_diseases(&diagnosis, &request.crop_name);
        let healthy = diagnosed.is_empty();

        let message = if healthy {
            "Plant looks healthy".to_string()
        } else {
            format!("Detected {} possible diseases", diagnosed.len())
        };
        reporter.stage(RunStatus::Analyzing, 35, message).await;

        reporter
            .stage(RunStatus::GeneratingData, 45, "Looking up disease data")
            .await;
        let total = diagnosed.len().max(1);
        let mut resolutions = Vec::with_capacity(diagnosed.len());
        for (index, disease) in diagnosed.iter().enumerate() {
            let resolution = self.resolve(disease, &request.crop_name).await?;
            let progress = 45 + ((index + 1) * 35 / total) as u8;
            let message = match &resolution {
                Resolution::Existing(d) => format!("Matched {}", d.name),
                Resolution::New(d) => format!("Generated data for {}", d.name),
            };
            reporter.stage(RunStatus::GeneratingData, progress, message).await;
            resolutions.push(resolution);
        }

        reporter
            .stage(RunStatus::SavingToDb, 85, "Saving results")
            .await;
        let input = json!({
            "cropName": request.crop_name,
            "notes": request.notes,
            "fileName": request.image.file_name,
        });
        let hosted = staged.hosted.clone();
        let (history_id, saved) = self
            .persist(request, &input, hosted.as_ref(), healthy, resolutions)
            .await?;

        tracing::info!(%run_id, %history_id, healthy, diseases = saved.len(), "Disease detection persisted");

        let mut payload = Map::new();
        payload.insert("historyId".to_string(), json!(history_id));
        payload.insert("mode".to_string(), json!(request.mode));
        payload.insert("cropName".to_string(), json!(request.crop_name));
        payload.insert("gardenId".to_string(), json!(request.garden_id));
        payload.insert("healthy".to_string(), json!(healthy));
        payload.insert("diseases".to_string(), serde_json::to_value(&saved).map_err(internal)?);
        payload.insert("image".to_string(), serde_json::to_value(&hosted).map_err(internal)?);
        Ok(payload)
    }

    async fn resolve(&self, diagnosed: &DiagnosedDisease, crop_name: &str) -> PipelineResult<Resolution> {
        let candidates = {
            let mut conn = self.deps.db.acquire().await?;
            if let Some(existing) =
                diseases::find_by_identity(&mut conn, &diagnosed.name, crop_name).await?
            {
                tracing::debug!(disease = %existing.slug, "Exact identity match");
                return Ok(Resolution::Existing(existing));
            }
            diseases::load_embedded(&mut conn).await?
        };

        let embedding = self
            .deps
            .ai
            .generate_embedding(&prompts::disease_embedding_text(
                &diagnosed.name,
                crop_name,
                &diagnosed.symptoms,
            ))
            .await?;

        let query = format!("{} {} {}", diagnosed.name, crop_name, diagnosed.symptoms.join(" "));
        let ranked = search::rank(candidates, &query)
            .into_iter()
            .filter_map(|(disease, _)| disease.embedding.clone().map(|v| (disease, v)));

        if let Some((disease, score)) =
            best_match(&embedding, ranked, self.deps.config.similarity_threshold)
        {
            tracing::debug!(disease = %disease.slug, score, diagnosed = %diagnosed.name, "Semantic match");
            return Ok(Resolution::Existing(disease));
        }

        let raw = self
            .deps
            .ai
            .generate_text(&prompts::disease_profile(&diagnosed.name, crop_name))
            .await?;
        let profile: DiseaseProfile = parse_generated(&raw)?;

        let symptoms = if profile.symptoms.is_empty() {
            diagnosed.symptoms.clone()
        } else {
            profile.symptoms
        };

        Ok(Resolution::New(NewDisease {
            name: diagnosed.name.trim().to_string(),
            crop_name: crop_name.to_string(),
            description: profile.description,
            symptoms,
            causes: profile.causes,
            treatments: profile.treatments,
            prevention: profile.prevention,
            embedding: Some(embedding),
        }))
    }

    async fn persist(
        &self,
        request: &DetectionRequest,
        input: &Value,
        hosted: Option<&HostedImage>,
        healthy: bool,
        resolutions: Vec<Resolution>,
    ) -> PipelineResult<(Uuid, Vec<Disease>)> {
        let mut tx = db::begin_write(&self.deps.db).await?;

        let mut saved: Vec<Disease> = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            let disease = match resolution {
                Resolution::Existing(disease) => disease,
                Resolution::New(new_disease) => diseases::insert_disease(&mut *tx, &new_disease).await?,
            };
            if !saved.iter().any(|d| d.id == disease.id) {
                saved.push(disease);
            }
        }

        let disease_ids: Vec<Uuid> = saved.iter().map(|d| d.id).collect();
        let history_id = history::append_detection(
            &mut *tx,
            NewDetectionEntry {
                user_id: &request.user_id,
                mode: request.mode.as_str(),
                crop_name: &request.crop_name,
                garden_id: request.garden_id.as_deref(),
                input,
                image: hosted,
                healthy,
                disease_ids: &disease_ids,
            },
        )
        .await?;

        tx.commit().await?;
        Ok((history_id, saved))
    }
}

fn internal(err: serde_json::Error) -> PipelineError {
    PipelineError::new(FailureKind::Internal, err.to_string())
}

/// Diagnosed diseases worth resolving; empty means the plant is healthy
fn distinct_diseases(diagnosis: &Diagnosis, crop_name: &str) -> Vec<DiagnosedDisease> {
    if diagnosis.healthy {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    diagnosis
        .diseases
        .iter()
        .filter(|d| !d.name.trim().is_empty())
        .filter(|d| seen.insert(disease_key(&d.name, crop_name)))
        .cloned()
        .collect()
}
