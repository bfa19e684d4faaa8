//! Crop suggestion pipeline
//!
//! 1. **initiated**: optional garden image is stored and hosted
//! 2. **analyzing**: conditions are assembled (weather lookup in auto mode) and the
//!    provider suggests crop identities (name + scientific name)
//! 3. **generatingData**: each identity is resolved against the store: exact
//!    scientific-name match, then semantic match, then a detailed profile call
//! 4. **savingToDB**: new crops and the history entry are written in one transaction
//! 5. **completed**: `result` is emitted, then crops still `pending` are enriched
//!    one by one, each reported with a `crop-details` event

use chrono::Utc;
use grove_common::events::{DetailStatus, NotificationEvent, PipelineKind, RunStatus};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use uuid::Uuid;

use super::{
    discard_temp_file, prompts, stage_image, Compensations, FailureKind, PipelineDeps,
    PipelineError, PipelineResult, ProgressReporter, StagedImage,
};
use crate::db::crops::{self, Crop, NewCrop};
use crate::db::history::{self, NewSuggestionEntry};
use crate::db::identity::normalize_key;
use crate::db::{self, crop_details, search};
use crate::models::{SuggestionInput, SuggestionRequest};
use crate::services::{best_match, parse_generated, HostedImage};
use crate::utils::retry_attempts;

const IMAGE_FOLDER: &str = "grove/crop-suggestions";
const ENRICHMENT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct SuggestedCrops {
    crops: Vec<CropIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropIdentity {
    name: String,
    scientific_name: String,
}

#[derive(Debug, Deserialize)]
struct CropProfile {
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    profile: Value,
}

/// How one suggested identity maps onto the store
enum Resolution {
    Existing(Crop),
    New(NewCrop),
}

/// What a successful primary phase hands to completion and enrichment
struct Outcome {
    payload: Map<String, Value>,
    pending: Vec<Crop>,
}

pub struct CropSuggestionPipeline {
    deps: PipelineDeps,
}

impl CropSuggestionPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Run one request to completion; results are delivered only as notifications
    pub async fn run(&self, request: SuggestionRequest) {
        let run_id = Uuid::new_v4();
        let mut reporter = ProgressReporter::new(
            self.deps.hub.clone(),
            &request.user_id,
            PipelineKind::CropSuggestion,
            run_id,
        );
        let room = reporter.room().to_string();
        let mut compensations = Compensations::new();

        tracing::info!(%run_id, user_id = %request.user_id, mode = ?request.mode(), "Crop suggestion run started");
        reporter
            .stage(RunStatus::Initiated, 0, "Crop suggestion started")
            .await;

        let mut image: Option<StagedImage> = None;
        let result = self
            .execute(&request, run_id, &mut reporter, &mut compensations, &mut image)
            .await;

        match result {
            Ok(outcome) => {
                compensations.disarm();
                discard_temp_file(&self.deps, image.as_ref()).await;
                reporter.complete(outcome.payload).await;
                self.enrich(&room, outcome.pending).await;
            }
            Err(err) => {
                let failed = compensations.run().await;
                if failed > 0 {
                    tracing::warn!(%run_id, failed, "Some compensations failed");
                }
                reporter.fail(&err).await;
            }
        }
    }

    async fn execute(
        &self,
        request: &SuggestionRequest,
        run_id: Uuid,
        reporter: &mut ProgressReporter,
        compensations: &mut Compensations,
        image: &mut Option<StagedImage>,
    ) -> PipelineResult<Outcome> {
        if let Some(upload) = &request.image {
            *image = Some(stage_image(&self.deps, upload, IMAGE_FOLDER, run_id, compensations).await?);
            reporter.stage(RunStatus::Initiated, 5, "Image received").await;
        }

        // analyzing
        reporter
            .stage(RunStatus::Analyzing, 10, "Analyzing growing conditions")
            .await;
        let (conditions, input) = self.conditions(request, reporter).await?;

        let prompt = prompts::crop_identities(&conditions, image.is_some());
        let raw = match image.as_ref() {
            Some(staged) => {
                self.deps
                    .ai
                    .generate_text_from_image(&prompt, &staged.input)
                    .await?
            }
            None => self.deps.ai.generate_text(&prompt).await?,
        };
        let identities = distinct_identities(parse_generated::<SuggestedCrops>(&raw)?.crops);
        if identities.is_empty() {
            return Err(PipelineError::generation("crop identities", "no crops suggested"));
        }
        reporter
            .stage(
                RunStatus::Analyzing,
                40,
                format!("Suggested {} crops", identities.len()),
            )
            .await;

        // generatingData
        reporter
            .stage(RunStatus::GeneratingData, 50, "Matching against known crops")
            .await;
        let total = identities.len();
        let mut resolutions = Vec::with_capacity(total);
        for (index, identity) in identities.iter().enumerate() {
            let resolution = self.resolve(identity, &conditions).await?;
            let progress = 50 + ((index + 1) * 30 / total) as u8;
            let message = match &resolution {
                Resolution::Existing(crop) => format!("Matched {}", crop.name),
                Resolution::New(crop) => format!("Generated data for {}", crop.name),
            };
            reporter.stage(RunStatus::GeneratingData, progress, message).await;
            resolutions.push(resolution);
        }

        // savingToDB
        reporter
            .stage(RunStatus::SavingToDb, 85, "Saving results")
            .await;
        let hosted = image.as_ref().and_then(|i| i.hosted.clone());
        let (history_id, crops) = self
            .persist(request, &input, hosted.as_ref(), resolutions)
            .await?;

        tracing::info!(
            %run_id,
            %history_id,
            crops = crops.len(),
            "Crop suggestion persisted"
        );

        let pending = crops
            .iter()
            .filter(|c| c.detail_status == DetailStatus::Pending)
            .cloned()
            .collect();

        let mut payload = Map::new();
        payload.insert("historyId".to_string(), json!(history_id));
        payload.insert("mode".to_string(), json!(request.mode()));
        payload.insert("input".to_string(), input);
        payload.insert("crops".to_string(), serde_json::to_value(&crops).map_err(internal)?);
        payload.insert("image".to_string(), serde_json::to_value(&hosted).map_err(internal)?);

        Ok(Outcome { payload, pending })
    }

    /// Prompt conditions plus the input document recorded in history
    async fn conditions(
        &self,
        request: &SuggestionRequest,
        reporter: &mut ProgressReporter,
    ) -> PipelineResult<(String, Value)> {
        match &request.input {
            SuggestionInput::Manual(attributes) => Ok((
                prompts::manual_conditions(attributes),
                serde_json::to_value(attributes).map_err(internal)?,
            )),
            SuggestionInput::Auto(location) => {
                let coordinates = self
                    .deps
                    .weather
                    .resolve_coordinates(&location.city, location.state.as_deref(), &location.country)
                    .await?
                    .ok_or_else(|| {
                        PipelineError::new(
                            FailureKind::Location,
                            format!("no geocoding match for {}, {}", location.city, location.country),
                        )
                    })?;

                let days = self.deps.config.weather_days;
                let weather = self.deps.weather.averages_over_days(coordinates, days).await?;
                reporter
                    .stage(RunStatus::Analyzing, 25, "Weather data collected")
                    .await;

                Ok((
                    prompts::weather_conditions(location, &weather, days),
                    json!({
                        "location": location,
                        "coordinates": coordinates,
                        "weather": weather,
                    }),
                ))
            }
        }
    }

    /// Exact match, then semantic match, then a new profile
    async fn resolve(&self, identity: &CropIdentity, conditions: &str) -> PipelineResult<Resolution> {
        let candidates = {
            let mut conn = self.deps.db.acquire().await?;
            if let Some(existing) =
                crops::find_by_scientific_name(&mut conn, &identity.scientific_name).await?
            {
                tracing::debug!(crop = %existing.slug, "Exact identity match");
                return Ok(Resolution::Existing(existing));
            }
            crops::load_embedded(&mut conn).await?
        };

        let embedding = self
            .deps
            .ai
            .generate_embedding(&prompts::crop_embedding_text(
                &identity.name,
                &identity.scientific_name,
            ))
            .await?;

        let query = format!("{} {}", identity.name, identity.scientific_name);
        let ranked = search::rank(candidates, &query)
            .into_iter()
            .filter_map(|(crop, _)| crop.embedding.clone().map(|v| (crop, v)));

        if let Some((crop, score)) =
            best_match(&embedding, ranked, self.deps.config.similarity_threshold)
        {
            tracing::debug!(
                crop = %crop.slug,
                score,
                suggested = %identity.scientific_name,
                "Semantic match"
            );
            return Ok(Resolution::Existing(crop));
        }

        let raw = self
            .deps
            .ai
            .generate_text(&prompts::crop_profile(
                &identity.name,
                &identity.scientific_name,
                conditions,
            ))
            .await?;
        let profile: CropProfile = parse_generated(&raw)?;

        Ok(Resolution::New(NewCrop {
            name: identity.name.trim().to_string(),
            scientific_name: identity.scientific_name.trim().to_string(),
            description: profile.description,
            tags: profile.tags,
            profile: profile.profile,
            embedding: Some(embedding),
        }))
    }

    /// New crops and the history entry, all or nothing
    async fn persist(
        &self,
        request: &SuggestionRequest,
        input: &Value,
        hosted: Option<&HostedImage>,
        resolutions: Vec<Resolution>,
    ) -> PipelineResult<(Uuid, Vec<Crop>)> {
        // Dropping the transaction on an early return rolls it back
        let mut tx = db::begin_write(&self.deps.db).await?;

        let mut saved: Vec<Crop> = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            let crop = match resolution {
                Resolution::Existing(crop) => crop,
                Resolution::New(new_crop) => crops::insert_crop(&mut *tx, &new_crop).await?,
            };
            if !saved.iter().any(|c| c.id == crop.id) {
                saved.push(crop);
            }
        }

        let crop_ids: Vec<Uuid> = saved.iter().map(|c| c.id).collect();
        let history_id = history::append_suggestion(
            &mut *tx,
            NewSuggestionEntry {
                user_id: &request.user_id,
                mode: request.mode().as_str(),
                input,
                image: hosted,
                crop_ids: &crop_ids,
            },
        )
        .await?;

        tx.commit().await?;
        Ok((history_id, saved))
    }

    /// Best-effort detail generation for crops still `pending`
    ///
    /// Each crop is independent: its failure is recorded on that crop only.
    async fn enrich(&self, room: &str, crops: Vec<Crop>) {
        let attempts = self.deps.config.enrichment_attempts;

        for crop in crops {
            let generated = retry_attempts("crop details", attempts, ENRICHMENT_BACKOFF, || {
                self.generate_details(&crop)
            })
            .await;

            let (status, details) = match generated {
                Ok(details) => match self.store_details(&crop, details).await {
                    Ok(settled) => settled,
                    Err(e) => {
                        tracing::warn!(crop = %crop.slug, error = %e, "Failed to store crop details");
                        self.mark_failed(&crop).await
                    }
                },
                Err(e) => {
                    tracing::warn!(crop = %crop.slug, error = %e, "Crop enrichment failed");
                    self.mark_failed(&crop).await
                }
            };

            self.deps
                .hub
                .emit(
                    room,
                    NotificationEvent::CropDetails {
                        crop_id: crop.id,
                        status,
                        details,
                        timestamp: Utc::now(),
                    },
                )
                .await;
        }
    }

    async fn generate_details(&self, crop: &Crop) -> PipelineResult<Value> {
        let raw = self
            .deps
            .ai
            .generate_text(&prompts::crop_details(&crop.name, &crop.scientific_name))
            .await?;
        let details: Map<String, Value> = parse_generated(&raw)?;
        Ok(Value::Object(details))
    }

    /// Details and the `success` status in one transaction
    ///
    /// Returns the status actually stored, which differs when another run settled the
    /// crop first.
    async fn store_details(
        &self,
        crop: &Crop,
        details: Value,
    ) -> PipelineResult<(DetailStatus, Option<Value>)> {
        let mut tx = db::begin_write(&self.deps.db).await?;
        if crops::advance_detail_status(&mut *tx, crop.id, DetailStatus::Success).await? {
            crop_details::upsert(&mut *tx, crop.id, &details).await?;
            tx.commit().await?;
            return Ok((DetailStatus::Success, Some(details)));
        }
        tx.rollback().await?;

        tracing::debug!(crop = %crop.slug, "Crop details already settled by another run");
        self.settled(crop).await
    }

    async fn mark_failed(&self, crop: &Crop) -> (DetailStatus, Option<Value>) {
        let result = async {
            let mut conn = self.deps.db.acquire().await?;
            if crops::advance_detail_status(&mut conn, crop.id, DetailStatus::Failed).await? {
                return Ok((DetailStatus::Failed, None));
            }
            drop(conn);
            self.settled(crop).await
        }
        .await;

        result.unwrap_or_else(|e: PipelineError| {
            tracing::error!(crop = %crop.slug, error = %e, "Failed to record enrichment failure");
            (DetailStatus::Failed, None)
        })
    }

    /// Stored status of a crop, with its details when enrichment succeeded
    async fn settled(&self, crop: &Crop) -> PipelineResult<(DetailStatus, Option<Value>)> {
        let mut conn = self.deps.db.acquire().await?;
        let status = crops::load_by_id(&mut conn, crop.id)
            .await?
            .map(|c| c.detail_status)
            .unwrap_or(DetailStatus::Failed);

        let details = match status {
            DetailStatus::Success => crop_details::load(&mut conn, crop.id).await?.map(|d| d.details),
            _ => None,
        };
        Ok((status, details))
    }
}

fn internal(err: serde_json::Error) -> PipelineError {
    PipelineError::new(FailureKind::Internal, err.to_string())
}

/// Drop blank identities and repeats of the same scientific name
fn distinct_identities(identities: Vec<CropIdentity>) -> Vec<CropIdentity> {
    let mut seen = std::collections::HashSet::new();
    identities
        .into_iter()
        .filter(|i| !i.name.trim().is_empty() && !i.scientific_name.trim().is_empty())
        .filter(|i| seen.insert(normalize_key(&i.scientific_name)))
        .collect()
}
