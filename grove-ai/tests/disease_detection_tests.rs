//! Disease detection pipeline tests

mod helpers;

use grove_ai::db::history;
use grove_ai::models::{DetectionMode, DetectionRequest};
use grove_ai::pipeline::{DiseaseDetectionPipeline, FailureKind};
use grove_common::events::{NotificationEvent, PipelineKind, RunStatus};
use helpers::*;
use serde_json::json;

fn detection_request(user_id: &str) -> DetectionRequest {
    DetectionRequest {
        user_id: user_id.to_string(),
        mode: DetectionMode::Manual,
        crop_name: "Tomato".to_string(),
        garden_id: None,
        notes: Some("Spots appeared after rain".to_string()),
        image: jpeg_upload(),
    }
}

#[tokio::test]
async fn test_healthy_plant_records_history_without_diseases() {
    let harness = TestHarness::new(FakeGeneration::with_diseases(&[])).await;
    let pipeline = DiseaseDetectionPipeline::new(harness.deps.clone());
    let mut rx = harness.listen("u1", PipelineKind::DiseaseDetection).await;

    pipeline.run(detection_request("u1")).await;
    let events = drain(&mut rx);

    assert_eq!(terminal_events(&events).len(), 1);
    let payload = result_payload(&events);
    assert_eq!(payload["healthy"], true);
    assert_eq!(payload["diseases"], json!([]));
    assert_eq!(payload["cropName"], "Tomato");

    let pool = &harness.deps.db;
    assert_eq!(count_rows(pool, "diseases").await, 0);
    let mut conn = pool.acquire().await.unwrap();
    let entries = history::list_detections(&mut conn, "u1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].healthy);
    assert!(entries[0].disease_ids.is_empty());

    assert_eq!(harness.ai.calls("Describe the plant disease"), 0);
    assert_eq!(harness.ai.embedding_calls(), 0);
}

#[tokio::test]
async fn test_diagnosed_disease_is_generated_then_reused() {
    let harness =
        TestHarness::new(FakeGeneration::with_diseases(&[("Early Blight", &["brown rings"][..])])).await;
    let pipeline = DiseaseDetectionPipeline::new(harness.deps.clone());

    let mut rx = harness.listen("u1", PipelineKind::DiseaseDetection).await;
    pipeline.run(detection_request("u1")).await;
    let first = result_payload(&drain(&mut rx));

    assert_eq!(first["healthy"], false);
    assert_eq!(first["diseases"][0]["slug"], "tomato-early-blight");
    assert_eq!(first["diseases"][0]["cropName"], "Tomato");
    assert_eq!(first["diseases"][0]["treatments"], json!(["remove affected leaves"]));

    let prompt = &harness.ai.prompts_starting_with("Diagnose the plant")[0];
    assert!(prompt.contains("The plant is Tomato."));
    assert!(prompt.contains("Spots appeared after rain"));

    // Second detection for another user: exact identity match
    let mut rx = harness.listen("u2", PipelineKind::DiseaseDetection).await;
    pipeline.run(detection_request("u2")).await;
    let events = drain(&mut rx);
    let second = result_payload(&events);

    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(second["diseases"][0]["id"], first["diseases"][0]["id"]);
    assert_eq!(harness.ai.calls("Describe the plant disease"), 1);

    let pool = &harness.deps.db;
    assert_eq!(count_rows(pool, "diseases").await, 1);
    assert_eq!(count_rows(pool, "disease_detection_history").await, 2);
}

#[tokio::test]
async fn test_garden_mode_records_garden_and_hosted_image() {
    let harness =
        TestHarness::new(FakeGeneration::with_diseases(&[("Leaf Mold", &["yellow patches"][..])])).await;
    let pipeline = DiseaseDetectionPipeline::new(harness.deps.clone());
    let mut rx = harness.listen("u1", PipelineKind::DiseaseDetection).await;

    let mut request = detection_request("u1");
    request.mode = DetectionMode::Garden;
    request.garden_id = Some("garden-7".to_string());
    pipeline.run(request).await;

    let payload = result_payload(&drain(&mut rx));
    assert_eq!(payload["mode"], "garden");
    assert_eq!(payload["gardenId"], "garden-7");

    let uploaded = harness.image_host.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].id.starts_with("grove/disease-detections/"));
    assert_eq!(payload["image"]["id"], json!(uploaded[0].id));
    assert_eq!(harness.leftover_uploads(), 0);

    let mut conn = harness.deps.db.acquire().await.unwrap();
    let entries = history::list_detections(&mut conn, "u1").await.unwrap();
    assert_eq!(entries[0].garden_id.as_deref(), Some("garden-7"));
    assert_eq!(entries[0].image.as_ref(), Some(&uploaded[0]));
}

#[tokio::test]
async fn test_diagnosis_failure_cleans_up_image() {
    let ai = FakeGeneration::with_diseases(&[]);
    ai.fail_prompt("Diagnose the plant");
    let harness = TestHarness::new(ai).await;
    let pipeline = DiseaseDetectionPipeline::new(harness.deps.clone());
    let mut rx = harness.listen("u1", PipelineKind::DiseaseDetection).await;

    pipeline.run(detection_request("u1")).await;
    let events = drain(&mut rx);

    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(error_message(&events), FailureKind::Generation.user_message());
    assert!(progress_steps(&events)
        .iter()
        .all(|(status, _)| *status != RunStatus::Completed));

    let uploaded = harness.image_host.uploaded();
    assert_eq!(harness.image_host.deleted(), vec![uploaded[0].id.clone()]);
    assert_eq!(harness.leftover_uploads(), 0);
    assert_eq!(count_rows(&harness.deps.db, "disease_detection_history").await, 0);
}

#[tokio::test]
async fn test_failed_image_cleanup_keeps_original_failure() {
    let ai = FakeGeneration::with_diseases(&[]);
    ai.fail_prompt("Diagnose the plant");
    let harness = TestHarness::new(ai).await;
    harness.image_host.fail_deletes();
    let pipeline = DiseaseDetectionPipeline::new(harness.deps.clone());
    let mut rx = harness.listen("u1", PipelineKind::DiseaseDetection).await;

    pipeline.run(detection_request("u1")).await;
    let events = drain(&mut rx);

    // The hosted image could not be removed; the run still fails once, as a
    // generation failure
    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(error_message(&events), FailureKind::Generation.user_message());
    assert!(harness.image_host.deleted().is_empty());

    // Later compensations still ran
    assert_eq!(harness.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_failed_save_rolls_back_new_diseases() {
    let harness =
        TestHarness::new(FakeGeneration::with_diseases(&[("Early Blight", &["brown rings"][..])])).await;
    sqlx::query("DROP TABLE disease_detection_history")
        .execute(&harness.deps.db)
        .await
        .unwrap();

    let pipeline = DiseaseDetectionPipeline::new(harness.deps.clone());
    let mut rx = harness.listen("u1", PipelineKind::DiseaseDetection).await;
    pipeline.run(detection_request("u1")).await;
    let events = drain(&mut rx);

    assert_eq!(error_message(&events), FailureKind::Persistence.user_message());
    assert_eq!(count_rows(&harness.deps.db, "diseases").await, 0);
    assert!(!events
        .iter()
        .any(|e| matches!(e, NotificationEvent::Result { .. })));
}
