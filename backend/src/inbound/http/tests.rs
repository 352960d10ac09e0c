//! Handler tests running the real domain services on in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{App, test as actix_test, web};
use rstest::rstest;
use serde_json::Value;

use super::configure_api;
use super::state::HttpState;
use crate::domain::ingestion::IngestRequest;
use crate::domain::{FileDescriptor, TaskId, TaskKind, TaskState};
use crate::test_support::fixtures::{toy_affine, toy_atlas_definition, toy_volume};
use crate::test_support::{InMemoryCorpus, JsonVolumeCodec};

async fn seeded_corpus() -> InMemoryCorpus {
    let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);
    corpus.catalog.add_symptom("A", Some("Language"), "Cognition", false);
    corpus.catalog.add_symptom("B", None, "Motor", false);
    corpus.add_connectivity_subject(1, [1.0, 2.0], "A").await;
    corpus.add_connectivity_subject(2, [2.0, 1.0], "B").await;
    corpus
}

async fn init_app(
    corpus: &InMemoryCorpus,
) -> impl Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error> {
    let state = HttpState::new(
        corpus.orchestrator.clone(),
        corpus.ingestion.clone(),
        corpus.point_query.clone(),
        Arc::new(JsonVolumeCodec),
    );
    actix_test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_api),
    )
    .await
}

fn image_body(values: [f32; 2]) -> Vec<u8> {
    JsonVolumeCodec::payload(&toy_volume(values))
}

async fn error_code(response: ServiceResponse) -> String {
    let body: Value = actix_test::read_body_json(response).await;
    body["code"].as_str().unwrap_or_default().to_owned()
}

#[rstest]
#[actix_web::test]
async fn decode_submission_is_accepted_and_polls_to_success() {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::post()
        .uri("/api/v1/decode?taxonomy_level=symptom")
        .set_payload(image_body([1.0, 2.0]))
        .to_request();
    let response = actix_test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = actix_test::read_body_json(response).await;
    let task_id = body["taskId"].as_str().expect("task id").to_owned();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut last_percent = 0;
    loop {
        let request = actix_test::TestRequest::get()
            .uri(&format!("/api/v1/tasks/{task_id}"))
            .to_request();
        let status: Value = actix_test::call_and_read_body_json(&app, request).await;
        let percent = status["progressPercent"].as_i64().expect("percent");
        assert!(percent >= last_percent, "progress went backwards");
        last_percent = percent;
        if status["state"] == "SUCCESS" {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let request = actix_test::TestRequest::get()
        .uri(&format!("/api/v1/tasks/{task_id}/result"))
        .to_request();
    let outcome: Value = actix_test::call_and_read_body_json(&app, request).await;
    assert_eq!(outcome["state"], "SUCCESS");
    assert_eq!(outcome["result"]["per_taxon_stats"][0]["taxonomy_item"], "A");
}

#[rstest]
#[case("/api/v1/decode")]
#[case("/api/v1/decode?taxonomy_level=Domain")]
#[case("/api/v1/analyses?taxonomy_level=phylum")]
#[actix_web::test]
async fn submissions_without_a_valid_level_are_rejected(#[case] uri: &str) {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::post()
        .uri(uri)
        .set_payload(image_body([1.0, 2.0]))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_request");
}

#[rstest]
#[actix_web::test]
async fn off_grid_images_are_rejected_before_a_task_exists() {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;
    let off_grid = crate::domain::imaging::Volume::zeros([3, 1, 1], toy_affine());

    let request = actix_test::TestRequest::post()
        .uri("/api/v1/decode?taxonomy_level=domain")
        .set_payload(JsonVolumeCodec::payload(&off_grid))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[rstest]
#[actix_web::test]
async fn unreadable_bodies_are_rejected() {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::post()
        .uri("/api/v1/analyses?taxonomy_level=domain")
        .set_payload(vec![0x1f, 0x8b, 0x00])
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_request");
}

#[rstest]
#[case("/api/v1/tasks/not-a-uuid", StatusCode::BAD_REQUEST)]
#[case("/api/v1/tasks/00000000-0000-0000-0000-000000000000", StatusCode::NOT_FOUND)]
#[case(
    "/api/v1/tasks/00000000-0000-0000-0000-000000000000/result",
    StatusCode::NOT_FOUND
)]
#[actix_web::test]
async fn unknown_tasks_are_reported(#[case] uri: &str, #[case] expected: StatusCode) {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::get().uri(uri).to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), expected);
}

#[rstest]
#[actix_web::test]
async fn results_of_running_tasks_conflict() {
    let corpus = seeded_corpus().await;
    let task_id = TaskId::random();
    corpus
        .tasks
        .seed(task_id, TaskKind::Decode, TaskState::Progress, 40);
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::get()
        .uri(&format!("/api/v1/tasks/{task_id}/result"))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["details"]["progressPercent"], 40);
}

#[rstest]
#[actix_web::test]
async fn locations_report_the_reduced_value_per_owner() {
    let corpus = seeded_corpus().await;
    corpus
        .registry
        .register(toy_atlas_definition("toy-hash"), false)
        .await
        .expect("atlas registered");
    corpus
        .ingestion
        .ingest(IngestRequest {
            bytes: image_body([5.0, 0.0]),
            filename: "lesion.nii.gz".to_owned(),
            descriptor: FileDescriptor::Roi { subject_id: 7 },
            override_existing: false,
        })
        .await
        .expect("ingested");
    for outcome in corpus.run_reductions().await {
        outcome.expect("reduction succeeds");
    }
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::get()
        .uri("/api/v1/locations?x=0&y=0&z=0&map_type=roi")
        .to_request();
    let body: Value = actix_test::call_and_read_body_json(&app, request).await;
    assert_eq!(body["7"], 5.0);

    let request = actix_test::TestRequest::get()
        .uri("/api/v1/locations?x=2&y=0&z=0&map_type=roi")
        .to_request();
    let body: Value = actix_test::call_and_read_body_json(&app, request).await;
    assert_eq!(body, serde_json::json!({}));
}

#[rstest]
#[case("/api/v1/locations?x=0&y=0&z=0")]
#[case("/api/v1/locations?x=0&y=0&map_type=roi")]
#[case("/api/v1/locations?x=0&y=0&z=0&map_type=atlas")]
#[case("/api/v1/locations?x=left&y=0&z=0&map_type=roi")]
#[actix_web::test]
async fn malformed_location_queries_are_invalid(#[case] uri: &str) {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::get().uri(uri).to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_request");
}

#[rstest]
#[actix_web::test]
async fn ingesting_the_same_content_twice_is_skipped() {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;
    let uri = "/api/v1/files?filename=lesion.nii.gz&category=roi&subject_id=9";

    let first = actix_test::call_service(
        &app,
        actix_test::TestRequest::post()
            .uri(uri)
            .set_payload(image_body([3.0, 0.0]))
            .to_request(),
    )
    .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let stored: Value = actix_test::read_body_json(first).await;
    assert_eq!(stored["outcome"], "stored");
    assert_eq!(stored["file"]["indexStatus"], "pending");

    let second = actix_test::call_service(
        &app,
        actix_test::TestRequest::post()
            .uri(uri)
            .set_payload(image_body([3.0, 0.0]))
            .to_request(),
    )
    .await;
    assert_eq!(second.status(), StatusCode::OK);
    let skipped: Value = actix_test::read_body_json(second).await;
    assert_eq!(skipped["outcome"], "duplicate_skipped");
    assert_eq!(skipped["file"]["id"], stored["file"]["id"]);
}

#[rstest]
#[case("/api/v1/files?category=roi&subject_id=9")]
#[case("/api/v1/files?filename=lesion.nii.gz&subject_id=9")]
#[case("/api/v1/files?filename=lesion.nii.gz&category=roi")]
#[case("/api/v1/files?filename=map.nii.gz&category=group_level_map&taxon=A")]
#[case("/api/v1/files?filename=lesion.nii.gz&category=atlas&subject_id=9")]
#[actix_web::test]
async fn uploads_missing_required_tags_are_invalid(#[case] uri: &str) {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::post()
        .uri(uri)
        .set_payload(image_body([3.0, 0.0]))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_request");
}

#[rstest]
#[actix_web::test]
async fn reindexing_an_unknown_file_is_not_found() {
    let corpus = seeded_corpus().await;
    let app = init_app(&corpus).await;

    let request = actix_test::TestRequest::post()
        .uri("/api/v1/files/9999/reindex")
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "not_found");
}
