//! End-to-end corpus behaviour on the in-memory adapters: atlas
//! registration, content-addressed ingestion, post-commit reduction, and
//! coordinate lookups.

use lesion_bank::domain::ingestion::{IngestOutcome, IngestRequest};
use lesion_bank::domain::parcellation::RegistrationOutcome;
use lesion_bank::domain::{ErrorCode, FileCategory, FileDescriptor, IndexStatus};
use lesion_bank::test_support::InMemoryCorpus;
use lesion_bank::test_support::JsonVolumeCodec;
use lesion_bank::test_support::fixtures::{toy_atlas_definition, toy_volume};
use rstest::{fixture, rstest};

#[fixture]
fn corpus() -> InMemoryCorpus {
    InMemoryCorpus::new(vec![1.0, 2.0])
}

fn roi_upload(subject_id: i64, values: [f32; 2]) -> IngestRequest {
    IngestRequest {
        bytes: JsonVolumeCodec::payload(&toy_volume(values)),
        filename: "lesion.nii.gz".to_owned(),
        descriptor: FileDescriptor::Roi { subject_id },
        override_existing: false,
    }
}

async fn register_toy_atlas(corpus: &InMemoryCorpus, content_hash: &str, override_existing: bool) -> RegistrationOutcome {
    corpus
        .registry
        .register(toy_atlas_definition(content_hash), override_existing)
        .await
        .expect("atlas registration")
}

#[rstest]
#[tokio::test]
async fn reduced_rows_skip_zero_parcels_and_answer_point_queries(corpus: InMemoryCorpus) {
    register_toy_atlas(&corpus, "toy-v1", false).await;
    let outcome = corpus
        .ingestion
        .ingest(roi_upload(7, [5.0, 0.0]))
        .await
        .expect("ingest");
    assert!(matches!(outcome, IngestOutcome::Stored(_)));

    let reductions = corpus.run_reductions().await;
    assert_eq!(reductions.len(), 1);
    let reduced = reductions
        .into_iter()
        .next()
        .expect("one job")
        .expect("reduction succeeds")
        .expect("volumetric file is reduced");
    assert_eq!(reduced.parcel_rows, 1);
    assert_eq!(corpus.catalog.parcelwise_values(reduced.artifact.id), vec![(1, 5.0)]);
    let source = corpus
        .catalog
        .file(outcome.record().id)
        .expect("source file kept");
    assert_eq!(source.index_status, IndexStatus::Indexed);

    let at_a = corpus
        .point_query
        .values_at(0, 0, 0, FileCategory::Roi)
        .await
        .expect("lookup");
    assert_eq!(at_a.get(&7), Some(&5.0));
    let at_b = corpus
        .point_query
        .values_at(2, 0, 0, FileCategory::Roi)
        .await
        .expect("lookup");
    assert!(at_b.is_empty());
}

#[rstest]
#[tokio::test]
async fn identical_uploads_are_stored_once(corpus: InMemoryCorpus) {
    let first = corpus
        .ingestion
        .ingest(roi_upload(3, [1.0, 1.0]))
        .await
        .expect("first ingest");
    let second = corpus
        .ingestion
        .ingest(roi_upload(3, [1.0, 1.0]))
        .await
        .expect("second ingest");

    assert!(matches!(second, IngestOutcome::DuplicateSkipped(_)));
    assert_eq!(second.record().id, first.record().id);
    assert_eq!(corpus.catalog.files().len(), 1);
    assert_eq!(corpus.queue.drain().len(), 1);
}

#[rstest]
#[tokio::test]
async fn failed_reductions_keep_the_file_and_can_be_reindexed(corpus: InMemoryCorpus) {
    let stored = corpus
        .ingestion
        .ingest(roi_upload(4, [2.0, 6.0]))
        .await
        .expect("ingest");
    let file_id = stored.record().id;

    let first_pass = corpus.run_reductions().await;
    assert!(first_pass.iter().all(Result::is_err), "no atlas registered yet");
    let failed = corpus.catalog.file(file_id).expect("file kept after failure");
    assert_eq!(failed.index_status, IndexStatus::Failed);
    assert!(failed.index_error.is_some());

    register_toy_atlas(&corpus, "toy-v1", false).await;
    let pending = corpus.ingestion.reindex(file_id).await.expect("reindex");
    assert_eq!(pending.id, file_id);
    for outcome in corpus.run_reductions().await {
        outcome.expect("reduction succeeds after registration");
    }

    let indexed = corpus.catalog.file(file_id).expect("file");
    assert_eq!(indexed.index_status, IndexStatus::Indexed);
    assert_eq!(indexed.index_error, None);
    let at_b = corpus
        .point_query
        .values_at(2, 0, 0, FileCategory::Roi)
        .await
        .expect("lookup");
    assert_eq!(at_b.get(&4), Some(&6.0));
}

#[rstest]
#[tokio::test]
async fn reductions_lost_with_the_queue_are_resumed(corpus: InMemoryCorpus) {
    register_toy_atlas(&corpus, "toy-v1", false).await;
    let stored = corpus
        .ingestion
        .ingest(roi_upload(5, [3.0, 0.0]))
        .await
        .expect("ingest");
    let file_id = stored.record().id;
    // Jobs held in memory vanish when the process stops.
    assert_eq!(corpus.queue.drain().len(), 1);
    let pending = corpus.catalog.file(file_id).expect("file kept");
    assert_eq!(pending.index_status, IndexStatus::Pending);

    let recovery = corpus
        .ingestion
        .resume_pending_reductions()
        .await
        .expect("recovery");
    assert_eq!(recovery.requeued, 1);
    for outcome in corpus.run_reductions().await {
        outcome.expect("resumed reduction succeeds");
    }

    let indexed = corpus.catalog.file(file_id).expect("file");
    assert_eq!(indexed.index_status, IndexStatus::Indexed);
    let again = corpus
        .ingestion
        .resume_pending_reductions()
        .await
        .expect("second recovery");
    assert_eq!(again.requeued, 0);
}

#[rstest]
#[tokio::test]
async fn reindexing_an_unknown_file_is_not_found(corpus: InMemoryCorpus) {
    let error = corpus.ingestion.reindex(404).await.expect_err("unknown file");

    assert_eq!(error.code(), ErrorCode::NotFound);
}

#[rstest]
#[tokio::test]
async fn atlas_registration_is_idempotent_and_guards_overrides(corpus: InMemoryCorpus) {
    assert!(matches!(
        register_toy_atlas(&corpus, "toy-v1", false).await,
        RegistrationOutcome::Registered { parcel_count: 2, .. }
    ));
    assert!(matches!(
        register_toy_atlas(&corpus, "toy-v1", false).await,
        RegistrationOutcome::Unchanged(_)
    ));

    let conflict = corpus
        .registry
        .register(toy_atlas_definition("toy-v2"), false)
        .await
        .expect_err("different content without override");
    assert_eq!(conflict.code(), ErrorCode::Conflict);
}

#[rstest]
#[tokio::test]
async fn atlas_overrides_reattach_existing_parcel_values(corpus: InMemoryCorpus) {
    register_toy_atlas(&corpus, "toy-v1", false).await;
    corpus
        .ingestion
        .ingest(roi_upload(9, [4.0, 8.0]))
        .await
        .expect("ingest");
    for outcome in corpus.run_reductions().await {
        outcome.expect("reduction");
    }

    let RegistrationOutcome::Overridden { report, .. } =
        register_toy_atlas(&corpus, "toy-v2", true).await
    else {
        panic!("override expected");
    };

    assert_eq!(report.reattached, 2);
    assert!(report.orphaned.is_empty());
    assert_eq!(report.parcellation.content_hash, "toy-v2");
    let at_a = corpus
        .point_query
        .values_at(0, 0, 0, FileCategory::Roi)
        .await
        .expect("lookup");
    assert_eq!(at_a.get(&9), Some(&4.0));
}
