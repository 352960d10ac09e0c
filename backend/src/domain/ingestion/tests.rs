//! Unit tests for content-addressed ingestion.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mockall::predicate::{always, eq};
use rstest::{fixture, rstest};

use super::*;
use crate::domain::ErrorCode;
use crate::domain::ports::{
    MockBlobStore, MockDerivedFileRepository, MockReductionQueue, ReductionQueueError,
    ReplacedFile,
};

const BYTES: &[u8] = b"volume-bytes";

fn roi_request(override_existing: bool) -> IngestRequest {
    IngestRequest {
        bytes: BYTES.to_vec(),
        filename: "lesion.nii.gz".to_owned(),
        descriptor: FileDescriptor::Roi { subject_id: 4 },
        override_existing,
    }
}

fn record_from(file: &NewFileRecord, id: i64) -> FileRecord {
    FileRecord {
        id,
        filetype: file.filetype.clone(),
        path: file.path.clone(),
        content_hash: file.content_hash.clone(),
        parcellation_id: file.parcellation_id,
        descriptor: file.descriptor.clone(),
        coordinate_space: file.coordinate_space,
        source_file_id: file.source_file_id,
        index_status: file.index_status,
        index_error: None,
        created_at: Utc
            .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
            .single()
            .expect("valid time"),
    }
}

fn stored_roi(id: i64, path: &str) -> FileRecord {
    record_from(
        &NewFileRecord {
            filetype: FileKind::NiftiGz,
            path: path.to_owned(),
            content_hash: content_hash(BYTES),
            parcellation_id: None,
            descriptor: FileDescriptor::Roi { subject_id: 4 },
            coordinate_space: None,
            source_file_id: None,
            index_status: IndexStatus::Indexed,
        },
        id,
    )
}

struct Ports {
    files: MockDerivedFileRepository,
    blobs: MockBlobStore,
    queue: MockReductionQueue,
}

impl Ports {
    fn service(self) -> IngestionService {
        IngestionService::new(
            Arc::new(self.files),
            Arc::new(self.blobs),
            Arc::new(self.queue),
            IngestionConfig::default(),
        )
    }
}

#[fixture]
fn ports() -> Ports {
    Ports {
        files: MockDerivedFileRepository::new(),
        blobs: MockBlobStore::new(),
        queue: MockReductionQueue::new(),
    }
}

#[rstest]
#[tokio::test]
async fn stores_new_volume_and_schedules_reduction(mut ports: Ports) {
    let expected_hash = content_hash(BYTES);
    ports
        .files
        .expect_find_duplicate()
        .with(eq(expected_hash.clone()), eq(None::<String>))
        .times(1)
        .return_once(|_, _| Ok(None));
    ports
        .files
        .expect_next_sequence()
        .with(eq("subject-4"))
        .return_once(|_| Ok(3));
    ports
        .blobs
        .expect_put()
        .withf(|key, bytes| key == "subjects/sub-4/roi/sub-4_file-3_roi.nii.gz" && bytes == BYTES)
        .times(1)
        .return_once(|_, _| Ok(()));
    ports
        .files
        .expect_insert()
        .withf(move |file| file.content_hash == expected_hash)
        .times(1)
        .returning(|file| Ok(record_from(file, 11)));
    ports
        .queue
        .expect_enqueue()
        .with(eq(ReductionJob { file_id: 11 }))
        .times(1)
        .return_once(|_| Ok(()));

    let outcome = ports.service().ingest(roi_request(false)).await.expect("ingest");

    let record = match outcome {
        IngestOutcome::Stored(record) => record,
        other => panic!("expected a stored record, got {other:?}"),
    };
    assert_eq!(record.content_hash, content_hash(BYTES));
    assert_eq!(record.index_status, IndexStatus::Pending);
}

#[rstest]
#[tokio::test]
async fn identical_bytes_are_skipped(mut ports: Ports) {
    let existing = stored_roi(9, "subjects/sub-4/roi/sub-4_file-1_roi.nii.gz");
    let returned = existing.clone();
    ports
        .files
        .expect_find_duplicate()
        .return_once(move |_, _| Ok(Some(returned)));
    ports.files.expect_insert().never();
    ports.blobs.expect_put().never();
    ports.queue.expect_enqueue().never();

    let outcome = ports.service().ingest(roi_request(false)).await.expect("ingest");

    assert_eq!(outcome, IngestOutcome::DuplicateSkipped(existing));
}

#[rstest]
#[tokio::test]
async fn override_replaces_record_and_removes_old_blobs(mut ports: Ports) {
    let old_path = "subjects/sub-4/roi/sub-4_file-1_roi.nii.gz";
    let existing = stored_roi(9, old_path);
    ports
        .files
        .expect_find_duplicate()
        .return_once(move |_, _| Ok(Some(existing)));
    ports.files.expect_next_sequence().return_once(|_| Ok(5));
    ports.blobs.expect_put().return_once(|_, _| Ok(()));
    ports
        .files
        .expect_replace()
        .with(eq(9), always())
        .times(1)
        .returning(move |_, file| {
            Ok(ReplacedFile {
                record: record_from(file, 12),
                removed_paths: vec![
                    old_path.to_owned(),
                    "subjects/sub-4/roi/sub-4_file-2_roi_parcellation-toy.npy".to_owned(),
                ],
            })
        });
    ports.blobs.expect_delete().times(2).returning(|_| Ok(()));
    ports.queue.expect_enqueue().return_once(|_| Ok(()));

    let outcome = ports.service().ingest(roi_request(true)).await.expect("ingest");

    assert!(matches!(
        outcome,
        IngestOutcome::Replaced {
            replaced_file_id: 9,
            ..
        }
    ));
    assert_eq!(
        outcome.record().path,
        "subjects/sub-4/roi/sub-4_file-5_roi.nii.gz"
    );
}

#[rstest]
#[tokio::test]
async fn group_level_override_keeps_blob_at_shared_path(mut ports: Ports) {
    let path = "group_level_maps/domains/memory/memory_lnm_t.nii.gz";
    let mut existing = stored_roi(30, path);
    existing.descriptor = FileDescriptor::GroupLevelMap {
        level: crate::domain::TaxonomyLevel::Domain,
        taxon: "Memory".to_owned(),
        map_type: "lnm".to_owned(),
        statistic: "t".to_owned(),
    };
    let descriptor = existing.descriptor.clone();
    ports
        .files
        .expect_find_duplicate()
        .with(always(), eq(Some(path.to_owned())))
        .return_once(move |_, _| Ok(Some(existing)));
    ports.files.expect_next_sequence().never();
    ports.blobs.expect_put().return_once(|_, _| Ok(()));
    ports.files.expect_replace().returning(move |_, file| {
        Ok(ReplacedFile {
            record: record_from(file, 31),
            removed_paths: vec![path.to_owned()],
        })
    });
    ports.blobs.expect_delete().never();
    ports.queue.expect_enqueue().return_once(|_| Ok(()));

    let request = IngestRequest {
        bytes: b"new-map".to_vec(),
        filename: "memory.nii.gz".to_owned(),
        descriptor,
        override_existing: true,
    };
    let outcome = ports.service().ingest(request).await.expect("ingest");

    assert_eq!(outcome.record().path, path);
}

#[rstest]
#[tokio::test]
async fn queue_failure_is_recorded_on_the_file(mut ports: Ports) {
    ports.files.expect_find_duplicate().return_once(|_, _| Ok(None));
    ports.files.expect_next_sequence().return_once(|_| Ok(1));
    ports.blobs.expect_put().return_once(|_, _| Ok(()));
    ports
        .files
        .expect_insert()
        .returning(|file| Ok(record_from(file, 7)));
    ports
        .queue
        .expect_enqueue()
        .return_once(|_| Err(ReductionQueueError::unavailable("queue closed")));
    ports
        .files
        .expect_set_index_status()
        .withf(|id, status, error| {
            *id == 7 && *status == IndexStatus::Failed && error.is_some()
        })
        .times(1)
        .return_once(|_, _, _| Ok(()));

    let outcome = ports.service().ingest(roi_request(false)).await.expect("ingest");

    assert_eq!(outcome.record().index_status, IndexStatus::Failed);
    assert!(
        outcome
            .record()
            .index_error
            .as_deref()
            .is_some_and(|message| message.contains("queue closed"))
    );
}

#[rstest]
#[tokio::test]
async fn non_volumetric_files_are_not_scheduled(mut ports: Ports) {
    ports.files.expect_find_duplicate().return_once(|_, _| Ok(None));
    ports.files.expect_next_sequence().return_once(|_| Ok(2));
    ports.blobs.expect_put().return_once(|_, _| Ok(()));
    ports
        .files
        .expect_insert()
        .returning(|file| Ok(record_from(file, 8)));
    ports.queue.expect_enqueue().never();

    let request = IngestRequest {
        filename: "notes.csv".to_owned(),
        ..roi_request(false)
    };
    let outcome = ports.service().ingest(request).await.expect("ingest");

    assert_eq!(outcome.record().index_status, IndexStatus::NotApplicable);
    assert_eq!(outcome.record().path, "subjects/sub-4/roi/sub-4_file-2_roi.csv");
}

#[rstest]
#[tokio::test]
async fn failed_insert_discards_new_blob(mut ports: Ports) {
    ports.files.expect_find_duplicate().return_once(|_, _| Ok(None));
    ports.files.expect_next_sequence().return_once(|_| Ok(1));
    ports.blobs.expect_put().return_once(|_, _| Ok(()));
    ports.files.expect_insert().return_once(|_| {
        Err(crate::domain::ports::DerivedFileRepositoryError::connection(
            "pool exhausted",
        ))
    });
    ports
        .blobs
        .expect_delete()
        .with(eq("subjects/sub-4/roi/sub-4_file-1_roi.nii.gz"))
        .times(1)
        .return_once(|_| Ok(()));

    let error = ports
        .service()
        .ingest(roi_request(false))
        .await
        .expect_err("insert fails");

    assert_eq!(error.code(), ErrorCode::ServiceUnavailable);
}

#[rstest]
#[case("scan.docx", b"x".to_vec())]
#[case("scan.nii.gz", Vec::new())]
#[tokio::test]
async fn invalid_uploads_are_rejected_synchronously(
    mut ports: Ports,
    #[case] filename: &str,
    #[case] bytes: Vec<u8>,
) {
    ports.files.expect_find_duplicate().never();
    let request = IngestRequest {
        bytes,
        filename: filename.to_owned(),
        ..roi_request(false)
    };

    let error = ports.service().ingest(request).await.expect_err("invalid");

    assert_eq!(error.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn oversize_upload_is_rejected(ports: Ports) {
    let service = IngestionService::new(
        Arc::new(ports.files),
        Arc::new(ports.blobs),
        Arc::new(ports.queue),
        IngestionConfig {
            max_upload_bytes: 4,
        },
    );

    let error = service.ingest(roi_request(false)).await.expect_err("too big");

    assert_eq!(error.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn reindex_requeues_failed_file(mut ports: Ports) {
    let mut failed = stored_roi(5, "subjects/sub-4/roi/sub-4_file-1_roi.nii.gz");
    failed.index_status = IndexStatus::Failed;
    failed.index_error = Some("timed out".to_owned());
    ports
        .files
        .expect_find()
        .with(eq(5))
        .return_once(move |_| Ok(Some(failed)));
    ports
        .files
        .expect_set_index_status()
        .with(eq(5), eq(IndexStatus::Pending), eq(None::<String>))
        .times(1)
        .return_once(|_, _, _| Ok(()));
    ports
        .queue
        .expect_enqueue()
        .with(eq(ReductionJob { file_id: 5 }))
        .return_once(|_| Ok(()));

    let record = ports.service().reindex(5).await.expect("reindex");

    assert_eq!(record.index_status, IndexStatus::Pending);
    assert_eq!(record.index_error, None);
}

#[rstest]
#[tokio::test]
async fn reindex_of_unknown_file_is_not_found(mut ports: Ports) {
    ports.files.expect_find().return_once(|_| Ok(None));

    let error = ports.service().reindex(404).await.expect_err("missing");

    assert_eq!(error.code(), ErrorCode::NotFound);
}

#[rstest]
#[tokio::test]
async fn pending_reductions_are_requeued_after_a_restart(mut ports: Ports) {
    ports
        .files
        .expect_pending_reductions()
        .times(1)
        .return_once(|| Ok(vec![7, 9]));
    ports
        .queue
        .expect_enqueue_backlog()
        .with(eq(ReductionJob { file_id: 7 }))
        .times(1)
        .return_once(|_| Ok(()));
    ports
        .queue
        .expect_enqueue_backlog()
        .with(eq(ReductionJob { file_id: 9 }))
        .times(1)
        .return_once(|_| Err(ReductionQueueError::unavailable("consumer stopped")));
    ports
        .files
        .expect_set_index_status()
        .withf(|file_id, status, error| {
            *file_id == 9
                && *status == IndexStatus::Failed
                && error
                    .as_deref()
                    .is_some_and(|message| message.contains("consumer stopped"))
        })
        .times(1)
        .return_once(|_, _, _| Ok(()));
    ports.queue.expect_enqueue().never();

    let recovery = ports
        .service()
        .resume_pending_reductions()
        .await
        .expect("recovery");

    assert_eq!(
        recovery,
        PendingRecovery {
            requeued: 1,
            failed: 1,
        }
    );
}

#[rstest]
#[tokio::test]
async fn nothing_pending_is_a_no_op(mut ports: Ports) {
    ports
        .files
        .expect_pending_reductions()
        .return_once(|| Ok(Vec::new()));
    ports.queue.expect_enqueue_backlog().never();

    let recovery = ports
        .service()
        .resume_pending_reductions()
        .await
        .expect("recovery");

    assert_eq!(recovery, PendingRecovery::default());
}
