//! Analysis task lifecycle against a fully wired in-memory corpus.

use std::time::Duration;

use lesion_bank::domain::analysis_orchestrator::INTERRUPTED_TASK_ERROR;
use lesion_bank::domain::decode::EMPTY_CORPUS_ERROR;
use lesion_bank::domain::{TaskId, TaskKind, TaskOutcome, TaskState, TaxonomyLevel, VisibilityScope};
use lesion_bank::test_support::fixtures::toy_volume;
use lesion_bank::test_support::{InMemoryCorpus, poll_until_terminal};
use rstest::rstest;
use serde_json::Value;

const WAIT: Duration = Duration::from_secs(5);

async fn three_subject_corpus() -> InMemoryCorpus {
    let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);
    corpus.catalog.add_symptom("A", Some("Language"), "Cognition", false);
    corpus.catalog.add_symptom("B", None, "Motor", false);
    corpus.add_connectivity_subject(1, [1.0, 2.0], "A").await;
    corpus.add_connectivity_subject(2, [2.0, 1.0], "B").await;
    corpus.add_connectivity_subject(3, [3.0, 1.0], "A").await;
    corpus
}

async fn decode_to_completion(
    corpus: &InMemoryCorpus,
    level: TaxonomyLevel,
    scope: VisibilityScope,
) -> (TaskId, Value) {
    let task_id = corpus
        .orchestrator
        .submit_decode(&toy_volume([1.0, 2.0]), level, scope)
        .await
        .expect("submitted");
    let seen = poll_until_terminal(&corpus.orchestrator, task_id, WAIT).await;
    assert_eq!(seen.last().map(|status| status.state), Some(TaskState::Success));
    let TaskOutcome::Success { result } = corpus
        .orchestrator
        .result(task_id)
        .await
        .expect("result")
    else {
        panic!("expected a successful outcome");
    };
    (task_id, result)
}

fn taxon_names(result: &Value) -> Vec<String> {
    result["per_taxon_stats"]
        .as_array()
        .expect("stats array")
        .iter()
        .map(|entry| entry["taxonomy_item"].as_str().unwrap_or_default().to_owned())
        .collect()
}

#[rstest]
#[tokio::test]
async fn decode_reports_one_sample_statistics_per_taxon() {
    let corpus = three_subject_corpus().await;

    let (_, result) =
        decode_to_completion(&corpus, TaxonomyLevel::Symptom, VisibilityScope::Public).await;

    assert_eq!(taxon_names(&result), vec!["A", "B"]);
    let a = &result["per_taxon_stats"][0];
    assert_eq!(a["n_subjects"], 2);
    let mean = a["mean_correlation"].as_f64().expect("mean");
    assert!(mean.abs() < 1e-9, "r = 1 and r = -1 average to zero");
    let std = a["std_correlation"].as_f64().expect("sample std");
    assert!((std - 2_f64.sqrt()).abs() < 1e-9);
    assert!(a["t_statistic"].as_f64().expect("t").abs() < 1e-9);
    assert_eq!(a["max_correlation"], 1.0);
    assert_eq!(a["min_correlation"], -1.0);

    let b = &result["per_taxon_stats"][1];
    assert_eq!(b["n_subjects"], 1);
    assert!(b["std_correlation"].is_null());
    assert!(b["t_statistic"].is_null());
    assert_eq!(
        result["per_subject_raw"].as_array().map(Vec::len),
        Some(3)
    );
}

#[rstest]
#[tokio::test]
async fn internal_subjects_only_count_in_internal_scope() {
    let corpus = three_subject_corpus().await;
    corpus.catalog.add_subject(2, true);

    let (_, public) =
        decode_to_completion(&corpus, TaxonomyLevel::Symptom, VisibilityScope::Public).await;
    let (_, internal) =
        decode_to_completion(&corpus, TaxonomyLevel::Symptom, VisibilityScope::Internal).await;

    assert_eq!(taxon_names(&public), vec!["A"]);
    assert_eq!(taxon_names(&internal), vec!["A", "B"]);
}

#[rstest]
#[tokio::test]
async fn internal_symptoms_still_count_towards_public_domains() {
    let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);
    corpus.catalog.add_symptom("Hidden", None, "Cognition", true);
    corpus.add_connectivity_subject(4, [1.0, 2.0], "Hidden").await;

    let (_, symptoms) =
        decode_to_completion(&corpus, TaxonomyLevel::Symptom, VisibilityScope::Public).await;
    let (_, domains) =
        decode_to_completion(&corpus, TaxonomyLevel::Domain, VisibilityScope::Public).await;

    assert_eq!(
        symptoms["error"],
        "No columns found for taxonomy level: symptom"
    );
    assert_eq!(taxon_names(&domains), vec!["Cognition"]);
}

#[rstest]
#[tokio::test]
async fn an_empty_corpus_completes_with_a_structured_error() {
    let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);

    let (task_id, result) =
        decode_to_completion(&corpus, TaxonomyLevel::Domain, VisibilityScope::Public).await;

    assert_eq!(result["error"], EMPTY_CORPUS_ERROR);
    let status = corpus.orchestrator.status(task_id).await.expect("status");
    assert_eq!(status.progress_percent, 100);
}

#[rstest]
#[tokio::test]
async fn stored_progress_never_decreases() {
    let corpus = three_subject_corpus().await;

    let task_id = corpus
        .orchestrator
        .submit_full_analysis(
            toy_volume([1.0, 0.0]),
            TaxonomyLevel::Domain,
            VisibilityScope::Public,
        )
        .await
        .expect("submitted");
    let seen = poll_until_terminal(&corpus.orchestrator, task_id, WAIT).await;

    assert_eq!(seen.last().map(|status| status.state), Some(TaskState::Success));
    let history = corpus.tasks.progress_history(task_id);
    assert!(
        history.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress went backwards: {history:?}"
    );
    assert_eq!(history.last(), Some(&100));
}

#[rstest]
#[tokio::test]
async fn recovery_fails_only_unfinished_tasks() {
    let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);
    let pending = TaskId::random();
    let running = TaskId::random();
    let finished = TaskId::random();
    corpus
        .tasks
        .seed(pending, TaskKind::Decode, TaskState::Pending, 0);
    corpus
        .tasks
        .seed(running, TaskKind::FullAnalysis, TaskState::Progress, 60);
    corpus
        .tasks
        .seed(finished, TaskKind::Decode, TaskState::Success, 100);

    let recovered = corpus
        .orchestrator
        .recover_interrupted()
        .await
        .expect("recovery");

    assert_eq!(recovered, 2);
    let interrupted = corpus.orchestrator.status(running).await.expect("status");
    assert_eq!(interrupted.state, TaskState::Failure);
    assert_eq!(interrupted.progress_percent, 60);
    assert_eq!(
        corpus.orchestrator.result(pending).await.expect("result"),
        TaskOutcome::Failure {
            error: INTERRUPTED_TASK_ERROR.to_owned()
        }
    );
    let untouched = corpus.orchestrator.status(finished).await.expect("status");
    assert_eq!(untouched.state, TaskState::Success);
}
