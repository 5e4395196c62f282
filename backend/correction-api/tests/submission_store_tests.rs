use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use prologin_correction::{
    config::ScoringConfig,
    models::{CorrectionReport, CorrectionResult, Language, ScoreState, SubmissionCode},
    services::{
        scorer::apply_result,
        submission_store::{InMemorySubmissionStore, RecordOutcome, SubmissionStore},
    },
};

async fn attempts(store: &InMemorySubmissionStore, problem: &str, count: usize) -> Vec<String> {
    let submission = store
        .find_or_create_submission("u1", "qcm2015", problem)
        .await
        .unwrap();
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let attempt = SubmissionCode::new(&submission.id, Language::C, "source");
        store.insert_attempt(&attempt).await.unwrap();
        ids.push(attempt.id);
    }
    ids
}

/// Records every `(attempt, score)` pair from its own task.
async fn record_concurrently(
    store: &Arc<InMemorySubmissionStore>,
    scored: Vec<(String, i64)>,
    difficulty: u32,
) -> Vec<RecordOutcome> {
    let tasks = scored.into_iter().map(|(attempt_id, score)| {
        let store = store.clone();
        tokio::spawn(async move {
            let report = CorrectionReport {
                endpoint: "http://vm1.test/run".to_string(),
                result: CorrectionResult::default(),
                verdicts: Vec::new(),
            };
            let scoring = ScoringConfig::default();
            let fold =
                move |state: ScoreState| apply_result(state, score, difficulty, &scoring);
            store
                .record_correction(&attempt_id, score, &report, Utc::now(), &fold)
                .await
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_each_add_malus_once() {
    let store = Arc::new(InMemorySubmissionStore::new());
    let ids = attempts(&store, "cube", 10).await;

    let outcomes = record_concurrently(
        &store,
        ids.iter().map(|id| (id.clone(), 0)).collect(),
        3,
    )
    .await;

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, RecordOutcome::Applied { .. })));
    assert_eq!(store.correction_writes().await, 10);
    let attempt = store.attempt(&ids[0]).await.unwrap();
    let submission = store.submission(&attempt.submission_id).await.unwrap();
    // 10 folds of 4^2, below the 4^4 cap
    assert_eq!(submission.malus, 160);
    assert_eq!(submission.score_base, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_success_is_never_lost() {
    let store = Arc::new(InMemorySubmissionStore::new());
    let ids = attempts(&store, "square", 6).await;

    let scored = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), if i == 3 { 256 } else { 0 }))
        .collect();
    record_concurrently(&store, scored, 2).await;

    let attempt = store.attempt(&ids[0]).await.unwrap();
    let submission = store.submission(&attempt.submission_id).await.unwrap();
    assert_eq!(submission.score_base, 256);
    // only failures folded before the success count, 4 each
    assert!(submission.malus <= 20);
    assert_eq!(submission.malus % 4, 0);
    for id in &ids {
        assert!(store.attempt(id).await.unwrap().done());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_attempt_recorded_twice_concurrently_writes_once() {
    let store = Arc::new(InMemorySubmissionStore::new());
    let ids = attempts(&store, "echo", 1).await;

    let outcomes = record_concurrently(
        &store,
        vec![(ids[0].clone(), 0), (ids[0].clone(), 0)],
        1,
    )
    .await;

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, RecordOutcome::Applied { .. }))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(store.correction_writes().await, 1);
    let submission = store
        .submission(&store.attempt(&ids[0]).await.unwrap().submission_id)
        .await
        .unwrap();
    assert_eq!(submission.malus, 1);
}
