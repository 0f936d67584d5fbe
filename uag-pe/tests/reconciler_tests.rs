//! Linkage reconciler tests

mod common;

use uuid::Uuid;

use common::seed_student;
use uag_common::db::init_memory_database;
use uag_pe::db::admissions;
use uag_pe::models::{AdmissionMatch, ScenarioPrediction};
use uag_pe::services::reconcile_admission_links;

fn predictions(codes: &[&str]) -> Vec<ScenarioPrediction> {
    vec![ScenarioPrediction {
        scenario_code: "A00".to_string(),
        matches: codes
            .iter()
            .map(|code| AdmissionMatch {
                admission_code: (*code).to_string(),
                score: 23.0,
            })
            .collect(),
    }]
}

#[tokio::test]
async fn reconciler_reports_the_delta() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let new_admission = Uuid::new_v4();
    let linked_admission = Uuid::new_v4();
    admissions::save_admission(&pool, new_admission, "ADM-NEW", "CS at HCMUT")
        .await
        .unwrap();
    admissions::save_admission(&pool, linked_admission, "ADM-LINKED", "CS at HUST")
        .await
        .unwrap();
    admissions::insert_link(&pool, profile.student_id, linked_admission)
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let outcome = reconcile_admission_links(
        &mut conn,
        profile.student_id,
        &predictions(&["ADM-NEW", "ADM-LINKED", "ADM-GHOST"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.already_linked, 1);
    assert_eq!(outcome.unknown_codes, vec!["ADM-GHOST".to_string()]);
}

#[tokio::test]
async fn second_pass_inserts_nothing() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let admission = Uuid::new_v4();
    admissions::save_admission(&pool, admission, "ADM-NEW", "CS at HCMUT")
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let first = reconcile_admission_links(&mut conn, profile.student_id, &predictions(&["ADM-NEW"]))
        .await
        .unwrap();
    let second =
        reconcile_admission_links(&mut conn, profile.student_id, &predictions(&["ADM-NEW"]))
            .await
            .unwrap();

    assert_eq!(first.inserted, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_linked, 1);

    // Hand the pooled connection back before querying through the pool.
    drop(conn);
    let linked = admissions::linked_admission_ids(&pool, profile.student_id)
        .await
        .unwrap();
    assert_eq!(linked.len(), 1);
}

#[tokio::test]
async fn empty_predictions_touch_nothing() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let mut conn = pool.acquire().await.unwrap();
    let outcome = reconcile_admission_links(&mut conn, profile.student_id, &[])
        .await
        .unwrap();

    assert_eq!(outcome.inserted, 0);
    assert!(outcome.unknown_codes.is_empty());
}
