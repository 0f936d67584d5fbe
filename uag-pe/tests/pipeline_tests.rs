//! End-to-end pipeline tests
//!
//! Drive the orchestrator with domain events over an in-memory database
//! and a scripted scoring backend, then assert on the persisted aggregate
//! and linkage rows.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use common::{fast_tuning, seed_student, seed_transcript, FakeBackend};
use uag_common::db::init_memory_database;
use uag_common::events::{
    EventEnvelope, OcrCompleted, StudentCreated, TOPIC_OCR_COMPLETED, TOPIC_STUDENT_CREATED,
};
use uag_pe::db;
use uag_pe::models::{PredictionStage, PredictionStatus, ANONYMOUS_ACTOR};
use uag_pe::services::PredictionOrchestrator;

fn orchestrator(
    pool: &sqlx::SqlitePool,
    backend: FakeBackend,
) -> PredictionOrchestrator<FakeBackend> {
    PredictionOrchestrator::new(pool.clone(), Arc::new(backend), &fast_tuning())
}

#[tokio::test]
async fn profile_event_completes_with_both_stages() {
    let pool = init_memory_database().await.unwrap();
    let user_id = Uuid::new_v4();
    let profile = seed_student(&pool, Some((user_id, "student@uag.example"))).await;

    let orch = orchestrator(&pool, FakeBackend::default());
    orch.handle_student_created(StudentCreated {
        student_id: profile.student_id,
        user_id: Some(user_id),
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .expect("aggregate must exist");

    assert_eq!(aggregate.status, PredictionStatus::Completed);
    assert!(aggregate.stage_present(PredictionStage::L1));
    assert!(aggregate.stage_present(PredictionStage::L2));
    assert!(!aggregate.stage_present(PredictionStage::L3));
    assert!(!aggregate.stage_settled(PredictionStage::L3));
    assert_eq!(aggregate.created_by, "student@uag.example");
}

#[tokio::test]
async fn guest_profile_is_recorded_as_anonymous() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let orch = orchestrator(&pool, FakeBackend::default());
    orch.handle_student_created(StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.created_by, ANONYMOUS_ACTOR);
    assert!(aggregate.user_id.is_none());
}

#[tokio::test]
async fn profile_event_degrades_to_partial_when_l2_times_out() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let backend = FakeBackend {
        l2_fail: true,
        ..Default::default()
    };
    let orch = orchestrator(&pool, backend);
    orch.handle_student_created(StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(aggregate.status, PredictionStatus::Partial);
    assert!(aggregate.stage_present(PredictionStage::L1));
    assert!(!aggregate.stage_present(PredictionStage::L2));
    // L2 settled (and failed); that is what makes the aggregate PARTIAL
    // instead of COMPLETED.
    assert!(aggregate.stage_settled(PredictionStage::L2));
}

#[tokio::test]
async fn profile_event_fails_when_every_stage_times_out() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let backend = FakeBackend {
        l1_fail: true,
        l2_fail: true,
        ..Default::default()
    };
    let orch = orchestrator(&pool, backend);
    orch.handle_student_created(StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.status, PredictionStatus::Failed);
}

#[tokio::test]
async fn ocr_event_without_prior_prediction_is_a_no_op() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;
    let extraction_id = seed_transcript(&pool, profile.student_id).await;

    let orch = orchestrator(&pool, FakeBackend::default());
    // No StudentCreated ran, so no aggregate exists yet.
    orch.handle_ocr_completed(OcrCompleted {
        student_id: profile.student_id,
        ocr_extraction_ids: vec![extraction_id],
        user_id: None,
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap();
    assert!(aggregate.is_none(), "no aggregate may be created");
}

#[tokio::test]
async fn ocr_event_links_only_new_valid_admissions() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;
    let extraction_id = seed_transcript(&pool, profile.student_id).await;

    let new_admission = Uuid::new_v4();
    let linked_admission = Uuid::new_v4();
    db::admissions::save_admission(&pool, new_admission, "ADM-NEW", "CS at HCMUT")
        .await
        .unwrap();
    db::admissions::save_admission(&pool, linked_admission, "ADM-LINKED", "CS at HUST")
        .await
        .unwrap();
    db::admissions::insert_link(&pool, profile.student_id, linked_admission)
        .await
        .unwrap();

    let backend = FakeBackend {
        // One already linked, one unknown, one new and valid.
        l3_codes: vec![
            "ADM-LINKED".to_string(),
            "ADM-GHOST".to_string(),
            "ADM-NEW".to_string(),
        ],
        ..Default::default()
    };
    let orch = orchestrator(&pool, backend);

    orch.handle_student_created(StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    })
    .await;
    orch.handle_ocr_completed(OcrCompleted {
        student_id: profile.student_id,
        ocr_extraction_ids: vec![extraction_id],
        user_id: None,
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.status, PredictionStatus::Completed);
    assert!(aggregate.stage_present(PredictionStage::L3));

    let linked = db::admissions::linked_admission_ids(&pool, profile.student_id)
        .await
        .unwrap();
    // Exactly one new row; the unknown code was skipped.
    assert_eq!(linked.len(), 2);
    assert!(linked.contains(&new_admission));
    assert!(linked.contains(&linked_admission));
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;
    let extraction_id = seed_transcript(&pool, profile.student_id).await;

    let admission = Uuid::new_v4();
    db::admissions::save_admission(&pool, admission, "ADM-NEW", "CS at HCMUT")
        .await
        .unwrap();

    let backend = FakeBackend {
        l3_codes: vec!["ADM-NEW".to_string()],
        ..Default::default()
    };
    let orch = orchestrator(&pool, backend);

    orch.handle_student_created(StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    })
    .await;

    let event = OcrCompleted {
        student_id: profile.student_id,
        ocr_extraction_ids: vec![extraction_id],
        user_id: None,
    };
    orch.handle_ocr_completed(event.clone()).await;
    orch.handle_ocr_completed(event).await;

    let linked = db::admissions::linked_admission_ids(&pool, profile.student_id)
        .await
        .unwrap();
    assert_eq!(linked.len(), 1, "second run must not duplicate links");
}

#[tokio::test]
async fn terminal_states_are_reenterable() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    // First run: L2 dead, aggregate lands PARTIAL.
    let degraded = orchestrator(
        &pool,
        FakeBackend {
            l2_fail: true,
            ..Default::default()
        },
    );
    let event = StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    };
    degraded.handle_student_created(event.clone()).await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.status, PredictionStatus::Partial);

    // Second run with a healthy backend recomputes to COMPLETED.
    let healthy = orchestrator(&pool, FakeBackend::default());
    healthy.handle_student_created(event).await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.status, PredictionStatus::Completed);
    assert!(aggregate.stage_present(PredictionStage::L2));
}

#[tokio::test]
async fn profile_event_for_unknown_student_is_a_no_op() {
    let pool = init_memory_database().await.unwrap();

    let orch = orchestrator(&pool, FakeBackend::default());
    let ghost = Uuid::new_v4();
    orch.handle_student_created(StudentCreated {
        student_id: ghost,
        user_id: None,
    })
    .await;

    let aggregate = db::prediction_results::load(&pool, ghost).await.unwrap();
    assert!(aggregate.is_none());
}

#[tokio::test]
async fn malformed_payloads_are_dropped() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let orch = orchestrator(&pool, FakeBackend::default());
    orch.dispatch(EventEnvelope::new(
        TOPIC_STUDENT_CREATED,
        serde_json::json!({ "student": "not-a-uuid" }),
    ))
    .await;
    orch.dispatch(EventEnvelope::new(
        TOPIC_OCR_COMPLETED,
        serde_json::json!({ "student_id": profile.student_id }),
    ))
    .await;
    orch.dispatch(EventEnvelope::new(
        "file.uploaded",
        serde_json::json!({ "student_id": profile.student_id }),
    ))
    .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap();
    assert!(aggregate.is_none(), "no payload may reach the pipeline");
}

#[tokio::test]
async fn dispatch_routes_valid_envelopes() {
    let pool = init_memory_database().await.unwrap();
    let profile = seed_student(&pool, None).await;

    let orch = orchestrator(&pool, FakeBackend::default());
    let event = StudentCreated {
        student_id: profile.student_id,
        user_id: None,
    };
    orch.dispatch(EventEnvelope::from_payload(TOPIC_STUDENT_CREATED, &event).unwrap())
        .await;

    let aggregate = db::prediction_results::load(&pool, profile.student_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aggregate.status, PredictionStatus::Completed);
}
