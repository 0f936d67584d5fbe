//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use sqlx::SqlitePool;
use uuid::Uuid;

use uag_common::config::PredictionTuning;
use uag_pe::db;
use uag_pe::models::{SchoolType, StudentProfile};
use uag_pe::services::scoring_client::{
    CategoryScoringRequest, RawAdmissionMatch, RawAdmissionScore, RawCategoryScore,
    RawScenarioScore, ScenarioScoringRequest, ScoringBackend, TranscriptScoringRequest,
};
use uag_pe::services::ScoringError;

/// Tuning with millisecond retry delays so failure tests stay fast.
pub fn fast_tuning() -> PredictionTuning {
    PredictionTuning {
        max_retries: 1,
        base_retry_delay_ms: 1,
        retry_sweep_delay_ms: 1,
        ..Default::default()
    }
}

/// Scripted scoring backend.
///
/// A `*_fail` flag makes every call of that stage time out (a retryable
/// failure, so the batch caller exhausts its retries). `l3_codes` is the
/// set of admission codes every L3 scenario reports.
#[derive(Default)]
pub struct FakeBackend {
    pub l1_fail: bool,
    pub l2_fail: bool,
    pub l3_fail: bool,
    pub l3_codes: Vec<String>,
    pub l1_calls: AtomicUsize,
    pub l2_calls: AtomicUsize,
    pub l3_calls: AtomicUsize,
}

impl ScoringBackend for FakeBackend {
    fn score_l1(
        &self,
        batch: Vec<CategoryScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawCategoryScore>, ScoringError>> + Send {
        self.l1_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.l1_fail {
            Err(ScoringError::Timeout)
        } else {
            Ok(batch
                .iter()
                .map(|req| RawCategoryScore {
                    priority_category: match req.school_type {
                        SchoolType::Public => "public".to_string(),
                        SchoolType::Private => "private".to_string(),
                    },
                    admission_scores: BTreeMap::from([(
                        format!("UNI-{}", req.major_group),
                        24.0,
                    )]),
                })
                .collect())
        };
        async move { result }
    }

    fn score_l2(
        &self,
        batch: Vec<ScenarioScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawAdmissionScore>, ScoringError>> + Send {
        self.l2_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.l2_fail {
            Err(ScoringError::Timeout)
        } else {
            Ok(batch
                .iter()
                .map(|req| RawAdmissionScore {
                    admission_code: format!("ADM-{}", req.scenario_code),
                    score: 25.0,
                })
                .collect())
        };
        async move { result }
    }

    fn score_l3(
        &self,
        batch: Vec<TranscriptScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawScenarioScore>, ScoringError>> + Send {
        self.l3_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.l3_fail {
            Err(ScoringError::Timeout)
        } else {
            let codes = self.l3_codes.clone();
            Ok(batch
                .iter()
                .map(|req| RawScenarioScore {
                    scenario_code: req.scenario_code.clone(),
                    matches: codes
                        .iter()
                        .map(|code| RawAdmissionMatch {
                            admission_code: code.clone(),
                            score: 23.5,
                        })
                        .collect(),
                })
                .collect())
        };
        async move { result }
    }
}

/// Seed a student (optionally owned by a user) with a profile that covers
/// the A00 exam block.
pub async fn seed_student(pool: &SqlitePool, user: Option<(Uuid, &str)>) -> StudentProfile {
    let user_id = match user {
        Some((id, email)) => {
            db::students::save_user(pool, id, email).await.unwrap();
            Some(id)
        }
        None => None,
    };

    let profile = StudentProfile {
        student_id: Uuid::new_v4(),
        user_id,
        province_code: Some("79".to_string()),
        major_groups: vec!["cs".to_string()],
        national_exam_scores: BTreeMap::from([
            ("math".to_string(), 8.5),
            ("physics".to_string(), 7.75),
            ("chemistry".to_string(), 8.0),
        ]),
        ..Default::default()
    };
    db::students::save_profile(pool, &profile).await.unwrap();
    profile
}

/// Seed one OCR extraction covering the A00 block for the student.
pub async fn seed_transcript(pool: &SqlitePool, student_id: Uuid) -> Uuid {
    let extraction_id = Uuid::new_v4();
    let grades = BTreeMap::from([
        ("math".to_string(), 8.0),
        ("physics".to_string(), 7.5),
        ("chemistry".to_string(), 8.2),
    ]);
    db::ocr::save_extraction(pool, extraction_id, student_id, &grades)
        .await
        .unwrap();
    extraction_id
}
