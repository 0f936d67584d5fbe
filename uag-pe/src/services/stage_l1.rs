//! L1 prediction stage: priority-category admission scoring
//!
//! Expands one profile into every eligible exam-scenario / category
//! combination (funding type × major group × optional award subject),
//! scores all combinations in one batched call, then folds the raw
//! per-combination score maps into a single list grouped by priority
//! category.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::batching::{
    plan_batch, run_chunked, BatchConstraints, ConcurrencyLimits, ProcessingComplexity, RetryPolicy,
};
use crate::models::{CategoryPrediction, PredictionStage, SchoolType, StudentProfile};
use crate::services::scoring_client::{CategoryScoringRequest, RawCategoryScore, ScoringBackend};
use crate::services::StageError;
use uag_common::config::PredictionTuning;

pub struct CategoryService<B> {
    backend: Arc<B>,
    constraints: BatchConstraints,
    limits: ConcurrencyLimits,
    retry: RetryPolicy,
}

impl<B: ScoringBackend> CategoryService<B> {
    pub fn new(backend: Arc<B>, tuning: &PredictionTuning) -> Self {
        Self {
            backend,
            constraints: BatchConstraints {
                max_chunk_size: tuning.l1_max_chunk_size,
                memory_limit_mb: tuning.memory_limit_mb,
                network_latency_ms: tuning.network_latency_ms,
                complexity: ProcessingComplexity::Low,
                server_concurrency: tuning.server_concurrency,
            },
            limits: ConcurrencyLimits {
                inputs_per_worker: tuning.inputs_per_worker,
                min_concurrency: tuning.min_concurrency,
                max_concurrency: Some(tuning.max_concurrency),
            },
            retry: RetryPolicy {
                max_retries: tuning.max_retries,
                base_delay_ms: tuning.base_retry_delay_ms,
                sweep_delay_ms: tuning.retry_sweep_delay_ms,
            },
        }
    }

    /// Score every combination for the profile and combine the results.
    ///
    /// Idempotent; never mutates the aggregate.
    pub async fn predict(
        &self,
        profile: &StudentProfile,
    ) -> Result<Vec<CategoryPrediction>, StageError> {
        let requests = expand_requests(profile);
        if requests.is_empty() {
            tracing::debug!(student_id = %profile.student_id, "No category combinations to score");
            return Ok(Vec::new());
        }

        let plan = plan_batch(requests.len(), &self.constraints, &self.limits);
        tracing::debug!(
            student_id = %profile.student_id,
            combinations = requests.len(),
            chunk_size = plan.chunk_size,
            concurrency = plan.concurrency,
            constraint = ?plan.binding_constraint,
            "Scoring category combinations"
        );

        let backend = &self.backend;
        let outcome = run_chunked(requests, &plan, &self.retry, |chunk| backend.score_l1(chunk)).await;

        if outcome.failed_chunks == outcome.dispatched_chunks {
            return Err(StageError::NoResults {
                stage: PredictionStage::L1,
                chunks: outcome.dispatched_chunks,
            });
        }
        if outcome.failed_chunks > 0 {
            tracing::warn!(
                student_id = %profile.student_id,
                failed_chunks = outcome.failed_chunks,
                dispatched_chunks = outcome.dispatched_chunks,
                "Some category chunks yielded no results"
            );
        }

        Ok(combine_category_scores(outcome.items))
    }
}

/// Cross product of funding type × major group × (no award ∪ each award
/// subject). A profile without exam scores or major groups has nothing to
/// score.
pub(crate) fn expand_requests(profile: &StudentProfile) -> Vec<CategoryScoringRequest> {
    if profile.national_exam_scores.is_empty() || profile.major_groups.is_empty() {
        return Vec::new();
    }

    let school_types: &[SchoolType] = if profile.school_types.is_empty() {
        &[SchoolType::Public, SchoolType::Private]
    } else {
        &profile.school_types
    };

    let mut requests = Vec::new();
    for school_type in school_types {
        for major_group in &profile.major_groups {
            let award_slots =
                std::iter::once(None).chain(profile.award_subjects.iter().cloned().map(Some));
            for award_subject in award_slots {
                requests.push(CategoryScoringRequest {
                    student_id: profile.student_id,
                    school_type: *school_type,
                    province_code: profile.province_code.clone(),
                    major_group: major_group.clone(),
                    award_subject,
                    exam_scores: profile.national_exam_scores.clone(),
                });
            }
        }
    }
    requests
}

/// Fold raw per-combination results into one list per priority category.
/// When two combinations predict the same admission code within a category,
/// the higher score wins.
pub(crate) fn combine_category_scores(raw: Vec<RawCategoryScore>) -> Vec<CategoryPrediction> {
    let mut grouped: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for item in raw {
        let bucket = grouped.entry(item.priority_category).or_default();
        for (code, score) in item.admission_scores {
            bucket
                .entry(code)
                .and_modify(|current| {
                    if score > *current {
                        *current = score;
                    }
                })
                .or_insert(score);
        }
    }

    grouped
        .into_iter()
        .map(|(priority_category, admission_scores)| CategoryPrediction {
            priority_category,
            admission_scores,
        })
        .collect()
}
