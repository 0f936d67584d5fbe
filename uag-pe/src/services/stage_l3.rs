//! L3 prediction stage: transcript-based admission extraction
//!
//! Runs after an OCR batch has produced transcript grades. Builds one
//! richer feature request per exam block the transcript covers (priority
//! object/region and certificates included), scores them, and returns the
//! matches grouped by scenario key. The admission codes in the output feed
//! the linkage reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::batching::{
    plan_batch, run_chunked, BatchConstraints, ConcurrencyLimits, ProcessingComplexity, RetryPolicy,
};
use crate::models::{AdmissionMatch, PredictionStage, ScenarioPrediction, StudentProfile};
use crate::services::scoring_client::{RawScenarioScore, ScoringBackend, TranscriptScoringRequest};
use crate::services::stage_l2::EXAM_BLOCKS;
use crate::services::StageError;
use uag_common::config::PredictionTuning;

pub struct TranscriptService<B> {
    backend: Arc<B>,
    constraints: BatchConstraints,
    limits: ConcurrencyLimits,
    retry: RetryPolicy,
}

impl<B: ScoringBackend> TranscriptService<B> {
    pub fn new(backend: Arc<B>, tuning: &PredictionTuning) -> Self {
        Self {
            backend,
            constraints: BatchConstraints {
                max_chunk_size: tuning.l3_max_chunk_size,
                memory_limit_mb: tuning.memory_limit_mb,
                network_latency_ms: tuning.network_latency_ms,
                complexity: ProcessingComplexity::High,
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

    /// Score the transcript-derived scenarios for the profile.
    ///
    /// Idempotent; never mutates the aggregate.
    pub async fn predict(
        &self,
        profile: &StudentProfile,
        transcript: &BTreeMap<String, f64>,
    ) -> Result<Vec<ScenarioPrediction>, StageError> {
        let requests = expand_requests(profile, transcript);
        if requests.is_empty() {
            tracing::debug!(student_id = %profile.student_id, "No transcript scenarios to score");
            return Ok(Vec::new());
        }

        let plan = plan_batch(requests.len(), &self.constraints, &self.limits);
        tracing::debug!(
            student_id = %profile.student_id,
            scenarios = requests.len(),
            chunk_size = plan.chunk_size,
            concurrency = plan.concurrency,
            constraint = ?plan.binding_constraint,
            "Scoring transcript scenarios"
        );

        let backend = &self.backend;
        let outcome = run_chunked(requests, &plan, &self.retry, |chunk| backend.score_l3(chunk)).await;

        if outcome.failed_chunks == outcome.dispatched_chunks {
            return Err(StageError::NoResults {
                stage: PredictionStage::L3,
                chunks: outcome.dispatched_chunks,
            });
        }

        Ok(group_by_scenario(outcome.items))
    }
}

/// One request per exam block the transcript fully covers.
pub(crate) fn expand_requests(
    profile: &StudentProfile,
    transcript: &BTreeMap<String, f64>,
) -> Vec<TranscriptScoringRequest> {
    if transcript.is_empty() {
        return Vec::new();
    }

    let mut requests = Vec::new();
    for (block, subjects) in EXAM_BLOCKS {
        let mut averages = BTreeMap::new();
        let complete = subjects.iter().all(|subject| match transcript.get(*subject) {
            Some(grade) => {
                averages.insert((*subject).to_string(), *grade);
                true
            }
            None => false,
        });
        if complete {
            requests.push(TranscriptScoringRequest {
                student_id: profile.student_id,
                scenario_code: (*block).to_string(),
                transcript_averages: averages,
                priority_object: profile.priority_object.clone(),
                priority_region: profile.priority_region.clone(),
                certificates: profile.certificates.clone(),
            });
        }
    }
    requests
}

/// Merge raw results by scenario key. The service may split one scenario's
/// matches across chunks; appending keeps them all.
pub(crate) fn group_by_scenario(raw: Vec<RawScenarioScore>) -> Vec<ScenarioPrediction> {
    let mut grouped: BTreeMap<String, Vec<AdmissionMatch>> = BTreeMap::new();

    for item in raw {
        let bucket = grouped.entry(item.scenario_code).or_default();
        bucket.extend(item.matches.into_iter().map(|m| AdmissionMatch {
            admission_code: m.admission_code,
            score: m.score,
        }));
    }

    grouped
        .into_iter()
        .map(|(scenario_code, matches)| ScenarioPrediction {
            scenario_code,
            matches,
        })
        .collect()
}
