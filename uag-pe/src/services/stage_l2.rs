//! L2 prediction stage: exam-scenario admission scoring
//!
//! Derives one scoring request per exam-block scenario the profile can
//! serve (national-exam blocks, VSAT, aptitude), scores them, and returns a
//! flat list of scored admission codes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::batching::{
    plan_batch, run_chunked, BatchConstraints, ConcurrencyLimits, ProcessingComplexity, RetryPolicy,
};
use crate::models::{AdmissionScore, Certificate, PredictionStage, StudentProfile};
use crate::services::scoring_client::{ScenarioScoringRequest, ScoringBackend};
use crate::services::StageError;
use uag_common::config::PredictionTuning;

/// National exam subject-group blocks eligible for scenario scoring.
pub(crate) const EXAM_BLOCKS: &[(&str, [&str; 3])] = &[
    ("A00", ["math", "physics", "chemistry"]),
    ("A01", ["math", "physics", "english"]),
    ("B00", ["math", "chemistry", "biology"]),
    ("C00", ["literature", "history", "geography"]),
    ("D01", ["math", "literature", "english"]),
];

/// Scenario code for the VSAT-derived request.
const SCENARIO_VSAT: &str = "VSAT";
/// Scenario code for the aptitude-test request.
const SCENARIO_APTITUDE: &str = "APT";

pub struct ScenarioService<B> {
    backend: Arc<B>,
    constraints: BatchConstraints,
    limits: ConcurrencyLimits,
    retry: RetryPolicy,
}

impl<B: ScoringBackend> ScenarioService<B> {
    pub fn new(backend: Arc<B>, tuning: &PredictionTuning) -> Self {
        Self {
            backend,
            constraints: BatchConstraints {
                max_chunk_size: tuning.l2_max_chunk_size,
                memory_limit_mb: tuning.memory_limit_mb,
                network_latency_ms: tuning.network_latency_ms,
                complexity: ProcessingComplexity::Medium,
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

    /// Score every scenario the profile can serve.
    ///
    /// Idempotent; never mutates the aggregate.
    pub async fn predict(
        &self,
        profile: &StudentProfile,
    ) -> Result<Vec<AdmissionScore>, StageError> {
        let requests = expand_requests(profile);
        if requests.is_empty() {
            tracing::debug!(student_id = %profile.student_id, "No exam scenarios to score");
            return Ok(Vec::new());
        }

        let plan = plan_batch(requests.len(), &self.constraints, &self.limits);
        tracing::debug!(
            student_id = %profile.student_id,
            scenarios = requests.len(),
            chunk_size = plan.chunk_size,
            concurrency = plan.concurrency,
            constraint = ?plan.binding_constraint,
            "Scoring exam scenarios"
        );

        let backend = &self.backend;
        let outcome = run_chunked(requests, &plan, &self.retry, |chunk| backend.score_l2(chunk)).await;

        if outcome.failed_chunks == outcome.dispatched_chunks {
            return Err(StageError::NoResults {
                stage: PredictionStage::L2,
                chunks: outcome.dispatched_chunks,
            });
        }

        Ok(outcome
            .items
            .into_iter()
            .map(|raw| AdmissionScore {
                admission_code: raw.admission_code,
                score: raw.score,
            })
            .collect())
    }
}

/// One request per exam block fully covered by the profile's national exam
/// scores, plus a VSAT request and an aptitude request when those scores
/// exist.
pub(crate) fn expand_requests(profile: &StudentProfile) -> Vec<ScenarioScoringRequest> {
    let certificate_bonus = certificate_bonus(&profile.certificates);
    let mut requests = Vec::new();

    for (block, subjects) in EXAM_BLOCKS {
        let mut components = BTreeMap::new();
        let complete = subjects.iter().all(|subject| {
            match profile.national_exam_scores.get(*subject) {
                Some(score) => {
                    components.insert((*subject).to_string(), *score);
                    true
                }
                None => false,
            }
        });
        if complete {
            requests.push(ScenarioScoringRequest {
                student_id: profile.student_id,
                scenario_code: (*block).to_string(),
                component_scores: components,
                certificate_bonus,
                talent_score: profile.talent_score,
            });
        }
    }

    if !profile.vsat_scores.is_empty() {
        requests.push(ScenarioScoringRequest {
            student_id: profile.student_id,
            scenario_code: SCENARIO_VSAT.to_string(),
            component_scores: profile.vsat_scores.clone(),
            certificate_bonus,
            talent_score: profile.talent_score,
        });
    }

    if let Some(aptitude) = profile.aptitude_score {
        requests.push(ScenarioScoringRequest {
            student_id: profile.student_id,
            scenario_code: SCENARIO_APTITUDE.to_string(),
            component_scores: BTreeMap::from([("aptitude".to_string(), aptitude)]),
            certificate_bonus,
            talent_score: profile.talent_score,
        });
    }

    requests
}

/// IELTS band converted to a bonus point on the 30-point admission scale.
/// The best certificate wins.
fn certificate_bonus(certificates: &[Certificate]) -> Option<f64> {
    certificates
        .iter()
        .filter(|c| c.kind.eq_ignore_ascii_case("ielts"))
        .filter_map(|c| c.level.parse::<f64>().ok())
        .map(|band| ((band - 4.0) * 0.5).clamp(0.0, 2.0))
        .fold(None, |best: Option<f64>, bonus| {
            Some(best.map_or(bonus, |b| b.max(bonus)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn profile() -> StudentProfile {
        StudentProfile {
            student_id: Uuid::new_v4(),
            national_exam_scores: BTreeMap::from([
                ("math".to_string(), 8.5),
                ("physics".to_string(), 7.75),
                ("chemistry".to_string(), 8.0),
                ("english".to_string(), 9.0),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn only_fully_covered_blocks_expand() {
        // math/physics/chemistry/english cover A00 and A01 but no
        // literature- or biology-based block.
        let requests = expand_requests(&profile());
        let codes: Vec<&str> = requests.iter().map(|r| r.scenario_code.as_str()).collect();
        assert_eq!(codes, vec!["A00", "A01"]);
    }

    #[test]
    fn vsat_and_aptitude_add_scenarios() {
        let mut p = profile();
        p.vsat_scores = BTreeMap::from([("reasoning".to_string(), 105.0)]);
        p.aptitude_score = Some(820.0);

        let requests = expand_requests(&p);
        let codes: Vec<&str> = requests.iter().map(|r| r.scenario_code.as_str()).collect();
        assert_eq!(codes, vec!["A00", "A01", "VSAT", "APT"]);
    }

    #[test]
    fn profile_without_scores_expands_to_nothing() {
        let p = StudentProfile {
            student_id: Uuid::new_v4(),
            ..Default::default()
        };
        assert!(expand_requests(&p).is_empty());
    }

    #[test]
    fn ielts_bonus_is_clamped_and_best_wins() {
        let bonus = certificate_bonus(&[
            Certificate {
                kind: "IELTS".to_string(),
                level: "6.5".to_string(),
            },
            Certificate {
                kind: "ielts".to_string(),
                level: "8.0".to_string(),
            },
        ]);
        assert_eq!(bonus, Some(2.0));

        let low = certificate_bonus(&[Certificate {
            kind: "ielts".to_string(),
            level: "4.0".to_string(),
        }]);
        assert_eq!(low, Some(0.0));

        assert_eq!(certificate_bonus(&[]), None);

        let unrelated = certificate_bonus(&[Certificate {
            kind: "informatics".to_string(),
            level: "national".to_string(),
        }]);
        assert_eq!(unrelated, None);
    }
}
