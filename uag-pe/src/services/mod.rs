//! Prediction pipeline services

pub mod orchestrator;
pub mod reconciler;
pub mod scoring_client;
pub mod stage_l1;
pub mod stage_l2;
pub mod stage_l3;

pub use orchestrator::PredictionOrchestrator;
pub use reconciler::{reconcile_admission_links, ReconcileOutcome};
pub use scoring_client::{HttpScoringClient, ScoringBackend, ScoringError};
pub use stage_l1::CategoryService;
pub use stage_l2::ScenarioService;
pub use stage_l3::TranscriptService;

use thiserror::Error;

use crate::models::PredictionStage;

/// Stage-level failures surfaced to the orchestrator.
///
/// Chunk failures inside a stage are absorbed by the batch caller; a stage
/// only rejects when nothing at all came back.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} stage produced no results: all {chunks} chunks failed")]
    NoResults {
        stage: PredictionStage,
        chunks: usize,
    },
}
