//! Domain models for the prediction engine

pub mod prediction;
pub mod profile;

pub use prediction::{
    AdmissionMatch, AdmissionScore, CategoryPrediction, PredictionResult, PredictionStage,
    PredictionStatus, ScenarioPrediction, ANONYMOUS_ACTOR,
};
pub use profile::{Certificate, SchoolType, StudentProfile};
