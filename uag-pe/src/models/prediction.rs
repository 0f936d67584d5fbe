//! Prediction result aggregate and stage result types
//!
//! One aggregate row exists per student profile. Stage services return the
//! typed collections below; the orchestrator settles them into the
//! aggregate and derives the status from what has settled so far.
//!
//! Status derivation: the status is a pure function of (stages that have
//! settled at least once, stages holding non-empty results). No stage holds
//! results → FAILED; every settled stage holds results → COMPLETED;
//! otherwise → PARTIAL. PROCESSING is transient, written before stage work
//! starts and replaced at settlement. Terminal states are re-enterable: a
//! later event recomputes from current row state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Marker stored in `created_by`/`updated_by` for guest profiles.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Aggregate status, derived from stage settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionStatus {
    Processing,
    Partial,
    Completed,
    Failed,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Processing => "PROCESSING",
            PredictionStatus::Partial => "PARTIAL",
            PredictionStatus::Completed => "COMPLETED",
            PredictionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PROCESSING" => Some(PredictionStatus::Processing),
            "PARTIAL" => Some(PredictionStatus::Partial),
            "COMPLETED" => Some(PredictionStatus::Completed),
            "FAILED" => Some(PredictionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three prediction stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionStage {
    L1,
    L2,
    L3,
}

impl fmt::Display for PredictionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PredictionStage::L1 => "L1",
            PredictionStage::L2 => "L2",
            PredictionStage::L3 => "L3",
        })
    }
}

/// L1 result: admission scores grouped by priority category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub priority_category: String,
    /// Admission code → best predicted score for this category.
    pub admission_scores: BTreeMap<String, f64>,
}

/// L2 result: one scored admission code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionScore {
    pub admission_code: String,
    pub score: f64,
}

/// L3 result: admission matches grouped by exam-scenario key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPrediction {
    pub scenario_code: String,
    pub matches: Vec<AdmissionMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionMatch {
    pub admission_code: String,
    pub score: f64,
}

/// Per-student prediction aggregate.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub student_id: Uuid,
    pub user_id: Option<Uuid>,
    pub l1_results: Option<Vec<CategoryPrediction>>,
    pub l2_results: Option<Vec<AdmissionScore>>,
    pub l3_results: Option<Vec<ScenarioPrediction>>,
    pub l1_settled_at: Option<DateTime<Utc>>,
    pub l2_settled_at: Option<DateTime<Utc>>,
    pub l3_settled_at: Option<DateTime<Utc>>,
    pub status: PredictionStatus,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl PredictionResult {
    /// Fresh aggregate in PROCESSING, all stages unsettled.
    pub fn new(student_id: Uuid, user_id: Option<Uuid>, actor: &str) -> Self {
        let now = Utc::now();
        Self {
            student_id,
            user_id,
            l1_results: None,
            l2_results: None,
            l3_results: None,
            l1_settled_at: None,
            l2_settled_at: None,
            l3_settled_at: None,
            status: PredictionStatus::Processing,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Settle L1. `Some` replaces the stored results (last write wins);
    /// `None` marks a settlement that produced nothing, leaving any earlier
    /// results untouched.
    pub fn settle_l1(&mut self, results: Option<Vec<CategoryPrediction>>) {
        self.l1_settled_at = Some(Utc::now());
        if let Some(results) = results {
            self.l1_results = Some(results);
        }
    }

    pub fn settle_l2(&mut self, results: Option<Vec<AdmissionScore>>) {
        self.l2_settled_at = Some(Utc::now());
        if let Some(results) = results {
            self.l2_results = Some(results);
        }
    }

    pub fn settle_l3(&mut self, results: Option<Vec<ScenarioPrediction>>) {
        self.l3_settled_at = Some(Utc::now());
        if let Some(results) = results {
            self.l3_results = Some(results);
        }
    }

    /// Whether the stage holds a non-empty result collection.
    pub fn stage_present(&self, stage: PredictionStage) -> bool {
        match stage {
            PredictionStage::L1 => self.l1_results.as_ref().is_some_and(|r| !r.is_empty()),
            PredictionStage::L2 => self.l2_results.as_ref().is_some_and(|r| !r.is_empty()),
            PredictionStage::L3 => self.l3_results.as_ref().is_some_and(|r| !r.is_empty()),
        }
    }

    /// Whether the stage has settled at least once.
    pub fn stage_settled(&self, stage: PredictionStage) -> bool {
        match stage {
            PredictionStage::L1 => self.l1_settled_at.is_some(),
            PredictionStage::L2 => self.l2_settled_at.is_some(),
            PredictionStage::L3 => self.l3_settled_at.is_some(),
        }
    }

    /// Derive the status from current settlement state. Pure and
    /// commutative: the same stage fields always yield the same status, no
    /// matter in which order stages settled.
    pub fn derive_status(&self) -> PredictionStatus {
        const STAGES: [PredictionStage; 3] = [
            PredictionStage::L1,
            PredictionStage::L2,
            PredictionStage::L3,
        ];

        let present = STAGES.iter().filter(|s| self.stage_present(**s)).count();
        if present == 0 {
            return PredictionStatus::Failed;
        }

        let settled_without_results = STAGES
            .iter()
            .any(|s| self.stage_settled(*s) && !self.stage_present(*s));
        if settled_without_results {
            PredictionStatus::Partial
        } else {
            PredictionStatus::Completed
        }
    }

    pub fn recompute_status(&mut self) {
        self.status = self.derive_status();
    }

    /// Record the actor and time of a mutation.
    pub fn touch(&mut self, actor: &str) {
        self.updated_by = actor.to_string();
        self.updated_at = Utc::now();
    }
}
