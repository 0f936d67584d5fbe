//! Student profile read model
//!
//! The profile document is owned by the CRUD service; the prediction engine
//! reads it as JSON and derives scoring features from it. Unknown fields are
//! tolerated so profile schema additions on the CRUD side do not break the
//! pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// University funding type used by the L1 category expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchoolType {
    Public,
    Private,
}

/// Language or skill certificate held by the student (e.g. IELTS 6.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub kind: String,
    pub level: String,
}

/// Scoring-relevant view of a student profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentProfile {
    pub student_id: Uuid,
    pub user_id: Option<Uuid>,
    pub province_code: Option<String>,
    /// Preferred funding types; empty means no preference (both considered).
    pub school_types: Vec<SchoolType>,
    pub major_groups: Vec<String>,
    /// Subjects with national-competition awards, each opening an extra
    /// scoring combination.
    pub award_subjects: Vec<String>,
    /// National high-school exam scores, keyed by subject.
    pub national_exam_scores: BTreeMap<String, f64>,
    /// VSAT component scores, keyed by section.
    pub vsat_scores: BTreeMap<String, f64>,
    pub aptitude_score: Option<f64>,
    pub talent_score: Option<f64>,
    pub certificates: Vec<Certificate>,
    pub priority_object: Option<String>,
    pub priority_region: Option<String>,
}
