//! HTTP client for the external ML scoring service
//!
//! One POST per chunk: the request body is a JSON array of stage feature
//! objects and the response a JSON array of scored items. A bad request
//! shape comes back as a structured validation document
//! (`{"detail":[{"loc","msg","type"}]}`), which is a full-chunk,
//! non-retryable failure.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Certificate, SchoolType};

const USER_AGENT: &str = concat!("uag-pe/", env!("CARGO_PKG_VERSION"));

/// Scoring call errors
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Scoring service error {0}: {1}")]
    Api(u16, String),

    #[error("Request rejected by scoring service: {0}")]
    Rejected(String),

    #[error("Malformed scoring response: {0}")]
    Parse(String),
}

impl ScoringError {
    /// Transient failures are retried at the chunk level; everything else
    /// means the request shape itself is wrong and a retry cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScoringError::Network(_) | ScoringError::Timeout => true,
            ScoringError::Api(status, _) => *status >= 500,
            ScoringError::Rejected(_) | ScoringError::Parse(_) => false,
        }
    }
}

/// Validation-error document returned by the scoring service.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationErrorBody {
    pub detail: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationIssue {
    pub loc: Vec<serde_json::Value>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ValidationErrorBody {
    fn summary(&self) -> String {
        match self.detail.first() {
            Some(issue) => {
                let loc = issue
                    .loc
                    .iter()
                    .map(|part| part.to_string())
                    .collect::<Vec<_>>()
                    .join(".");
                format!(
                    "{} at {} ({}), {} issue(s) total",
                    issue.msg,
                    loc,
                    issue.kind,
                    self.detail.len()
                )
            }
            None => "validation failed without detail".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types, one request/response pair per stage
// ---------------------------------------------------------------------------

/// L1 input: one exam-scenario / category combination for a profile.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryScoringRequest {
    pub student_id: Uuid,
    pub school_type: SchoolType,
    pub province_code: Option<String>,
    pub major_group: String,
    pub award_subject: Option<String>,
    pub exam_scores: BTreeMap<String, f64>,
}

/// L1 output: scores the service produced for one combination.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCategoryScore {
    pub priority_category: String,
    pub admission_scores: BTreeMap<String, f64>,
}

/// L2 input: one exam-scenario request.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioScoringRequest {
    pub student_id: Uuid,
    pub scenario_code: String,
    pub component_scores: BTreeMap<String, f64>,
    pub certificate_bonus: Option<f64>,
    pub talent_score: Option<f64>,
}

/// L2 output: one scored admission code.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAdmissionScore {
    pub admission_code: String,
    pub score: f64,
}

/// L3 input: transcript-based features for one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptScoringRequest {
    pub student_id: Uuid,
    pub scenario_code: String,
    pub transcript_averages: BTreeMap<String, f64>,
    pub priority_object: Option<String>,
    pub priority_region: Option<String>,
    pub certificates: Vec<Certificate>,
}

/// L3 output: admission matches for one scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct RawScenarioScore {
    pub scenario_code: String,
    pub matches: Vec<RawAdmissionMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAdmissionMatch {
    pub admission_code: String,
    pub score: f64,
}

/// Transport seam for the scoring service.
///
/// The production implementation is [`HttpScoringClient`]; tests substitute
/// scripted fakes. One call scores one chunk.
pub trait ScoringBackend: Send + Sync {
    fn score_l1(
        &self,
        batch: Vec<CategoryScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawCategoryScore>, ScoringError>> + Send;

    fn score_l2(
        &self,
        batch: Vec<ScenarioScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawAdmissionScore>, ScoringError>> + Send;

    fn score_l3(
        &self,
        batch: Vec<TranscriptScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawScenarioScore>, ScoringError>> + Send;
}

/// Scoring service client over HTTP
pub struct HttpScoringClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpScoringClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ScoringError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ScoringError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_batch<Req, Item>(&self, path: &str, batch: &[Req]) -> Result<Vec<Item>, ScoringError>
    where
        Req: Serialize,
        Item: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        tracing::debug!(url = %url, batch_len = batch.len(), "Dispatching scoring chunk");

        let response = self
            .http_client
            .post(&url)
            .json(batch)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScoringError::Timeout
                } else {
                    ScoringError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScoringError::Network(e.to_string()))?;

        if status.as_u16() == 422 {
            let summary = serde_json::from_str::<ValidationErrorBody>(&body)
                .map(|doc| doc.summary())
                .unwrap_or(body);
            return Err(ScoringError::Rejected(summary));
        }
        if !status.is_success() {
            return Err(ScoringError::Api(status.as_u16(), body));
        }

        match serde_json::from_str::<Vec<Item>>(&body) {
            Ok(items) => Ok(items),
            Err(parse_err) => {
                // Some deployments answer 200 with the validation document.
                if let Ok(doc) = serde_json::from_str::<ValidationErrorBody>(&body) {
                    Err(ScoringError::Rejected(doc.summary()))
                } else {
                    Err(ScoringError::Parse(parse_err.to_string()))
                }
            }
        }
    }
}

impl ScoringBackend for HttpScoringClient {
    fn score_l1(
        &self,
        batch: Vec<CategoryScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawCategoryScore>, ScoringError>> + Send {
        async move { self.post_batch("/v1/score/l1", &batch).await }
    }

    fn score_l2(
        &self,
        batch: Vec<ScenarioScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawAdmissionScore>, ScoringError>> + Send {
        async move { self.post_batch("/v1/score/l2", &batch).await }
    }

    fn score_l3(
        &self,
        batch: Vec<TranscriptScoringRequest>,
    ) -> impl Future<Output = Result<Vec<RawScenarioScore>, ScoringError>> + Send {
        async move { self.post_batch("/v1/score/l3", &batch).await }
    }
}
