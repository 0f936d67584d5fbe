//! Event-driven orchestration of the prediction pipeline
//!
//! Consumes domain events from the bus, fans the relevant stages out
//! concurrently, settles whatever came back into the aggregate under an
//! optimistic version check, and reconciles admission linkages after L3.
//! Handlers never propagate errors to the consumer loop: an unexpected
//! failure is recorded on the aggregate as FAILED, not redelivered.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::models::{PredictionResult, PredictionStage, PredictionStatus, ANONYMOUS_ACTOR};
use crate::services::reconciler::reconcile_admission_links;
use crate::services::scoring_client::ScoringBackend;
use crate::services::stage_l1::CategoryService;
use crate::services::stage_l2::ScenarioService;
use crate::services::stage_l3::TranscriptService;
use crate::services::StageError;
use uag_common::config::PredictionTuning;
use uag_common::events::{
    EventEnvelope, OcrCompleted, StudentCreated, TOPIC_OCR_COMPLETED, TOPIC_STUDENT_CREATED,
};
use uag_common::{Error, Result};

/// Bounded retries for optimistic-lock conflicts on the aggregate row.
const MAX_VERSION_RETRIES: u32 = 5;

pub struct PredictionOrchestrator<B> {
    db: SqlitePool,
    l1: CategoryService<B>,
    l2: ScenarioService<B>,
    l3: TranscriptService<B>,
}

impl<B: ScoringBackend> PredictionOrchestrator<B> {
    pub fn new(db: SqlitePool, backend: Arc<B>, tuning: &PredictionTuning) -> Self {
        Self {
            db,
            l1: CategoryService::new(backend.clone(), tuning),
            l2: ScenarioService::new(backend.clone(), tuning),
            l3: TranscriptService::new(backend, tuning),
        }
    }

    /// Consume envelopes until shutdown or bus close.
    pub async fn run(
        &self,
        mut rx: broadcast::Receiver<EventEnvelope>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Prediction orchestrator shutting down");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(envelope) => self.dispatch(envelope).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event consumer lagged, envelopes were dropped");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Event bus closed, stopping orchestrator");
                        break;
                    }
                },
            }
        }
    }

    /// Validate and route one envelope. Malformed payloads are logged and
    /// dropped without touching any aggregate; nothing is retried.
    pub async fn dispatch(&self, envelope: EventEnvelope) {
        match envelope.topic.as_str() {
            TOPIC_STUDENT_CREATED => {
                match serde_json::from_value::<StudentCreated>(envelope.payload) {
                    Ok(event) => self.handle_student_created(event).await,
                    Err(err) => tracing::error!(
                        topic = TOPIC_STUDENT_CREATED,
                        error = %err,
                        "Dropping malformed event payload"
                    ),
                }
            }
            TOPIC_OCR_COMPLETED => match serde_json::from_value::<OcrCompleted>(envelope.payload) {
                Ok(event) => self.handle_ocr_completed(event).await,
                Err(err) => tracing::error!(
                    topic = TOPIC_OCR_COMPLETED,
                    error = %err,
                    "Dropping malformed event payload"
                ),
            },
            other => tracing::debug!(topic = other, "Ignoring unrelated event topic"),
        }
    }

    /// Profile trigger: run L1 and L2.
    pub async fn handle_student_created(&self, event: StudentCreated) {
        tracing::info!(student_id = %event.student_id, "Profile created, starting prediction");
        if let Err(err) = self.run_profile_stages(&event).await {
            tracing::error!(
                student_id = %event.student_id,
                error = %err,
                "Profile prediction pipeline failed"
            );
            self.force_failed(event.student_id, event.user_id).await;
        }
    }

    /// OCR trigger: run L3 and reconcile admission linkages.
    pub async fn handle_ocr_completed(&self, event: OcrCompleted) {
        tracing::info!(
            student_id = %event.student_id,
            extractions = event.ocr_extraction_ids.len(),
            "OCR batch completed, starting transcript prediction"
        );
        if let Err(err) = self.run_transcript_stage(&event).await {
            tracing::error!(
                student_id = %event.student_id,
                error = %err,
                "Transcript prediction pipeline failed"
            );
            self.force_failed(event.student_id, event.user_id).await;
        }
    }

    async fn run_profile_stages(&self, event: &StudentCreated) -> Result<()> {
        let Some(profile) = db::students::load_profile(&self.db, event.student_id).await? else {
            tracing::warn!(
                student_id = %event.student_id,
                "No student profile for event, skipping prediction"
            );
            return Ok(());
        };
        let actor = db::students::resolve_actor(&self.db, event.user_id).await?;

        // Visible PROCESSING record before any remote work starts.
        db::prediction_results::mark_processing(&self.db, event.student_id, event.user_id, &actor)
            .await?;

        // Both stages always settle; one rejecting never aborts the other.
        let (l1_outcome, l2_outcome) =
            tokio::join!(self.l1.predict(&profile), self.l2.predict(&profile));

        let l1_data = settled_results(event.student_id, PredictionStage::L1, l1_outcome);
        let l2_data = settled_results(event.student_id, PredictionStage::L2, l2_outcome);

        let updated = self
            .merge_versioned(event.student_id, &actor, |aggregate| {
                aggregate.settle_l1(l1_data.clone());
                aggregate.settle_l2(l2_data.clone());
            })
            .await?;

        tracing::info!(
            student_id = %event.student_id,
            status = %updated.status,
            "Profile prediction settled"
        );
        Ok(())
    }

    async fn run_transcript_stage(&self, event: &OcrCompleted) -> Result<()> {
        // L3 refines an existing prediction; with no prior aggregate there
        // is nothing to refine.
        if db::prediction_results::load(&self.db, event.student_id)
            .await?
            .is_none()
        {
            tracing::warn!(
                student_id = %event.student_id,
                "OCR completion for student with no prediction record, ignoring"
            );
            return Ok(());
        }
        let Some(profile) = db::students::load_profile(&self.db, event.student_id).await? else {
            tracing::warn!(
                student_id = %event.student_id,
                "No student profile for OCR event, skipping prediction"
            );
            return Ok(());
        };
        let actor = db::students::resolve_actor(&self.db, event.user_id).await?;
        let transcript =
            db::ocr::load_subject_grades(&self.db, &event.ocr_extraction_ids).await?;

        db::prediction_results::mark_processing(&self.db, event.student_id, event.user_id, &actor)
            .await?;

        let l3_data = settled_results(
            event.student_id,
            PredictionStage::L3,
            self.l3.predict(&profile, &transcript).await,
        );

        // Aggregate update and linkage reconciliation commit together.
        for attempt in 1..=MAX_VERSION_RETRIES {
            let mut tx = self.db.begin().await?;

            let Some(mut aggregate) =
                db::prediction_results::load(&mut *tx, event.student_id).await?
            else {
                // Cascade-deleted mid-flight; nothing left to update.
                tx.rollback().await?;
                tracing::warn!(
                    student_id = %event.student_id,
                    "Prediction record disappeared during transcript merge"
                );
                return Ok(());
            };

            aggregate.settle_l3(l3_data.clone());
            aggregate.recompute_status();
            aggregate.touch(&actor);

            if !db::prediction_results::update_versioned(&mut *tx, &aggregate).await? {
                tx.rollback().await?;
                tracing::warn!(
                    student_id = %event.student_id,
                    attempt,
                    "Aggregate version conflict during transcript merge, retrying"
                );
                continue;
            }

            if let Some(predictions) = aggregate.l3_results.as_deref() {
                reconcile_admission_links(&mut tx, event.student_id, predictions).await?;
            }

            tx.commit().await?;
            tracing::info!(
                student_id = %event.student_id,
                status = %aggregate.status,
                "Transcript prediction settled"
            );
            return Ok(());
        }

        Err(Error::Internal(format!(
            "transcript merge for student {} kept conflicting after {} attempts",
            event.student_id, MAX_VERSION_RETRIES
        )))
    }

    /// Read-modify-write of the aggregate with bounded optimistic-lock
    /// retries. `apply` may run several times and must be idempotent on the
    /// aggregate it receives.
    async fn merge_versioned<F>(
        &self,
        student_id: Uuid,
        actor: &str,
        apply: F,
    ) -> Result<PredictionResult>
    where
        F: Fn(&mut PredictionResult),
    {
        for attempt in 1..=MAX_VERSION_RETRIES {
            let mut aggregate = db::prediction_results::load(&self.db, student_id)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("prediction result for student {student_id}"))
                })?;

            apply(&mut aggregate);
            aggregate.recompute_status();
            aggregate.touch(actor);

            if db::prediction_results::update_versioned(&self.db, &aggregate).await? {
                return Ok(aggregate);
            }
            tracing::warn!(
                student_id = %student_id,
                attempt,
                "Aggregate version conflict, retrying merge"
            );
        }

        Err(Error::Internal(format!(
            "aggregate merge for student {student_id} kept conflicting after {MAX_VERSION_RETRIES} attempts"
        )))
    }

    /// Best-effort terminal write after an unexpected pipeline error. A
    /// failure here is logged and swallowed; the bus never sees it.
    async fn force_failed(&self, student_id: Uuid, user_id: Option<Uuid>) {
        let actor = db::students::resolve_actor(&self.db, user_id)
            .await
            .unwrap_or_else(|_| ANONYMOUS_ACTOR.to_string());

        if let Err(err) = db::prediction_results::force_status(
            &self.db,
            student_id,
            PredictionStatus::Failed,
            &actor,
        )
        .await
        {
            tracing::error!(
                student_id = %student_id,
                error = %err,
                "Could not record FAILED status"
            );
        }
    }
}

/// Log a stage settlement and keep its results only when there are any.
/// A rejection or an empty fulfillment leaves the aggregate field as it
/// was.
fn settled_results<T>(
    student_id: Uuid,
    stage: PredictionStage,
    outcome: std::result::Result<Vec<T>, StageError>,
) -> Option<Vec<T>> {
    match outcome {
        Ok(items) if items.is_empty() => {
            tracing::debug!(student_id = %student_id, stage = %stage, "Stage settled without results");
            None
        }
        Ok(items) => {
            tracing::info!(
                student_id = %student_id,
                stage = %stage,
                results = items.len(),
                "Stage settled"
            );
            Some(items)
        }
        Err(err) => {
            tracing::warn!(student_id = %student_id, stage = %stage, error = %err, "Stage rejected");
            None
        }
    }
}
