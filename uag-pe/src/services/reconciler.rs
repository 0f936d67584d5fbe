//! Admission-linkage reconciliation after L3 settlement
//!
//! Diffs the admission codes surfaced by the latest transcript predictions
//! against the student's existing linkages and inserts only the delta. Runs
//! on the caller's transaction handle so linkages and the aggregate status
//! commit together: a student never observes COMPLETED without the
//! corresponding linkages.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::admissions;
use crate::models::ScenarioPrediction;
use uag_common::Result;

/// What one reconciliation pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub already_linked: usize,
    pub unknown_codes: Vec<String>,
}

/// Persist linkage rows for admission codes newly surfaced by L3.
///
/// Codes without a matching admission record are logged and skipped; they
/// never fail the transaction (the scoring model may lag behind the
/// admission catalog).
pub async fn reconcile_admission_links(
    conn: &mut SqliteConnection,
    student_id: Uuid,
    predictions: &[ScenarioPrediction],
) -> Result<ReconcileOutcome> {
    let codes: BTreeSet<&str> = predictions
        .iter()
        .flat_map(|p| p.matches.iter().map(|m| m.admission_code.as_str()))
        .collect();

    let mut outcome = ReconcileOutcome::default();
    if codes.is_empty() {
        return Ok(outcome);
    }

    let existing = admissions::linked_admission_ids(&mut *conn, student_id).await?;

    for code in codes {
        let Some(admission_id) = admissions::find_id_by_code(&mut *conn, code).await? else {
            tracing::warn!(
                student_id = %student_id,
                code,
                "Predicted admission code has no admission record, skipping"
            );
            outcome.unknown_codes.push(code.to_string());
            continue;
        };

        if existing.contains(&admission_id) {
            outcome.already_linked += 1;
            continue;
        }

        if admissions::insert_link(&mut *conn, student_id, admission_id).await? {
            outcome.inserted += 1;
        } else {
            // A racing reconciler got there first; the composite key held.
            outcome.already_linked += 1;
        }
    }

    tracing::info!(
        student_id = %student_id,
        inserted = outcome.inserted,
        already_linked = outcome.already_linked,
        unknown = outcome.unknown_codes.len(),
        "Admission linkage reconciliation complete"
    );

    Ok(outcome)
}
