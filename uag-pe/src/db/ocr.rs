//! OCR extraction reference data
//!
//! The OCR engine is an external service; it stores one row per processed
//! document with the subject grades it extracted. The transcript stage
//! merges the grade maps of the extractions named by the event; when a
//! subject appears in several extractions the highest grade wins.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use uag_common::Result;

/// Merge the subject grades of the given extraction rows.
///
/// Missing rows are logged and skipped; the event may reference extractions
/// that were deleted since.
pub async fn load_subject_grades(
    pool: &SqlitePool,
    extraction_ids: &[Uuid],
) -> Result<BTreeMap<String, f64>> {
    let mut merged = BTreeMap::new();

    for id in extraction_ids {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT subject_grades FROM ocr_extractions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(pool)
                .await?;

        let Some((json,)) = row else {
            tracing::warn!(extraction_id = %id, "OCR extraction not found, skipping");
            continue;
        };

        let grades: BTreeMap<String, f64> = serde_json::from_str(&json)?;
        for (subject, grade) in grades {
            merged
                .entry(subject)
                .and_modify(|current: &mut f64| {
                    if grade > *current {
                        *current = grade;
                    }
                })
                .or_insert(grade);
        }
    }

    Ok(merged)
}

/// Insert an extraction row.
pub async fn save_extraction(
    pool: &SqlitePool,
    extraction_id: Uuid,
    student_id: Uuid,
    subject_grades: &BTreeMap<String, f64>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ocr_extractions (id, student_id, subject_grades, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(extraction_id.to_string())
    .bind(student_id.to_string())
    .bind(serde_json::to_string(subject_grades)?)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
