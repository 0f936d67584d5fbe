//! Prediction result aggregate persistence
//!
//! Every mutating write goes through the version column: an UPDATE only
//! lands when the caller holds the current version, otherwise the caller
//! reloads and reapplies its merge. `force_status` is the one exception,
//! used for the best-effort FAILED write after an orchestration error.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::students::parse_uuid;
use crate::models::{PredictionResult, PredictionStatus};
use uag_common::{Error, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT student_id, user_id, l1_results, l2_results, l3_results,
           l1_settled_at, l2_settled_at, l3_settled_at,
           status, created_by, updated_by, created_at, updated_at, version
    FROM prediction_results
"#;

/// Load the aggregate for a student.
pub async fn load<'e, E>(executor: E, student_id: Uuid) -> Result<Option<PredictionResult>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE student_id = ?"))
        .bind(student_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.map(row_to_result).transpose()
}

/// Create the aggregate in PROCESSING, or reset an existing one to
/// PROCESSING while keeping its stage results. Persisted before any stage
/// work starts so a crash mid-pipeline leaves a visible record.
pub async fn mark_processing(
    pool: &SqlitePool,
    student_id: Uuid,
    user_id: Option<Uuid>,
    actor: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO prediction_results (
            student_id, user_id, status, created_by, updated_by,
            created_at, updated_at, version
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
        ON CONFLICT(student_id) DO UPDATE SET
            status = excluded.status,
            user_id = COALESCE(excluded.user_id, prediction_results.user_id),
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at,
            version = prediction_results.version + 1
        "#,
    )
    .bind(student_id.to_string())
    .bind(user_id.map(|u| u.to_string()))
    .bind(PredictionStatus::Processing.as_str())
    .bind(actor)
    .bind(actor)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Write the aggregate if nobody else wrote it since it was loaded.
///
/// Returns `false` on a version conflict; the caller reloads and reapplies.
pub async fn update_versioned<'e, E>(executor: E, result: &PredictionResult) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let l1 = result
        .l1_results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let l2 = result
        .l2_results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let l3 = result
        .l3_results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let done = sqlx::query(
        r#"
        UPDATE prediction_results SET
            l1_results = ?,
            l2_results = ?,
            l3_results = ?,
            l1_settled_at = ?,
            l2_settled_at = ?,
            l3_settled_at = ?,
            status = ?,
            updated_by = ?,
            updated_at = ?,
            version = version + 1
        WHERE student_id = ? AND version = ?
        "#,
    )
    .bind(l1)
    .bind(l2)
    .bind(l3)
    .bind(result.l1_settled_at.map(|t| t.to_rfc3339()))
    .bind(result.l2_settled_at.map(|t| t.to_rfc3339()))
    .bind(result.l3_settled_at.map(|t| t.to_rfc3339()))
    .bind(result.status.as_str())
    .bind(&result.updated_by)
    .bind(result.updated_at.to_rfc3339())
    .bind(result.student_id.to_string())
    .bind(result.version)
    .execute(executor)
    .await?;

    Ok(done.rows_affected() > 0)
}

/// Unconditional status write, bypassing the version check. Best-effort
/// path after an orchestration error; a no-op when no aggregate exists.
pub async fn force_status(
    pool: &SqlitePool,
    student_id: Uuid,
    status: PredictionStatus,
    actor: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE prediction_results SET
            status = ?, updated_by = ?, updated_at = ?, version = version + 1
        WHERE student_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(actor)
    .bind(Utc::now().to_rfc3339())
    .bind(student_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_result(row: SqliteRow) -> Result<PredictionResult> {
    let student_id: String = row.get("student_id");
    let user_id: Option<String> = row.get("user_id");
    let status_raw: String = row.get("status");
    let status = PredictionStatus::parse(&status_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown prediction status: {status_raw}")))?;

    Ok(PredictionResult {
        student_id: parse_uuid(&student_id, "prediction_results.student_id")?,
        user_id: user_id
            .map(|raw| parse_uuid(&raw, "prediction_results.user_id"))
            .transpose()?,
        l1_results: parse_json_column(row.get("l1_results"))?,
        l2_results: parse_json_column(row.get("l2_results"))?,
        l3_results: parse_json_column(row.get("l3_results"))?,
        l1_settled_at: parse_optional_timestamp(row.get("l1_settled_at"))?,
        l2_settled_at: parse_optional_timestamp(row.get("l2_settled_at"))?,
        l3_settled_at: parse_optional_timestamp(row.get("l3_settled_at"))?,
        status,
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
        version: row.get("version"),
    })
}

fn parse_json_column<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    raw.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(Error::from)
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp in prediction_results: {e}")))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}
