//! Admission reference data and student-admission linkages

use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::students::parse_uuid;
use uag_common::Result;

/// Resolve an admission code to its id. `None` for unknown codes.
pub async fn find_id_by_code<'e, E>(executor: E, code: &str) -> Result<Option<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM admissions WHERE code = ?")
        .bind(code)
        .fetch_optional(executor)
        .await?;

    row.map(|(id,)| parse_uuid(&id, "admissions.id")).transpose()
}

/// Admission ids already linked to the student.
pub async fn linked_admission_ids<'e, E>(executor: E, student_id: Uuid) -> Result<BTreeSet<Uuid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT admission_id FROM admission_links WHERE student_id = ?")
            .bind(student_id.to_string())
            .fetch_all(executor)
            .await?;

    rows.into_iter()
        .map(|(id,)| parse_uuid(&id, "admission_links.admission_id"))
        .collect()
}

/// Insert a linkage row.
///
/// Returns `false` when the link already existed: the composite primary key
/// absorbs duplicate inserts from racing reconcilers.
pub async fn insert_link<'e, E>(executor: E, student_id: Uuid, admission_id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO admission_links (student_id, admission_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(student_id.to_string())
    .bind(admission_id.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert an admission record.
pub async fn save_admission(pool: &SqlitePool, id: Uuid, code: &str, title: &str) -> Result<()> {
    sqlx::query("INSERT INTO admissions (id, code, title) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(code)
        .bind(title)
        .execute(pool)
        .await?;
    Ok(())
}
