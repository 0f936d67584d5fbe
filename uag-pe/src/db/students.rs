//! Student and user reference data
//!
//! These tables are owned by the CRUD service; the prediction engine reads
//! them. The save helpers exist for test seeding and local tooling.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{StudentProfile, ANONYMOUS_ACTOR};
use uag_common::{Error, Result};

/// Load the scoring-relevant profile document for a student.
pub async fn load_profile(pool: &SqlitePool, student_id: Uuid) -> Result<Option<StudentProfile>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT profile FROM students WHERE id = ?")
        .bind(student_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Upsert a profile document.
pub async fn save_profile(pool: &SqlitePool, profile: &StudentProfile) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO students (id, user_id, profile, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            profile = excluded.profile,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(profile.student_id.to_string())
    .bind(profile.user_id.map(|u| u.to_string()))
    .bind(serde_json::to_string(profile)?)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a user record.
pub async fn save_user(pool: &SqlitePool, user_id: Uuid, email: &str) -> Result<()> {
    sqlx::query("INSERT INTO users (id, email) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

/// Actor recorded on aggregate writes: the triggering user's email, or the
/// anonymous marker for guest profiles and unknown user ids.
pub async fn resolve_actor(pool: &SqlitePool, user_id: Option<Uuid>) -> Result<String> {
    let Some(user_id) = user_id else {
        return Ok(ANONYMOUS_ACTOR.to_string());
    };

    let row: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(email,)| email).unwrap_or_else(|| {
        tracing::debug!(user_id = %user_id, "No user record for actor resolution");
        ANONYMOUS_ACTOR.to_string()
    }))
}

/// Parse a stored uuid column.
pub(crate) fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Internal(format!("Invalid uuid in column {column}: {e}")))
}
