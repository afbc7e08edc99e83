use crate::rubric::GradeReport;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// One-shot attempt per (user, evaluation).
///
/// NotStarted --submit--> Completed --reset--> NotStarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    NotStarted,
    Completed {
        score: u32,
        max: u32,
        submitted_at: String,
    },
}

impl AttemptState {
    pub fn attempt_used(&self) -> bool {
        matches!(self, AttemptState::Completed { .. })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttemptState::NotStarted => serde_json::json!({
                "status": "not_started",
                "attemptUsed": false,
                "score": null,
                "max": null,
                "submittedAt": null,
            }),
            AttemptState::Completed {
                score,
                max,
                submitted_at,
            } => serde_json::json!({
                "status": "completed",
                "attemptUsed": true,
                "score": score,
                "max": max,
                "submittedAt": submitted_at,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptError {
    pub code: String,
    pub message: String,
}

impl AttemptError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        AttemptError {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AttemptError {}

pub fn load_state(
    conn: &Connection,
    evaluation_id: &str,
    user_id: &str,
) -> rusqlite::Result<AttemptState> {
    let row: Option<(i64, Option<i64>, Option<i64>, Option<String>)> = conn
        .query_row(
            "SELECT attempt_used, score, max_score, submitted_at
             FROM evaluation_attempts
             WHERE evaluation_id = ? AND user_id = ?",
            (evaluation_id, user_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;

    Ok(match row {
        Some((used, score, max, submitted_at)) if used != 0 => AttemptState::Completed {
            score: score.unwrap_or(0).max(0) as u32,
            max: max.unwrap_or(0).max(0) as u32,
            submitted_at: submitted_at.unwrap_or_default(),
        },
        _ => AttemptState::NotStarted,
    })
}

/// Stored per-criterion details of a completed attempt.
pub fn load_details(
    conn: &Connection,
    evaluation_id: &str,
    user_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT details_json FROM evaluation_attempts
             WHERE evaluation_id = ? AND user_id = ? AND attempt_used = 1",
            (evaluation_id, user_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw
        .flatten()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok()))
}

/// Moves the pair to Completed. The write is a single conditional upsert,
/// so a second submit (even from another connection) changes no row and
/// is reported as `attempt_used`.
pub fn record_submission(
    conn: &Connection,
    evaluation_id: &str,
    user_id: &str,
    code: &str,
    report: &GradeReport,
    submitted_at: &str,
) -> Result<AttemptState, AttemptError> {
    let details = serde_json::to_string(&report.details)
        .map_err(|e| AttemptError::new("db_update_failed", e.to_string()))?;

    let changed = conn
        .execute(
            "INSERT INTO evaluation_attempts(
               evaluation_id, user_id, attempt_used, score, max_score,
               details_json, code, submitted_at, reset_count
             ) VALUES(?, ?, 1, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(evaluation_id, user_id) DO UPDATE SET
               attempt_used = 1,
               score = excluded.score,
               max_score = excluded.max_score,
               details_json = excluded.details_json,
               code = excluded.code,
               submitted_at = excluded.submitted_at
             WHERE evaluation_attempts.attempt_used = 0",
            (
                evaluation_id,
                user_id,
                report.score as i64,
                report.max as i64,
                &details,
                code,
                submitted_at,
            ),
        )
        .map_err(|e| AttemptError::new("db_update_failed", e.to_string()))?;

    if changed != 1 {
        return Err(AttemptError::new(
            "attempt_used",
            "this evaluation was already submitted; ask a teacher to reset it",
        ));
    }

    Ok(AttemptState::Completed {
        score: report.score,
        max: report.max,
        submitted_at: submitted_at.to_string(),
    })
}

/// Moves the pair back to NotStarted, clearing score and details.
pub fn reset(conn: &Connection, evaluation_id: &str, user_id: &str) -> Result<(), AttemptError> {
    let changed = conn
        .execute(
            "UPDATE evaluation_attempts SET
               attempt_used = 0,
               score = NULL,
               max_score = NULL,
               details_json = NULL,
               code = NULL,
               submitted_at = NULL,
               reset_count = reset_count + 1
             WHERE evaluation_id = ? AND user_id = ? AND attempt_used = 1",
            (evaluation_id, user_id),
        )
        .map_err(|e| AttemptError::new("db_update_failed", e.to_string()))?;

    if changed != 1 {
        return Err(AttemptError::new(
            "not_submitted",
            "there is no completed attempt to reset",
        ));
    }
    Ok(())
}
