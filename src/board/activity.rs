//! Append-only per-task activity trail.
//!
//! Every mutation appends one immutable record inside the mutation's own
//! transaction. `activity_seq` is per-task monotonic starting at 1: the
//! sequence is read-then-appended after the triggering write has taken the
//! transaction's write lock, and `UNIQUE (task_id, activity_seq)` backstops
//! it at the database level.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::error::Result;
use super::model::{new_id, ActivityRow};

/// Append an activity for `task_id`, assigning the next per-task sequence
/// number. Must run inside the same transaction as the mutation it records.
pub async fn append(
    conn: &mut SqliteConnection,
    task_id: &str,
    actor: &str,
    activity_type: &str,
    payload: &serde_json::Value,
) -> Result<ActivityRow> {
    let (seq,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(activity_seq), 0) + 1 FROM activities WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_one(&mut *conn)
    .await?;

    let id = new_id();
    let now = Utc::now().to_rfc3339();
    let payload_json = payload.to_string();
    sqlx::query(
        "INSERT INTO activities (id, task_id, type, payload, actor, activity_seq, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(task_id)
    .bind(activity_type)
    .bind(&payload_json)
    .bind(actor)
    .bind(seq)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(ActivityRow {
        id,
        task_id: task_id.to_string(),
        activity_type: activity_type.to_string(),
        payload: payload_json,
        actor: actor.to_string(),
        activity_seq: seq,
        created_at: now,
    })
}

/// Replay history for one task, oldest first.
pub async fn list_for_task(
    pool: &SqlitePool,
    task_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<ActivityRow>> {
    Ok(sqlx::query_as(
        "SELECT * FROM activities WHERE task_id = ?
         ORDER BY activity_seq ASC LIMIT ? OFFSET ?",
    )
    .bind(task_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?)
}

/// Recent-activity feed, newest first, optionally filtered by task and type.
pub async fn feed(
    pool: &SqlitePool,
    task_id: Option<&str>,
    activity_type: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<ActivityRow>> {
    let rows = match (task_id, activity_type) {
        (Some(t), Some(ty)) => {
            sqlx::query_as(
                "SELECT * FROM activities WHERE task_id = ? AND type = ?
                 ORDER BY created_at DESC, activity_seq DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(t)
            .bind(ty)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        (Some(t), None) => {
            sqlx::query_as(
                "SELECT * FROM activities WHERE task_id = ?
                 ORDER BY created_at DESC, activity_seq DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(t)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        (None, Some(ty)) => {
            sqlx::query_as(
                "SELECT * FROM activities WHERE type = ?
                 ORDER BY created_at DESC, activity_seq DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(ty)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        (None, None) => {
            sqlx::query_as(
                "SELECT * FROM activities
                 ORDER BY created_at DESC, activity_seq DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}
