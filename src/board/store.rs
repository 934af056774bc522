//! Task row persistence and the optimistic-concurrency write guard.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::error::{BoardError, Result};
use super::model::{Status, TaskRow};

/// Load a task inside the caller's transaction, or `NotFound`.
pub async fn load(conn: &mut SqliteConnection, id: &str) -> Result<TaskRow> {
    sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(BoardError::NotFound)
}

/// Fetch a task outside any transaction (read paths).
pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<TaskRow>> {
    Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Insert a freshly created task row.
pub async fn insert(conn: &mut SqliteConnection, task: &TaskRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO tasks
         (id, title, description, status, priority, owner, tags, estimate,
          ordering_index, version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.status)
    .bind(&task.priority)
    .bind(&task.owner)
    .bind(&task.tags)
    .bind(task.estimate)
    .bind(task.ordering_index)
    .bind(task.version)
    .bind(&task.created_at)
    .bind(&task.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Write back a mutated task, guarded by the version the caller read.
///
/// The `AND version = ?` clause is the optimistic check performed at write
/// time: if a concurrent transaction committed first, zero rows match and the
/// caller gets `VersionConflict` with no state change. On success the stored
/// version becomes `expected_version + 1` and `updated_at` is refreshed.
pub async fn save(
    conn: &mut SqliteConnection,
    task: &mut TaskRow,
    expected_version: i64,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let rows = sqlx::query(
        "UPDATE tasks SET
           title = ?, description = ?, status = ?, priority = ?, owner = ?,
           tags = ?, estimate = ?, ordering_index = ?,
           version = ?, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.status)
    .bind(&task.priority)
    .bind(&task.owner)
    .bind(&task.tags)
    .bind(task.estimate)
    .bind(task.ordering_index)
    .bind(expected_version + 1)
    .bind(&now)
    .bind(&task.id)
    .bind(expected_version)
    .execute(conn)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(BoardError::VersionConflict);
    }
    task.version = expected_version + 1;
    task.updated_at = now;
    Ok(())
}

/// Delete a task row; cascade removes its activities and comments.
pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    let rows = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected();
    if rows == 0 {
        return Err(BoardError::NotFound);
    }
    Ok(())
}

/// Board listing in lane order: `(status, ordering_index, id)` — id is the
/// final deterministic tie-break.
pub async fn list(pool: &SqlitePool, status: Option<Status>) -> Result<Vec<TaskRow>> {
    let rows = match status {
        Some(s) => {
            sqlx::query_as(
                "SELECT * FROM tasks WHERE status = ? ORDER BY status, ordering_index, id",
            )
            .bind(s.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM tasks ORDER BY status, ordering_index, id")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}

/// "What should I work on" view: Ready and In Progress tasks, highest
/// priority first, then lane order.
pub async fn next_up(pool: &SqlitePool, limit: i64) -> Result<Vec<TaskRow>> {
    Ok(sqlx::query_as(
        "SELECT * FROM tasks WHERE status IN ('Ready', 'In Progress')
         ORDER BY
           CASE priority WHEN 'P0' THEN 0 WHEN 'P1' THEN 1 WHEN 'P2' THEN 2 ELSE 3 END,
           ordering_index, id
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::model::new_id;

    fn draft_row(title: &str, status: &str, index: f64) -> TaskRow {
        let now = Utc::now().to_rfc3339();
        TaskRow {
            id: new_id(),
            title: title.to_string(),
            description: None,
            status: status.to_string(),
            priority: "P2".to_string(),
            owner: None,
            tags: "{}".to_string(),
            estimate: None,
            ordering_index: index,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_with_stale_version_conflicts_and_writes_nothing() {
        let pool = crate::storage::test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut task = draft_row("A", "Backlog", 1000.0);
        insert(&mut conn, &task).await.unwrap();

        task.title = "A2".to_string();
        save(&mut conn, &mut task, 1).await.unwrap();
        assert_eq!(task.version, 2);

        // Stale write: expected_version 1 no longer matches.
        task.title = "A3".to_string();
        let err = save(&mut conn, &mut task, 1).await.unwrap_err();
        assert!(matches!(err, BoardError::VersionConflict));

        let stored = load(&mut conn, &task.id).await.unwrap();
        assert_eq!(stored.title, "A2");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn list_orders_by_lane_then_index_then_id() {
        let pool = crate::storage::test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut rows = vec![
            draft_row("b-ready", "Ready", 2000.0),
            draft_row("a-ready", "Ready", 1000.0),
            draft_row("backlog", "Backlog", 5000.0),
        ];
        for row in &mut rows {
            insert(&mut conn, row).await.unwrap();
        }
        drop(conn);

        let listed = list(&pool, None).await.unwrap();
        let titles: Vec<&str> = listed.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["backlog", "a-ready", "b-ready"]);

        let ready_only = list(&pool, Some(Status::Ready)).await.unwrap();
        assert_eq!(ready_only.len(), 2);
    }

    #[tokio::test]
    async fn next_up_weights_priority_before_lane_position() {
        let pool = crate::storage::test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut urgent = draft_row("urgent", "In Progress", 9000.0);
        urgent.priority = "P0".to_string();
        let routine = draft_row("routine", "Ready", 1000.0);
        let parked = draft_row("parked", "Backlog", 1000.0);
        for row in [&urgent, &routine, &parked] {
            insert(&mut conn, row).await.unwrap();
        }
        drop(conn);

        let queue = next_up(&pool, 10).await.unwrap();
        let titles: Vec<&str> = queue.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["urgent", "routine"]);
    }
}
