//! Float-gap ordering within a status lane.
//!
//! Ordering keys are spaced `GAP` apart so a drag-and-drop insert between two
//! neighbours is a single-row write (client picks the midpoint). Repeated
//! midpoint inserts between the same neighbours shrink the gap toward
//! floating-point limits; `renumber_lane` is the explicit maintenance pass
//! that re-spaces a lane, and `lane_min_gap` tells an operator when to run it.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::error::{BoardError, Result};
use super::model::Status;

/// Spacing between consecutive ordering keys in a lane.
pub const GAP: f64 = 1000.0;

/// Reject non-finite or negative ordering keys before any write.
pub fn validate_index(index: f64) -> Result<()> {
    if !index.is_finite() || index < 0.0 {
        return Err(BoardError::validation(format!(
            "ordering_index must be a non-negative finite number, got {index}"
        )));
    }
    Ok(())
}

/// Next end-of-lane key: `max(ordering_index) + GAP`, or `GAP` for an empty
/// lane. Runs inside the caller's transaction.
pub async fn end_of_lane(conn: &mut SqliteConnection, status: &str) -> Result<f64> {
    let (max,): (f64,) =
        sqlx::query_as("SELECT COALESCE(MAX(ordering_index), 0.0) FROM tasks WHERE status = ?")
            .bind(status)
            .fetch_one(conn)
            .await?;
    Ok(max + GAP)
}

/// Smallest gap between adjacent ordering keys in a lane, or None when the
/// lane has fewer than two tasks.
pub async fn lane_min_gap(pool: &SqlitePool, status: Status) -> Result<Option<f64>> {
    let keys: Vec<(f64,)> = sqlx::query_as(
        "SELECT ordering_index FROM tasks WHERE status = ? ORDER BY ordering_index, id",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    Ok(keys
        .windows(2)
        .map(|w| w[1].0 - w[0].0)
        .fold(None, |acc: Option<f64>, gap| {
            Some(acc.map_or(gap, |m| m.min(gap)))
        }))
}

/// Re-space a lane to evenly GAP-spaced keys, preserving relative order
/// (ties broken by id, matching the listing order).
///
/// This is a maintenance operation, not a caller mutation: task versions are
/// left alone so in-flight optimistic updates are not invalidated wholesale.
/// Returns the number of rows rewritten.
pub async fn renumber_lane(pool: &SqlitePool, status: Status) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM tasks WHERE status = ? ORDER BY ordering_index, id")
            .bind(status.as_str())
            .fetch_all(&mut *tx)
            .await?;

    let now = Utc::now().to_rfc3339();
    for (i, (id,)) in ids.iter().enumerate() {
        let key = (i as f64 + 1.0) * GAP;
        sqlx::query("UPDATE tasks SET ordering_index = ?, updated_at = ? WHERE id = ?")
            .bind(key)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let count = ids.len() as u64;
    info!(lane = status.as_str(), rows = count, "renumbered lane");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_and_non_finite() {
        assert!(validate_index(-1.0).is_err());
        assert!(validate_index(f64::NAN).is_err());
        assert!(validate_index(f64::INFINITY).is_err());
        assert!(validate_index(0.0).is_ok());
        assert!(validate_index(1500.5).is_ok());
    }

    #[tokio::test]
    async fn end_of_lane_starts_at_gap() {
        let pool = crate::storage::test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let first = end_of_lane(&mut conn, "Backlog").await.unwrap();
        assert_eq!(first, GAP);
    }

    #[tokio::test]
    async fn renumber_preserves_relative_order() {
        let pool = crate::storage::test_pool().await;
        // Three tasks with cramped keys.
        for (id, key) in [("a", 1.0), ("b", 1.25), ("c", 1.5)] {
            sqlx::query(
                "INSERT INTO tasks (id, title, status, ordering_index, created_at, updated_at)
                 VALUES (?, ?, 'Ready', ?, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            )
            .bind(id)
            .bind(format!("task {id}"))
            .bind(key)
            .execute(&pool)
            .await
            .unwrap();
        }

        let min = lane_min_gap(&pool, Status::Ready).await.unwrap().unwrap();
        assert!(min <= 0.25);

        let n = renumber_lane(&pool, Status::Ready).await.unwrap();
        assert_eq!(n, 3);

        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT id, ordering_index FROM tasks WHERE status = 'Ready'
             ORDER BY ordering_index, id",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), GAP),
                ("b".to_string(), 2.0 * GAP),
                ("c".to_string(), 3.0 * GAP)
            ]
        );

        let min = lane_min_gap(&pool, Status::Ready).await.unwrap().unwrap();
        assert_eq!(min, GAP);
    }
}
