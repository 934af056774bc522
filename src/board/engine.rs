//! The task-mutation engine.
//!
//! Every operation is one transaction: load pre-image → optimistic version
//! check → apply change → bump version → compute diff → append activity →
//! commit. Nothing is retried or merged here; a conflicting writer gets
//! `VersionConflict` and must re-fetch. Bulk operations run per-item inside
//! a single transaction, reporting failures as data instead of aborting the
//! batch.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use tracing::debug;

use super::activity;
use super::error::{BoardError, Result};
use super::model::{
    new_id, BulkFailure, BulkFields, BulkResult, Change, CommentRow, Priority, Status, TaskDraft,
    TaskPatch, TaskRow,
};
use super::ordering;
use super::store;

pub struct MutationEngine {
    pool: SqlitePool,
}

impl MutationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ─── Create ───────────────────────────────────────────────────────────────

    /// Create a task. A missing or zero ordering_index gets the end-of-lane
    /// key; an explicit one is persisted as-is (subject to `>= 0`).
    pub async fn create_task(&self, draft: TaskDraft, actor: &str) -> Result<TaskRow> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(BoardError::validation("title must not be empty"));
        }
        let status = match draft.status.as_deref() {
            Some(s) => Status::parse(s)?,
            None => Status::Backlog,
        };
        let priority = match draft.priority.as_deref() {
            Some(p) => Priority::parse(p)?,
            None => Priority::P2,
        };
        if let Some(est) = draft.estimate {
            validate_estimate(est)?;
        }
        let tags = match draft.tags {
            Some(v) => validate_tags(v)?,
            None => "{}".to_string(),
        };
        if let Some(ix) = draft.ordering_index {
            ordering::validate_index(ix)?;
        }

        let mut tx = self.pool.begin().await?;

        let ordering_index = match draft.ordering_index {
            Some(ix) if ix != 0.0 => ix,
            _ => ordering::end_of_lane(&mut tx, status.as_str()).await?,
        };

        let now = Utc::now().to_rfc3339();
        let task = TaskRow {
            id: new_id(),
            title,
            description: draft.description,
            status: status.as_str().to_string(),
            priority: priority.as_str().to_string(),
            owner: draft.owner,
            tags,
            estimate: draft.estimate,
            ordering_index,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
        };
        store::insert(&mut tx, &task).await?;
        activity::append(
            &mut tx,
            &task.id,
            actor,
            "created",
            &json!({ "title": task.title }),
        )
        .await?;
        tx.commit().await?;

        debug!(task_id = %task.id, lane = %task.status, "task created");
        Ok(task)
    }

    // ─── Update ───────────────────────────────────────────────────────────────

    /// Apply a sparse field patch under optimistic concurrency.
    ///
    /// Always bumps the version on success. Appends an `updated` activity
    /// only when the semantic diff is non-empty — an update that changes
    /// nothing observable leaves nothing in the log.
    pub async fn update_task(
        &self,
        task_id: &str,
        patch: TaskPatch,
        expected_version: i64,
        actor: &str,
    ) -> Result<TaskRow> {
        validate_patch(&patch)?;

        let mut tx = self.pool.begin().await?;
        let old = store::load(&mut tx, task_id).await?;
        if expected_version != old.version {
            return Err(BoardError::VersionConflict);
        }

        let mut task = old.clone();
        apply_patch(&mut task, &patch)?;
        store::save(&mut tx, &mut task, expected_version).await?;

        let diff = update_diff(&old, &task, &patch);
        if !diff.is_empty() {
            activity::append(&mut tx, task_id, actor, "updated", &Value::Object(diff)).await?;
        }
        tx.commit().await?;

        debug!(task_id, version = task.version, "task updated");
        Ok(task)
    }

    // ─── Reorder ──────────────────────────────────────────────────────────────

    /// Persist a caller-computed ordering key and optionally move the task to
    /// another lane. Placement among siblings is the client's responsibility;
    /// the server enforces only `>= 0`. A `moved` activity is logged only
    /// when the status actually changed — pure reordering is not audited.
    pub async fn reorder_task(
        &self,
        task_id: &str,
        new_status: Option<&str>,
        new_index: f64,
        expected_version: i64,
        actor: &str,
    ) -> Result<TaskRow> {
        ordering::validate_index(new_index)?;
        let parsed_status = new_status.map(Status::parse).transpose()?;

        let mut tx = self.pool.begin().await?;
        let old = store::load(&mut tx, task_id).await?;
        if expected_version != old.version {
            return Err(BoardError::VersionConflict);
        }

        let mut task = old.clone();
        if let Some(s) = parsed_status {
            task.status = s.as_str().to_string();
        }
        task.ordering_index = new_index;
        store::save(&mut tx, &mut task, expected_version).await?;

        if task.status != old.status {
            activity::append(
                &mut tx,
                task_id,
                actor,
                "moved",
                &json!({ "old_status": old.status, "new_status": task.status }),
            )
            .await?;
        }
        tx.commit().await?;

        debug!(task_id, lane = %task.status, index = new_index, "task reordered");
        Ok(task)
    }

    // ─── Delete ───────────────────────────────────────────────────────────────

    /// Delete a task and, by cascade, its activities and comments.
    ///
    /// A `deleted` activity capturing the title is appended first; because
    /// the cascade removes it in the same transaction, the audit record does
    /// not outlive the task.
    pub async fn delete_task(&self, task_id: &str, actor: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let task = store::load(&mut tx, task_id).await?;
        activity::append(
            &mut tx,
            task_id,
            actor,
            "deleted",
            &json!({ "title": task.title }),
        )
        .await?;
        store::delete(&mut tx, task_id).await?;
        tx.commit().await?;

        debug!(task_id, "task deleted");
        Ok(())
    }

    // ─── Bulk ─────────────────────────────────────────────────────────────────

    /// Apply a uniform field-set or a uniform delete to many tasks.
    ///
    /// All-or-nothing at the transaction level, partial at the result level:
    /// per-item NotFound/Conflict become failure entries and the remaining
    /// successes still commit together. A malformed request (bad enum value,
    /// no operation) or a store failure aborts the whole call.
    pub async fn bulk_update(
        &self,
        ids: &[String],
        fields: Option<BulkFields>,
        delete: bool,
        expected_versions: &HashMap<String, i64>,
        actor: &str,
    ) -> Result<BulkResult> {
        let fields = fields.unwrap_or_default();
        if delete && !fields.is_empty() {
            return Err(BoardError::validation(
                "bulk delete cannot be combined with field changes",
            ));
        }
        if !delete && fields.is_empty() {
            return Err(BoardError::validation(
                "bulk update requires fields or delete",
            ));
        }
        if let Some(s) = fields.status.as_deref() {
            Status::parse(s)?;
        }
        if let Some(p) = fields.priority.as_deref() {
            Priority::parse(p)?;
        }

        let mut result = BulkResult::default();
        let mut tx = self.pool.begin().await?;

        for id in ids {
            let task = match store::load(&mut tx, id).await {
                Ok(t) => t,
                Err(BoardError::NotFound) => {
                    result.failed.push(BulkFailure {
                        id: id.clone(),
                        reason: "Not found".to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(&expected) = expected_versions.get(id) {
                if expected != task.version {
                    result.failed.push(BulkFailure {
                        id: id.clone(),
                        reason: "Conflict".to_string(),
                    });
                    continue;
                }
            }

            if delete {
                activity::append(&mut tx, id, actor, "deleted", &json!({ "title": task.title }))
                    .await?;
                store::delete(&mut tx, id).await?;
                continue;
            }

            let mut updated = task.clone();
            let mut payload = Map::new();
            if let Some(s) = fields.status.as_deref() {
                updated.status = s.to_string();
                payload.insert("status".to_string(), json!(s));
            }
            if let Some(p) = fields.priority.as_deref() {
                updated.priority = p.to_string();
                payload.insert("priority".to_string(), json!(p));
            }
            if let Some(o) = fields.owner.as_deref() {
                updated.owner = Some(o.to_string());
                payload.insert("owner".to_string(), json!(o));
            }
            store::save(&mut tx, &mut updated, task.version).await?;
            activity::append(&mut tx, id, actor, "bulk_updated", &Value::Object(payload)).await?;
            result.updated.push(updated);
        }

        tx.commit().await?;
        debug!(
            updated = result.updated.len(),
            failed = result.failed.len(),
            "bulk operation committed"
        );
        Ok(result)
    }

    // ─── Comments ─────────────────────────────────────────────────────────────

    /// Add a comment and log a `commented` activity. The activity payload
    /// references the comment, never the body text.
    pub async fn add_comment(&self, task_id: &str, body: &str, actor: &str) -> Result<CommentRow> {
        if body.trim().is_empty() {
            return Err(BoardError::validation("comment body must not be empty"));
        }

        let mut tx = self.pool.begin().await?;
        store::load(&mut tx, task_id).await?;

        let comment = CommentRow {
            id: new_id(),
            task_id: task_id.to_string(),
            body: body.to_string(),
            actor: actor.to_string(),
            version: 1,
            created_at: Utc::now().to_rfc3339(),
        };
        sqlx::query(
            "INSERT INTO comments (id, task_id, body, actor, version, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&comment.id)
        .bind(&comment.task_id)
        .bind(&comment.body)
        .bind(&comment.actor)
        .bind(comment.version)
        .bind(&comment.created_at)
        .execute(&mut *tx)
        .await?;

        activity::append(
            &mut tx,
            task_id,
            actor,
            "commented",
            &json!({ "comment_id": comment.id }),
        )
        .await?;
        tx.commit().await?;
        Ok(comment)
    }

    /// Rewrite a comment body, bumping its version. Comments carry no
    /// expected-version contract — increment-on-write only.
    pub async fn edit_comment(&self, comment_id: &str, body: &str) -> Result<CommentRow> {
        if body.trim().is_empty() {
            return Err(BoardError::validation("comment body must not be empty"));
        }
        let rows = sqlx::query("UPDATE comments SET body = ?, version = version + 1 WHERE id = ?")
            .bind(body)
            .bind(comment_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(BoardError::NotFound);
        }
        Ok(sqlx::query_as("SELECT * FROM comments WHERE id = ?")
            .bind(comment_id)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn list_comments(&self, task_id: &str) -> Result<Vec<CommentRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM comments WHERE task_id = ? ORDER BY created_at, id")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

// ─── Patch application and diffing ────────────────────────────────────────────

fn validate_estimate(estimate: i64) -> Result<()> {
    if estimate < 0 {
        return Err(BoardError::validation("estimate must be non-negative"));
    }
    Ok(())
}

fn validate_tags(tags: Value) -> Result<String> {
    if !tags.is_object() {
        return Err(BoardError::validation("tags must be a JSON object"));
    }
    Ok(tags.to_string())
}

/// Reject patches that are malformed regardless of the current task state,
/// before any transaction is opened.
fn validate_patch(patch: &TaskPatch) -> Result<()> {
    match &patch.title {
        Change::Set(t) if t.trim().is_empty() => {
            return Err(BoardError::validation("title must not be empty"));
        }
        Change::Clear => return Err(BoardError::validation("title cannot be cleared")),
        _ => {}
    }
    match &patch.status {
        Change::Set(s) => {
            Status::parse(s)?;
        }
        Change::Clear => return Err(BoardError::validation("status cannot be cleared")),
        _ => {}
    }
    match &patch.priority {
        Change::Set(p) => {
            Priority::parse(p)?;
        }
        Change::Clear => return Err(BoardError::validation("priority cannot be cleared")),
        _ => {}
    }
    match &patch.tags {
        Change::Set(v) if !v.is_object() => {
            return Err(BoardError::validation("tags must be a JSON object"));
        }
        Change::Clear => return Err(BoardError::validation("tags cannot be cleared")),
        _ => {}
    }
    match &patch.estimate {
        Change::Set(e) => validate_estimate(*e)?,
        _ => {}
    }
    match &patch.ordering_index {
        Change::Set(ix) => ordering::validate_index(*ix)?,
        Change::Clear => {
            return Err(BoardError::validation("ordering_index cannot be cleared"));
        }
        _ => {}
    }
    Ok(())
}

fn apply_patch(task: &mut TaskRow, patch: &TaskPatch) -> Result<()> {
    if let Change::Set(t) = &patch.title {
        task.title = t.trim().to_string();
    }
    match &patch.description {
        Change::Set(d) => task.description = Some(d.clone()),
        Change::Clear => task.description = None,
        Change::Unchanged => {}
    }
    if let Change::Set(s) = &patch.status {
        task.status = s.clone();
    }
    if let Change::Set(p) = &patch.priority {
        task.priority = p.clone();
    }
    match &patch.owner {
        Change::Set(o) => task.owner = Some(o.clone()),
        Change::Clear => task.owner = None,
        Change::Unchanged => {}
    }
    if let Change::Set(v) = &patch.tags {
        task.tags = v.to_string();
    }
    match &patch.estimate {
        Change::Set(e) => task.estimate = Some(*e),
        Change::Clear => task.estimate = None,
        Change::Unchanged => {}
    }
    if let Change::Set(ix) = &patch.ordering_index {
        task.ordering_index = *ix;
    }
    Ok(())
}

/// Semantic diff for the `updated` activity payload.
///
/// Status and priority record old→new only when they actually changed. Owner
/// records old→new whenever the field is present in the patch, even if the
/// value is unchanged. Description is reduced to a boolean flag so free text
/// never lands in the audit trail. Tags and ordering changes are not audited.
fn update_diff(old: &TaskRow, new: &TaskRow, patch: &TaskPatch) -> Map<String, Value> {
    let mut diff = Map::new();
    if !patch.status.is_unchanged() && new.status != old.status {
        diff.insert("old_status".to_string(), json!(old.status));
        diff.insert("new_status".to_string(), json!(new.status));
    }
    if !patch.priority.is_unchanged() && new.priority != old.priority {
        diff.insert("old_priority".to_string(), json!(old.priority));
        diff.insert("new_priority".to_string(), json!(new.priority));
    }
    if !patch.owner.is_unchanged() {
        diff.insert("old_owner".to_string(), json!(old.owner));
        diff.insert("new_owner".to_string(), json!(new.owner));
    }
    if !patch.title.is_unchanged() {
        diff.insert("title".to_string(), json!(new.title));
    }
    if !patch.description.is_unchanged() {
        diff.insert("description".to_string(), json!(true));
    }
    if !patch.estimate.is_unchanged() {
        diff.insert("estimate".to_string(), json!(new.estimate));
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::activity;

    async fn engine() -> MutationEngine {
        MutationEngine::new(crate::storage::test_pool().await)
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            description: None,
            status: None,
            priority: None,
            owner: None,
            tags: None,
            estimate: None,
            ordering_index: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_gap_spaced_end_of_lane_keys() {
        let e = engine().await;
        let a = e.create_task(draft("A"), "alice").await.unwrap();
        let b = e.create_task(draft("B"), "alice").await.unwrap();
        assert_eq!(a.ordering_index, 1000.0);
        assert_eq!(b.ordering_index, 2000.0);
        assert_eq!(a.version, 1);

        let acts = activity::list_for_task(e.pool(), &a.id, 50, 0).await.unwrap();
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].activity_type, "created");
        assert_eq!(acts[0].activity_seq, 1);
    }

    #[tokio::test]
    async fn create_rejects_bad_input_before_writing() {
        let e = engine().await;
        assert!(matches!(
            e.create_task(draft("   "), "a").await.unwrap_err(),
            BoardError::Validation(_)
        ));
        let mut d = draft("ok");
        d.status = Some("Shipped".to_string());
        assert!(matches!(
            e.create_task(d, "a").await.unwrap_err(),
            BoardError::Validation(_)
        ));
        let mut d = draft("ok");
        d.ordering_index = Some(-5.0);
        assert!(matches!(
            e.create_task(d, "a").await.unwrap_err(),
            BoardError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn update_with_stale_version_changes_nothing() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();

        let patch = TaskPatch {
            title: Change::Set("A2".to_string()),
            ..Default::default()
        };
        let err = e
            .update_task(&t.id, patch, t.version + 1, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::VersionConflict));

        let stored = store::get(e.pool(), &t.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "A");
        assert_eq!(stored.version, 1);
        // Only the creation activity exists.
        let acts = activity::list_for_task(e.pool(), &t.id, 50, 0).await.unwrap();
        assert_eq!(acts.len(), 1);
    }

    #[tokio::test]
    async fn update_diff_rules_match_the_audit_contract() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();

        // Description-only change: payload is a bare flag, no text echoed.
        let patch = TaskPatch {
            description: Change::Set("secret design notes".to_string()),
            ..Default::default()
        };
        let t = e.update_task(&t.id, patch, 1, "alice").await.unwrap();
        assert_eq!(t.version, 2);
        let acts = activity::list_for_task(e.pool(), &t.id, 50, 0).await.unwrap();
        let last = acts.last().unwrap();
        assert_eq!(last.activity_type, "updated");
        let payload: Value = serde_json::from_str(&last.payload).unwrap();
        assert_eq!(payload, json!({ "description": true }));

        // Owner present but unchanged still records old→new (quirk preserved).
        let patch = TaskPatch {
            owner: Change::Clear,
            ..Default::default()
        };
        let t = e.update_task(&t.id, patch, 2, "alice").await.unwrap();
        let acts = activity::list_for_task(e.pool(), &t.id, 50, 0).await.unwrap();
        let payload: Value = serde_json::from_str(&acts.last().unwrap().payload).unwrap();
        assert_eq!(payload, json!({ "old_owner": null, "new_owner": null }));

        // Status set to its current value: no diff entry, and since nothing
        // else changed, no activity at all — but the version still bumps.
        let before = acts.len();
        let patch = TaskPatch {
            status: Change::Set("Backlog".to_string()),
            ..Default::default()
        };
        let t = e.update_task(&t.id, patch, 3, "alice").await.unwrap();
        assert_eq!(t.version, 4);
        let acts = activity::list_for_task(e.pool(), &t.id, 50, 0).await.unwrap();
        assert_eq!(acts.len(), before);
    }

    #[tokio::test]
    async fn clear_is_only_legal_for_nullable_fields() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();
        for patch in [
            TaskPatch {
                title: Change::Clear,
                ..Default::default()
            },
            TaskPatch {
                status: Change::Clear,
                ..Default::default()
            },
            TaskPatch {
                priority: Change::Clear,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                e.update_task(&t.id, patch, 1, "a").await.unwrap_err(),
                BoardError::Validation(_)
            ));
        }
        // Nullable fields may be cleared.
        let patch = TaskPatch {
            estimate: Change::Clear,
            description: Change::Clear,
            ..Default::default()
        };
        assert!(e.update_task(&t.id, patch, 1, "a").await.is_ok());
    }

    #[tokio::test]
    async fn reorder_moves_lane_and_logs_only_real_moves() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();

        let t = e
            .reorder_task(&t.id, Some("Done"), 50.0, 1, "alice")
            .await
            .unwrap();
        assert_eq!(t.status, "Done");
        assert_eq!(t.ordering_index, 50.0);
        assert_eq!(t.version, 2);
        let acts = activity::list_for_task(e.pool(), &t.id, 50, 0).await.unwrap();
        let last = acts.last().unwrap();
        assert_eq!(last.activity_type, "moved");
        let payload: Value = serde_json::from_str(&last.payload).unwrap();
        assert_eq!(
            payload,
            json!({ "old_status": "Backlog", "new_status": "Done" })
        );

        // Pure reorder within the lane: version bumps, no activity.
        let before = acts.len();
        let t = e.reorder_task(&t.id, None, 25.0, 2, "alice").await.unwrap();
        assert_eq!(t.version, 3);
        let acts = activity::list_for_task(e.pool(), &t.id, 50, 0).await.unwrap();
        assert_eq!(acts.len(), before);

        // Backward transitions are legal: Done → Backlog.
        let t = e
            .reorder_task(&t.id, Some("Backlog"), 25.0, 3, "alice")
            .await
            .unwrap();
        assert_eq!(t.status, "Backlog");
    }

    #[tokio::test]
    async fn delete_cascades_comments_and_activities() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();
        e.add_comment(&t.id, "first", "bob").await.unwrap();
        e.add_comment(&t.id, "second", "bob").await.unwrap();

        e.delete_task(&t.id, "alice").await.unwrap();

        let (activities,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM activities WHERE task_id = ?")
                .bind(&t.id)
                .fetch_one(e.pool())
                .await
                .unwrap();
        let (comments,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM comments WHERE task_id = ?")
                .bind(&t.id)
                .fetch_one(e.pool())
                .await
                .unwrap();
        assert_eq!(activities, 0);
        assert_eq!(comments, 0);

        // Second delete: the id no longer resolves.
        assert!(matches!(
            e.delete_task(&t.id, "alice").await.unwrap_err(),
            BoardError::NotFound
        ));
    }

    #[tokio::test]
    async fn bulk_commits_successes_and_reports_failures_per_item() {
        let e = engine().await;
        let x = e.create_task(draft("X"), "alice").await.unwrap();
        let z = e.create_task(draft("Z"), "alice").await.unwrap();

        let ids = vec![x.id.clone(), "missing".to_string(), z.id.clone()];
        let mut expected = HashMap::new();
        expected.insert(z.id.clone(), z.version + 7); // stale on purpose

        let fields = BulkFields {
            status: Some("Review".to_string()),
            ..Default::default()
        };
        let result = e
            .bulk_update(&ids, Some(fields), false, &expected, "alice")
            .await
            .unwrap();

        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].id, x.id);
        assert_eq!(result.updated[0].status, "Review");
        assert_eq!(result.updated[0].version, x.version + 1);
        assert_eq!(
            result.failed,
            vec![
                BulkFailure {
                    id: "missing".to_string(),
                    reason: "Not found".to_string()
                },
                BulkFailure {
                    id: z.id.clone(),
                    reason: "Conflict".to_string()
                },
            ]
        );

        // X's change committed despite Y/Z failing.
        let stored = store::get(e.pool(), &x.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "Review");
        // Z untouched.
        let stored = store::get(e.pool(), &z.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "Backlog");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn bulk_rejects_malformed_requests_outright() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();
        let ids = vec![t.id.clone()];

        // No operation at all.
        assert!(matches!(
            e.bulk_update(&ids, None, false, &HashMap::new(), "a")
                .await
                .unwrap_err(),
            BoardError::Validation(_)
        ));
        // Unknown enum value aborts the whole call before any write.
        let fields = BulkFields {
            status: Some("Shipped".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            e.bulk_update(&ids, Some(fields), false, &HashMap::new(), "a")
                .await
                .unwrap_err(),
            BoardError::Validation(_)
        ));
        let stored = store::get(e.pool(), &t.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn bulk_delete_removes_tasks_and_their_trails() {
        let e = engine().await;
        let a = e.create_task(draft("A"), "alice").await.unwrap();
        let b = e.create_task(draft("B"), "alice").await.unwrap();

        let result = e
            .bulk_update(
                &[a.id.clone(), b.id.clone()],
                None,
                true,
                &HashMap::new(),
                "alice",
            )
            .await
            .unwrap();
        assert!(result.failed.is_empty());
        assert!(store::get(e.pool(), &a.id).await.unwrap().is_none());
        assert!(store::get(e.pool(), &b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn version_counts_successful_mutations_exactly() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();

        let mut version = t.version;
        for i in 0..3 {
            let patch = TaskPatch {
                estimate: Change::Set(i),
                ..Default::default()
            };
            version = e
                .update_task(&t.id, patch, version, "alice")
                .await
                .unwrap()
                .version;
        }
        assert_eq!(version, 4); // 1 + 3 successful mutations

        // A failed attempt in between does not consume a version.
        assert!(e
            .update_task(&t.id, TaskPatch::default(), 99, "alice")
            .await
            .is_err());
        let stored = store::get(e.pool(), &t.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 4);
    }

    #[tokio::test]
    async fn comments_version_on_write_and_log_no_body_text() {
        let e = engine().await;
        let t = e.create_task(draft("A"), "alice").await.unwrap();
        let c = e.add_comment(&t.id, "ship it", "bob").await.unwrap();
        assert_eq!(c.version, 1);

        let acts = activity::feed(e.pool(), Some(&t.id), Some("commented"), 50, 0)
            .await
            .unwrap();
        assert_eq!(acts.len(), 1);
        assert!(!acts[0].payload.contains("ship it"));

        let c = e.edit_comment(&c.id, "ship it now").await.unwrap();
        assert_eq!(c.version, 2);
        assert_eq!(c.body, "ship it now");

        assert!(matches!(
            e.add_comment("missing", "hi", "bob").await.unwrap_err(),
            BoardError::NotFound
        ));
    }
}
