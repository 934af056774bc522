//! Board data model: workflow enums, row types, and mutation payloads.

use serde::{Deserialize, Deserializer, Serialize};

use super::error::BoardError;

/// Generate a new row ID.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Workflow enums ───────────────────────────────────────────────────────────

/// Status lanes. Free-form labels, not a guarded workflow — any status may
/// move to any other, including backward; Done is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Backlog,
    Ready,
    #[serde(rename = "In Progress")]
    InProgress,
    Review,
    Done,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Backlog,
        Status::Ready,
        Status::InProgress,
        Status::Review,
        Status::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Backlog => "Backlog",
            Status::Ready => "Ready",
            Status::InProgress => "In Progress",
            Status::Review => "Review",
            Status::Done => "Done",
        }
    }

    pub fn parse(s: &str) -> Result<Status, BoardError> {
        Status::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| BoardError::validation(format!("unknown status: {s}")))
    }
}

/// Priority P0 (highest) through P3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }

    pub fn parse(s: &str) -> Result<Priority, BoardError> {
        Priority::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| BoardError::validation(format!("unknown priority: {s}")))
    }
}

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub owner: Option<String>,
    /// JSON object of free-form string-keyed tags.
    pub tags: String,
    pub estimate: Option<i64>,
    pub ordering_index: f64,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ActivityRow {
    pub id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub activity_type: String,
    /// JSON object describing what changed; shape varies by type.
    pub payload: String,
    pub actor: String,
    pub activity_seq: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub task_id: String,
    pub body: String,
    pub actor: String,
    pub version: i64,
    pub created_at: String,
}

// ─── Mutation payloads ────────────────────────────────────────────────────────

/// Payload for creating a task. Unset fields take server defaults;
/// `ordering_index = None` (or 0.0) means "assign end-of-lane".
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub estimate: Option<i64>,
    #[serde(default)]
    pub ordering_index: Option<f64>,
}

/// Three-state field change: distinguishes "leave alone" from "set to null".
///
/// In JSON, an absent key is `Unchanged`, an explicit `null` is `Clear`, and
/// any other value is `Set`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Change<T> {
    #[default]
    Unchanged,
    Set(T),
    Clear,
}

impl<T> Change<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Change::Unchanged)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Change<T> {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        // Only reached when the key is present; #[serde(default)] covers absence.
        Ok(match Option::<T>::deserialize(de)? {
            Some(v) => Change::Set(v),
            None => Change::Clear,
        })
    }
}

/// Sparse update: only fields carrying `Set`/`Clear` indicate intent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Change<String>,
    #[serde(default)]
    pub description: Change<String>,
    #[serde(default)]
    pub status: Change<String>,
    #[serde(default)]
    pub priority: Change<String>,
    #[serde(default)]
    pub owner: Change<String>,
    #[serde(default)]
    pub tags: Change<serde_json::Value>,
    #[serde(default)]
    pub estimate: Change<i64>,
    #[serde(default)]
    pub ordering_index: Change<f64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_unchanged()
            && self.description.is_unchanged()
            && self.status.is_unchanged()
            && self.priority.is_unchanged()
            && self.owner.is_unchanged()
            && self.tags.is_unchanged()
            && self.estimate.is_unchanged()
            && self.ordering_index.is_unchanged()
    }
}

/// Uniform field-set applied to every task in a bulk update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkFields {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl BulkFields {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.priority.is_none() && self.owner.is_none()
    }
}

/// One failed item in a bulk response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

/// Bulk outcome: every success committed together; failures reported per item.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkResult {
    pub updated: Vec<TaskRow>,
    pub failed: Vec<BulkFailure>,
}
