//! Collaborative task board: tasks, activity trail, comments.
//!
//! The write path is the [`engine::MutationEngine`]; everything else is read
//! helpers over the same pool. All writes are optimistic: callers carry the
//! version they last read and conflicts surface as
//! [`error::BoardError::VersionConflict`].

pub mod activity;
pub mod engine;
pub mod error;
pub mod model;
pub mod ordering;
pub mod store;

pub use engine::MutationEngine;
pub use error::{BoardError, Result};
pub use model::{
    BulkFailure, BulkFields, BulkResult, Change, CommentRow, Priority, Status, TaskDraft,
    TaskPatch, TaskRow,
};
