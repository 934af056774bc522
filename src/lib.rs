//! taskboard — collaborative task tracking over SQLite.
//!
//! Library surface: [`storage::Storage`] opens the database, and
//! [`board::MutationEngine`] is the single write path for tasks, comments,
//! and the per-task activity trail.

pub mod board;
pub mod config;
pub mod storage;
