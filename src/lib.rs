//! Student-records sidecar: grade-point aggregation, mark-sheet ingestion and
//! the small records surface around them, served as JSON lines over stdio.

pub mod analytics;
pub mod config;
pub mod db;
pub mod grading;
pub mod ingest;
pub mod ipc;
