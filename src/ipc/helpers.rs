use crate::grading::GradeError;
use crate::ingest::{IngestError, SchemaError};
use crate::ipc::error::err;
use rusqlite::Connection;
use serde_json::{json, Value};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SchemaError> for HandlerErr {
    fn from(e: SchemaError) -> Self {
        HandlerErr::new("schema_error", e.hint()).with_details(json!({
            "reason": e.to_string(),
            "columns": e.columns(),
        }))
    }
}

impl From<IngestError> for HandlerErr {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::NoRows => HandlerErr::bad_params(e.to_string()),
            IngestError::Schema(s) => s.into(),
            IngestError::InvalidCells(ref cells) => {
                let details = json!({ "cells": cells });
                HandlerErr::new("validation_failed", e.to_string()).with_details(details)
            }
        }
    }
}

impl From<GradeError> for HandlerErr {
    fn from(e: GradeError) -> Self {
        match e {
            GradeError::UnknownGrade { ref grade, index } => {
                let details = json!({ "grade": grade, "index": index });
                HandlerErr::new("validation_failed", e.to_string()).with_details(details)
            }
            GradeError::InvalidBaseline(_) => HandlerErr::bad_params(e.to_string()),
        }
    }
}

pub fn require_db(db: Option<&Connection>) -> Result<&Connection, HandlerErr> {
    db.ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// A required string param, trimmed; blank counts as missing.
pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Runs a handler body against the open workspace and wraps the outcome in
/// the reply envelope.
pub fn with_db<F>(db: Option<&Connection>, id: &str, f: F) -> Value
where
    F: FnOnce(&Connection) -> Result<Value, HandlerErr>,
{
    match require_db(db).and_then(f) {
        Ok(result) => crate::ipc::error::ok(id, result),
        Err(e) => e.response(id),
    }
}
