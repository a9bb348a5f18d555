use crate::config::{self, IngestionPolicy};
use crate::grading::{self, SubjectRecord, GRADE_SCALE};
use crate::ipc::error::ok;
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_subjects(params: &Value) -> Result<Vec<SubjectRecord>, HandlerErr> {
    let raw = params
        .get("subjects")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    serde_json::from_value(raw).map_err(|e| {
        HandlerErr::bad_params(format!(
            "subjects must be a list of {{credits, grade}}: {}",
            e
        ))
    })
}

fn parse_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

/// An explicit `strict` flag wins; otherwise the workspace setting decides.
/// Without a workspace the calculator stays lenient.
fn resolve_policy(conn: Option<&Connection>, params: &Value) -> Result<IngestionPolicy, HandlerErr> {
    if let Some(strict) = params.get("strict").and_then(|v| v.as_bool()) {
        return Ok(IngestionPolicy::from_strict(strict));
    }
    match conn {
        Some(conn) => config::grading_settings(conn)
            .map(|s| s.policy())
            .map_err(|e| HandlerErr::db("db_query_failed", e)),
        None => Ok(IngestionPolicy::Lenient),
    }
}

fn gpa_term(conn: Option<&Connection>, params: &Value) -> Result<Value, HandlerErr> {
    let subjects = parse_subjects(params)?;
    let policy = resolve_policy(conn, params)?;
    let sgpa = grading::compute_term_average(&subjects, policy)?;
    Ok(json!({ "sgpa": sgpa, "subjectCount": subjects.len() }))
}

fn gpa_cumulative(conn: Option<&Connection>, params: &Value) -> Result<Value, HandlerErr> {
    let subjects = parse_subjects(params)?;
    let prior_credits = parse_f64(params, "priorCredits")?;
    let prior_average = parse_f64(params, "priorAverage")?;
    let policy = resolve_policy(conn, params)?;
    let cgpa =
        grading::compute_cumulative_average(&subjects, prior_credits, prior_average, policy)?;
    Ok(json!({ "cgpa": cgpa }))
}

fn grades_scale() -> Value {
    let grades: Vec<Value> = GRADE_SCALE
        .iter()
        .map(|(grade, points)| json!({ "grade": grade, "points": points }))
        .collect();
    json!({ "grades": grades })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let conn = state.db.as_ref();
    let result = match req.method.as_str() {
        "gpa.term" => gpa_term(conn, &req.params),
        "gpa.cumulative" => gpa_cumulative(conn, &req.params),
        "grades.scale" => Ok(grades_scale()),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
