use crate::analytics::{self, MarkView};
use crate::config::{self, IngestionPolicy};
use crate::db::{self, Student};
use crate::ingest::{self, IngestOptions};
use crate::ipc::helpers::{optional_str, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

const UPLOAD_MAX_ROWS: usize = 5000;

/// An explicit `maxMarks` must be usable; absent or null falls back to settings.
fn requested_max_marks(params: &Value) -> Result<Option<f64>, HandlerErr> {
    match params.get("maxMarks") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(m) if m.is_finite() && m > 0.0 => Ok(Some(m)),
            _ => Err(HandlerErr::bad_params("maxMarks must be a positive number")
                .with_details(json!({ "maxMarks": v }))),
        },
    }
}

fn marks_upload(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let rows = ingest::extract_rows(params)?;
    let max_marks = requested_max_marks(params)?;
    if rows.len() > UPLOAD_MAX_ROWS {
        return Err(HandlerErr::bad_params("upload exceeds max rows").with_details(json!({
            "rows": rows.len(),
            "maxRows": UPLOAD_MAX_ROWS
        })));
    }

    let settings =
        config::ingest_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let policy = match params.get("strict").and_then(|v| v.as_bool()) {
        Some(strict) => IngestionPolicy::from_strict(strict),
        None => settings.policy,
    };
    let options = IngestOptions {
        exam_type: settings.default_exam_type,
        max_marks: settings.default_max_marks,
        policy,
    }
    .with_overrides(
        params.get("examType").and_then(|v| v.as_str()),
        max_marks,
    );

    let summary = ingest::ingest_batch(&rows, &options, conn, conn)?;
    Ok(json!({
        "ok": true,
        "createdCount": summary.created_count,
        "problems": summary.skipped_diagnostics,
        "examType": options.exam_type,
        "maxMarks": options.max_marks,
    }))
}

fn marks_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mark_id = required_str(params, "markId")?;
    let scored = match params.get("scored").and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => return Err(HandlerErr::bad_params("scored must be a non-negative number")),
    };

    let updated = db::update_mark_scored(conn, mark_id, scored)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let Some(mark) = updated else {
        return Err(HandlerErr::new("not_found", "mark not found")
            .with_details(json!({ "markId": mark_id })));
    };
    info!(mark_id = %mark.id, scored, "mark updated");
    Ok(json!({ "mark": mark }))
}

fn resolve_student(conn: &Connection, params: &Value) -> Result<Student, HandlerErr> {
    let found = if let Some(register_no) = optional_str(params, "registerNo") {
        db::find_student_by_register_no(conn, register_no)
    } else if let Some(email) = optional_str(params, "email") {
        db::find_student_by_email(conn, email)
    } else {
        return Err(HandlerErr::bad_params("missing registerNo or email"));
    };

    found
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "no student record matches"))
}

fn marks_list_for_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student = resolve_student(conn, params)?;
    let marks = db::list_marks_for_student(conn, &student.id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let views: Vec<MarkView> = marks.iter().map(MarkView::from).collect();
    Ok(json!({ "student": student, "marks": views }))
}

fn marks_analytics(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student = resolve_student(conn, params)?;
    let marks = db::list_marks_for_student(conn, &student.id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({
        "student": student,
        "overview": analytics::overview(&marks),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let db = state.db.as_ref();
    let p = &req.params;
    match req.method.as_str() {
        "marks.upload" => Some(with_db(db, &req.id, |c| marks_upload(c, p))),
        "marks.update" => Some(with_db(db, &req.id, |c| marks_update(c, p))),
        "marks.listForStudent" => Some(with_db(db, &req.id, |c| marks_list_for_student(c, p))),
        "marks.analytics" => Some(with_db(db, &req.id, |c| marks_analytics(c, p))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn upload_uses_settings_defaults_and_request_overrides() {
        let conn = memory_db();
        db::insert_student(&conn, "R1", "One", None).unwrap();

        let out = marks_upload(
            &conn,
            &json!({ "rows": [{ "Register Number": "R1", "Maths": 40 }], "maxMarks": 50 }),
        )
        .unwrap();
        assert_eq!(out["createdCount"], 1);
        assert_eq!(out["examType"], "Internal");
        assert_eq!(out["maxMarks"], 50.0);
    }

    #[test]
    fn upload_rejects_unusable_max_marks_before_writing() {
        let conn = memory_db();
        db::insert_student(&conn, "R1", "One", None).unwrap();

        for bad in [json!(0), json!(-5), json!("ten")] {
            let e = marks_upload(
                &conn,
                &json!({ "rows": [{ "Register Number": "R1", "Maths": 40 }], "maxMarks": bad }),
            )
            .unwrap_err();
            assert_eq!(e.code, "bad_params");
            assert_eq!(e.details.unwrap()["maxMarks"], bad);
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM marks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let out = marks_upload(
            &conn,
            &json!({ "rows": [{ "Register Number": "R1", "Maths": 40 }], "maxMarks": null }),
        )
        .unwrap();
        assert_eq!(out["maxMarks"], 100.0);
    }

    #[test]
    fn upload_schema_error_maps_to_schema_code() {
        let conn = memory_db();
        let e = marks_upload(&conn, &json!([{ "Roll": "R1", "Maths": 40 }]))
            .unwrap_err();
        assert_eq!(e.code, "schema_error");
        assert_eq!(
            e.details.unwrap()["reason"],
            "missing-identifier-column"
        );
    }
}
