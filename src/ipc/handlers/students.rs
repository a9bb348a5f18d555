use crate::db;
use crate::ipc::helpers::{optional_str, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let register_no = required_str(params, "registerNo")?;
    let name = required_str(params, "name")?;
    let email = optional_str(params, "email");

    let existing = db::find_student_by_register_no(conn, register_no)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if existing.is_some() {
        return Err(HandlerErr::new("conflict", "register number already exists")
            .with_details(json!({ "registerNo": register_no })));
    }

    let student = db::insert_student(conn, register_no, name, email)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    info!(register_no = %student.register_no, "student created");
    Ok(json!({ "student": student }))
}

fn students_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let students = db::list_students(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_set_locked(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let Some(locked) = params.get("locked").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("locked must be boolean"));
    };

    let found = db::set_student_locked(conn, student_id, locked)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if !found {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    Ok(json!({ "studentId": student_id, "profileLocked": locked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let db = state.db.as_ref();
    match req.method.as_str() {
        "students.create" => Some(with_db(db, &req.id, |c| students_create(c, &req.params))),
        "students.list" => Some(with_db(db, &req.id, students_list)),
        "students.setLocked" => {
            Some(with_db(db, &req.id, |c| students_set_locked(c, &req.params)))
        }
        _ => None,
    }
}
