use crate::db::{self, TimetableEntry, WEEKDAYS};
use crate::ipc::helpers::{optional_str, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

const MAX_PERIODS_PER_DAY: i64 = 16;

fn canonical_day(raw: &str) -> Option<&'static str> {
    WEEKDAYS
        .iter()
        .copied()
        .find(|d| d.eq_ignore_ascii_case(raw.trim()))
}

fn timetable_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let day_raw = required_str(params, "day")?;
    let Some(day) = canonical_day(day_raw) else {
        return Err(HandlerErr::bad_params("day must be a weekday name")
            .with_details(json!({ "day": day_raw })));
    };
    let period = match params.get("period").and_then(|v| v.as_i64()) {
        Some(p) if (1..=MAX_PERIODS_PER_DAY).contains(&p) => p,
        _ => {
            return Err(HandlerErr::bad_params(format!(
                "period must be an integer in 1..={}",
                MAX_PERIODS_PER_DAY
            )))
        }
    };
    let subject = required_str(params, "subject")?;

    let entry = TimetableEntry {
        id: optional_str(params, "id").unwrap_or("").to_string(),
        day: day.to_string(),
        period,
        subject: subject.to_string(),
        room: optional_str(params, "room").map(str::to_string),
    };

    let saved = db::upsert_timetable_entry(conn, &entry)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    match saved {
        Some(entry) => Ok(json!({ "entry": entry })),
        None => Err(HandlerErr::new("not_found", "timetable entry not found")
            .with_details(json!({ "id": entry.id }))),
    }
}

/// Entries grouped per weekday, each day ordered by period.
fn timetable_get(conn: &Connection) -> Result<Value, HandlerErr> {
    let entries = db::list_timetable(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut days: Vec<Value> = Vec::new();
    let mut current: Option<(String, Vec<TimetableEntry>)> = None;
    for entry in entries {
        match current.as_mut() {
            Some((day, list)) if *day == entry.day => list.push(entry),
            _ => {
                if let Some((day, list)) = current.take() {
                    days.push(json!({ "day": day, "entries": list }));
                }
                current = Some((entry.day.clone(), vec![entry]));
            }
        }
    }
    if let Some((day, list)) = current {
        days.push(json!({ "day": day, "entries": list }));
    }

    Ok(json!({ "days": days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let db = state.db.as_ref();
    match req.method.as_str() {
        "timetable.upsert" => Some(with_db(db, &req.id, |c| timetable_upsert(c, &req.params))),
        "timetable.get" => Some(with_db(db, &req.id, timetable_get)),
        _ => None,
    }
}
