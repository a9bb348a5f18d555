use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

const TITLE_MAX_LEN: usize = 200;

fn handle_circulars_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    let content = req
        .params
        .get("content")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    if title.is_empty() || content.is_empty() {
        return err(&req.id, "bad_params", "title and content are required", None);
    }
    if title.len() > TITLE_MAX_LEN {
        return err(
            &req.id,
            "bad_params",
            format!("title length must be <= {}", TITLE_MAX_LEN),
            None,
        );
    }
    let author = req
        .params
        .get("author")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");

    match db::insert_circular(conn, title, content, author) {
        Ok(circular) => {
            info!(circular_id = %circular.id, "circular created");
            ok(&req.id, json!({ "circular": circular }))
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_circulars_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Nothing published yet when no workspace is open.
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "circulars": [] }));
    };
    match db::list_circulars(conn) {
        Ok(circulars) => ok(&req.id, json!({ "circulars": circulars })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "circulars.create" => Some(handle_circulars_create(state, req)),
        "circulars.list" => Some(handle_circulars_list(state, req)),
        _ => None,
    }
}
