use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, BatchError};
use chrono::NaiveDate;
use serde_json::json;

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT session_id, session_name, start_date, end_date
         FROM sessions ORDER BY session_id DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let session_id: i64 = row.get(0)?;
            let session_name: String = row.get(1)?;
            let start_date: String = row.get(2)?;
            let end_date: String = row.get(3)?;
            Ok(json!({
                "session_id": session_id,
                "session_name": session_name,
                "start_date": start_date,
                "end_date": end_date
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct SessionFields {
    name: String,
    start_date: String,
    end_date: String,
}

fn parse_session_fields(req: &Request) -> Result<SessionFields, serde_json::Value> {
    let name = match req.params.get("session_name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return Err(err(&req.id, "bad_params", "All fields are required.", None)),
    };
    let start_date = match req.params.get("start_date").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return Err(err(&req.id, "bad_params", "All fields are required.", None)),
    };
    let end_date = match req.params.get("end_date").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return Err(err(&req.id, "bad_params", "All fields are required.", None)),
    };

    let (Some(start), Some(end)) = (parse_iso_date(&start_date), parse_iso_date(&end_date)) else {
        return Err(err(
            &req.id,
            "bad_params",
            "dates must be YYYY-MM-DD",
            Some(json!({ "start_date": start_date, "end_date": end_date })),
        ));
    };
    if start > end {
        return Err(err(
            &req.id,
            "bad_params",
            "start_date must not be after end_date",
            None,
        ));
    }

    Ok(SessionFields {
        name,
        start_date,
        end_date,
    })
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let fields = match parse_session_fields(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    if let Err(e) = conn.execute(
        "INSERT INTO sessions(session_name, start_date, end_date) VALUES(?, ?, ?)",
        (&fields.name, &fields.start_date, &fields.end_date),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "session_id": conn.last_insert_rowid(),
            "session_name": fields.name,
            "start_date": fields.start_date,
            "end_date": fields.end_date
        }),
    )
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(session_id) = req.params.get("session_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing session_id", None);
    };
    let fields = match parse_session_fields(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    let changed = match conn.execute(
        "UPDATE sessions SET session_name = ?, start_date = ?, end_date = ? WHERE session_id = ?",
        (&fields.name, &fields.start_date, &fields.end_date, session_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };

    if changed == 0 {
        return err(&req.id, "not_found", "Session not found.", None);
    }

    ok(
        &req.id,
        json!({
            "session_id": session_id,
            "session_name": fields.name,
            "start_date": fields.start_date,
            "end_date": fields.end_date
        }),
    )
}

fn handle_sessions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(session_id) = req.params.get("session_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing session_id", None);
    };

    let changed = match conn.execute("DELETE FROM sessions WHERE session_id = ?", [session_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };

    if changed == 0 {
        return err(&req.id, "not_found", "Session not found.", None);
    }

    ok(&req.id, json!({ "message": "Session deleted successfully." }))
}

fn handle_sessions_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let today = (state.today)();
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match records::resolve_active_session(conn, today) {
        Ok(session_id) => ok(&req.id, json!({ "session_id": session_id })),
        Err(BatchError::NoActiveSession) => {
            err(&req.id, "not_found", "No active session found", None)
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        "sessions.delete" => Some(handle_sessions_delete(state, req)),
        "sessions.active" => Some(handle_sessions_active(state, req)),
        _ => None,
    }
}
