use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, BatchError, MarkEntry};
use serde_json::json;
use tracing::error;

/// Pull `entries` out of params. A missing key, a non-array, or an empty
/// array all count as "no entries"; a present entry with a bad shape is a
/// distinct validation error so the caller can tell the two apart.
fn parse_entries(req: &Request) -> Result<Vec<MarkEntry>, serde_json::Value> {
    let raw = match req.params.get("entries") {
        Some(v) if v.is_array() => v.clone(),
        _ => return Err(err(&req.id, "bad_params", "No entries provided", None)),
    };
    if raw.as_array().map(|a| a.is_empty()).unwrap_or(true) {
        return Err(err(&req.id, "bad_params", "No entries provided", None));
    }
    serde_json::from_value::<Vec<MarkEntry>>(raw)
        .map_err(|e| err(&req.id, "bad_params", format!("invalid entry: {e}"), None))
}

fn handle_marks_by_class_subject_exam(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(
            &req.id,
            "bad_params",
            "Missing required query parameters.",
            None,
        );
    };
    let Some(subject_id) = req.params.get("subject_id").and_then(|v| v.as_i64()) else {
        return err(
            &req.id,
            "bad_params",
            "Missing required query parameters.",
            None,
        );
    };
    let exam_type = match req.params.get("exam_type").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "Missing required query parameters.",
                None,
            )
        }
    };

    // Whole roster, marks attached where they exist; unmarked students come
    // back with null mark fields.
    let mut stmt = match conn.prepare(
        "SELECT s.student_id, u.name AS student_name,
                m.marks_obtained, m.grade, m.on_leave
         FROM students s
         JOIN users u ON s.user_id = u.user_id
         JOIN student_classes sc ON sc.student_id = s.student_id
         LEFT JOIN marks m
           ON s.student_id = m.student_id
          AND m.class_id = ?1
          AND m.subject_id = ?2
          AND m.exam_type = ?3
         WHERE sc.class_id = ?1 AND s.is_current_student = 1
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((class_id, subject_id, &exam_type), |row| {
            let student_id: i64 = row.get(0)?;
            let student_name: String = row.get(1)?;
            let marks_obtained: Option<f64> = row.get(2)?;
            let grade: Option<String> = row.get(3)?;
            let on_leave: Option<bool> = row.get(4)?;
            Ok(json!({
                "student_id": student_id,
                "student_name": student_name,
                "marks_obtained": marks_obtained,
                "grade": grade,
                "on_leave": on_leave
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_marks_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let today = (state.today)();
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Resolve the session before any write; a batch must never land under a
    // stale or absent session id.
    let session_id = match records::resolve_active_session(conn, today) {
        Ok(v) => v,
        Err(BatchError::NoActiveSession) => {
            return err(&req.id, "not_found", "No active session found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match records::submit_marks(conn, session_id, &entries) {
        Ok(()) => ok(&req.id, json!({ "message": "Marks submitted successfully" })),
        Err(BatchError::NoEntries) => err(&req.id, "bad_params", "No entries provided", None),
        Err(e) => {
            // Full detail stays in the operator log; the caller gets a
            // generic failure with nothing row-level.
            error!(session_id, entries = entries.len(), error = %e, "marks submit failed");
            err(
                &req.id,
                "db_write_failed",
                "internal error while submitting marks",
                None,
            )
        }
    }
}

fn handle_marks_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match records::update_marks(conn, &entries) {
        Ok(()) => ok(&req.id, json!({ "message": "Marks updated successfully!" })),
        Err(BatchError::NoEntries) => err(&req.id, "bad_params", "No entries provided", None),
        Err(e) => {
            error!(entries = entries.len(), error = %e, "marks update failed");
            err(
                &req.id,
                "db_write_failed",
                "internal error while updating marks",
                None,
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.byClassSubjectExam" => Some(handle_marks_by_class_subject_exam(state, req)),
        "marks.submit" => Some(handle_marks_submit(state, req)),
        "marks.update" => Some(handle_marks_update(state, req)),
        _ => None,
    }
}
