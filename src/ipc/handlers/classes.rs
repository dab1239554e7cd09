use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT class_id, class_name, grade, section FROM classes ORDER BY grade, section",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let class_id: i64 = row.get(0)?;
            let class_name: String = row.get(1)?;
            let grade: i64 = row.get(2)?;
            let section: String = row.get(3)?;
            Ok(json!({
                "class_id": class_id,
                "class_name": class_name,
                "grade": grade,
                "section": section
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_name = match req.params.get("class_name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "Missing fields", None),
    };
    let Some(grade) = req.params.get("grade").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "Missing fields", None);
    };
    let section = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "Missing fields", None),
    };

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT class_id FROM classes WHERE class_name = ?",
            [&class_name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "Class already exists", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO classes(class_name, grade, section) VALUES(?, ?, ?)",
        (&class_name, grade, &section),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({
            "class_id": conn.last_insert_rowid(),
            "class_name": class_name,
            "grade": grade,
            "section": section
        }),
    )
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };

    let changed = match conn.execute("DELETE FROM classes WHERE class_id = ?", [class_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };

    if changed == 0 {
        return err(&req.id, "not_found", "Class not found", None);
    }

    ok(&req.id, json!({ "message": "Class deleted successfully" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
