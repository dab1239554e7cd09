use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, BatchError};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use tracing::error;

fn class_ids_for_grade(conn: &Connection, grade: i64) -> Result<Vec<i64>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT class_id FROM classes WHERE grade = ? ORDER BY section ASC")?;
    let ids = stmt
        .query_map([grade], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt =
        match conn.prepare("SELECT subject_id, subject_name FROM subjects ORDER BY subject_id") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

    let rows = stmt
        .query_map([], |row| {
            let subject_id: i64 = row.get(0)?;
            let subject_name: String = row.get(1)?;
            Ok(json!({ "subject_id": subject_id, "subject_name": subject_name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_name = match req.params.get("subject_name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subject_name", None),
    };

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT subject_id FROM subjects WHERE subject_name = ?",
            [&subject_name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "Subject already exists", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO subjects(subject_name) VALUES(?)",
        [&subject_name],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({
            "subject_id": conn.last_insert_rowid(),
            "subject_name": subject_name
        }),
    )
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(subject_id) = req.params.get("subject_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing subject_id", None);
    };

    if let Err(e) = conn.execute("DELETE FROM subjects WHERE subject_id = ?", [subject_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    ok(&req.id, json!({}))
}

fn handle_subjects_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.subject_id, s.subject_name
         FROM class_subjects cs
         JOIN subjects s ON cs.subject_id = s.subject_id
         WHERE cs.class_id = ?
         ORDER BY s.subject_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([class_id], |row| {
            let subject_id: i64 = row.get(0)?;
            let subject_name: String = row.get(1)?;
            Ok(json!({ "subject_id": subject_id, "subject_name": subject_name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_mapped_for_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(grade) = req.params.get("grade").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing grade", None);
    };

    let class_ids = match class_ids_for_grade(conn, grade) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Classes of one grade share a mapping set, so the first class stands in
    // for the whole grade.
    let Some(sample_class_id) = class_ids.first() else {
        return err(&req.id, "not_found", "No classes found for this grade.", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.subject_id, s.subject_name
         FROM class_subjects cs
         JOIN subjects s ON cs.subject_id = s.subject_id
         WHERE cs.class_id = ?
         ORDER BY s.subject_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([sample_class_id], |row| {
            let subject_id: i64 = row.get(0)?;
            let subject_name: String = row.get(1)?;
            Ok(json!({ "subject_id": subject_id, "subject_name": subject_name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_mapping_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut class_stmt = match conn
        .prepare("SELECT class_id, grade, section FROM classes ORDER BY grade, section")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let classes = match class_stmt
        .query_map([], |row| {
            let class_id: i64 = row.get(0)?;
            let grade: i64 = row.get(1)?;
            let section: String = row.get(2)?;
            Ok((class_id, grade, section))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut map_stmt = match conn.prepare(
        "SELECT cs.class_id, s.subject_name
         FROM class_subjects cs
         JOIN subjects s ON cs.subject_id = s.subject_id
         ORDER BY s.subject_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut subjects_by_class: HashMap<i64, Vec<String>> = HashMap::new();
    let map_rows = map_stmt.query_map([], |row| {
        let class_id: i64 = row.get(0)?;
        let subject_name: String = row.get(1)?;
        Ok((class_id, subject_name))
    });
    match map_rows {
        Ok(it) => {
            for r in it.flatten() {
                subjects_by_class.entry(r.0).or_default().push(r.1);
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let summary: Vec<serde_json::Value> = classes
        .into_iter()
        .map(|(class_id, grade, section)| {
            json!({
                "grade": grade,
                "section": section,
                "subjects": subjects_by_class.remove(&class_id).unwrap_or_default()
            })
        })
        .collect();

    ok(&req.id, json!({ "summary": summary }))
}

fn handle_subjects_map(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(grade) = req.params.get("grade").and_then(|v| v.as_i64()) else {
        return err(
            &req.id,
            "bad_params",
            "Grade and subject_ids are required.",
            None,
        );
    };
    let subject_ids: Vec<i64> = match req.params.get("subject_ids").and_then(|v| v.as_array()) {
        Some(arr) if !arr.is_empty() => {
            let mut ids = Vec::with_capacity(arr.len());
            for v in arr {
                match v.as_i64() {
                    Some(id) => ids.push(id),
                    None => {
                        return err(
                            &req.id,
                            "bad_params",
                            "subject_ids must be integers",
                            Some(json!({ "value": v })),
                        )
                    }
                }
            }
            ids
        }
        _ => {
            return err(
                &req.id,
                "bad_params",
                "Grade and subject_ids are required.",
                None,
            )
        }
    };

    let class_ids = match class_ids_for_grade(conn, grade) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_ids.is_empty() {
        return err(&req.id, "not_found", "No classes found for this grade.", None);
    }

    match records::replace_class_subjects(conn, &class_ids, &subject_ids) {
        Ok(()) => ok(&req.id, json!({ "message": "Subjects mapped successfully." })),
        Err(BatchError::NoEntries) => err(
            &req.id,
            "bad_params",
            "Grade and subject_ids are required.",
            None,
        ),
        Err(e) => {
            error!(grade, error = %e, "subject mapping replace failed");
            err(
                &req.id,
                "db_write_failed",
                "internal error while mapping subjects",
                None,
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.forClass" => Some(handle_subjects_for_class(state, req)),
        "subjects.mappedForGrade" => Some(handle_subjects_mapped_for_grade(state, req)),
        "subjects.mappingSummary" => Some(handle_subjects_mapping_summary(state, req)),
        "subjects.map" => Some(handle_subjects_map(state, req)),
        _ => None,
    }
}
