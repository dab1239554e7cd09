use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_students_by_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "Missing class_id", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.student_id, u.name AS student_name
         FROM students s
         JOIN users u ON s.user_id = u.user_id
         JOIN student_classes sc ON sc.student_id = s.student_id
         WHERE sc.class_id = ? AND s.is_current_student = 1
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([class_id], |row| {
            let student_id: i64 = row.get(0)?;
            let student_name: String = row.get(1)?;
            Ok(json!({ "student_id": student_id, "student_name": student_name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let mobile = match req.params.get("mobile").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing mobile", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing password", None),
    };
    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let class_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes WHERE class_id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "Class not found", None);
    }

    let lookup = match &email {
        Some(email) => conn
            .query_row(
                "SELECT user_id FROM users WHERE mobile = ? OR email = ?",
                (&mobile, email),
                |r| r.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT user_id FROM users WHERE mobile = ?",
                [&mobile],
                |r| r.get(0),
            )
            .optional(),
    };
    let existing: Option<i64> = match lookup {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "User already exists", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO users(name, email, mobile, password, role) VALUES(?, ?, ?, ?, 'student')",
        (&name, &email, &mobile, &password),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    let user_id = tx.last_insert_rowid();

    if let Err(e) = tx.execute("INSERT INTO students(user_id) VALUES(?)", [user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    let student_id = tx.last_insert_rowid();

    if let Err(e) = tx.execute(
        "INSERT INTO student_classes(student_id, class_id) VALUES(?, ?)",
        (student_id, class_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "student_id": student_id, "user_id": user_id }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.byClass" => Some(handle_students_by_class(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
