use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, BatchError};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT u.user_id, u.name, u.email, u.mobile,
                t.teacher_id, t.is_class_teacher, c.class_name, t.class_id
         FROM teachers t
         JOIN users u ON t.user_id = u.user_id
         LEFT JOIN classes c ON t.class_id = c.class_id
         WHERE u.role = 'teacher'
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let user_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let email: Option<String> = row.get(2)?;
            let mobile: String = row.get(3)?;
            let teacher_id: i64 = row.get(4)?;
            let is_class_teacher: bool = row.get(5)?;
            let class_name: Option<String> = row.get(6)?;
            let class_id: Option<i64> = row.get(7)?;
            Ok(json!({
                "user_id": user_id,
                "name": name,
                "email": email,
                "mobile": mobile,
                "teacher_id": teacher_id,
                "is_class_teacher": is_class_teacher,
                "class_name": class_name,
                "class_id": class_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    // Blank email normalizes to NULL so the UNIQUE constraint only binds real
    // addresses.
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    // Only check email when one was given; NULL emails never collide.
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
        "INSERT INTO users(name, email, mobile, password, role) VALUES(?, ?, ?, ?, 'teacher')",
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

    if let Err(e) = tx.execute(
        "INSERT INTO teachers(user_id, is_class_teacher) VALUES(?, 0)",
        [user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "user_id": user_id, "message": "Teacher created successfully" }),
    )
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(user_id) = req.params.get("user_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing user_id", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let mobile = match req.params.get("mobile").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing mobile", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let changed = match conn.execute(
        "UPDATE users SET name = ?, email = ?, mobile = ? WHERE user_id = ?",
        (&name, &email, &mobile, user_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };

    if changed == 0 {
        return err(&req.id, "not_found", "Teacher not found", None);
    }

    ok(&req.id, json!({ "message": "Teacher updated successfully" }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(user_id) = req.params.get("user_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing user_id", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Teacher row first (foreign key to users).
    if let Err(e) = tx.execute("DELETE FROM teachers WHERE user_id = ?", [user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    let changed = match tx.execute("DELETE FROM users WHERE user_id = ?", [user_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            );
        }
    };

    if changed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "Teacher not found", None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "message": "Teacher deleted successfully" }))
}

fn handle_teachers_unassigned(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT u.user_id, u.name
         FROM teachers t
         JOIN users u ON t.user_id = u.user_id
         WHERE t.is_class_teacher = 0
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let user_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "user_id": user_id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_assign_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let today = (state.today)();
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(
            &req.id,
            "bad_params",
            "Missing class_id, subject_id or teacher_id",
            None,
        );
    };
    let Some(subject_id) = req.params.get("subject_id").and_then(|v| v.as_i64()) else {
        return err(
            &req.id,
            "bad_params",
            "Missing class_id, subject_id or teacher_id",
            None,
        );
    };
    let Some(teacher_id) = req.params.get("teacher_id").and_then(|v| v.as_i64()) else {
        return err(
            &req.id,
            "bad_params",
            "Missing class_id, subject_id or teacher_id",
            None,
        );
    };

    let session_id = match records::resolve_active_session(conn, today) {
        Ok(v) => v,
        Err(BatchError::NoActiveSession) => {
            return err(&req.id, "not_found", "No active session found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One teacher per (class, subject) within a session; reassignment
    // replaces the previous teacher.
    if let Err(e) = conn.execute(
        "INSERT INTO teacher_assignments(class_id, subject_id, teacher_id, session_id)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, subject_id, session_id)
         DO UPDATE SET teacher_id = excluded.teacher_id",
        (class_id, subject_id, teacher_id, session_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_assignments" })),
        );
    }

    ok(
        &req.id,
        json!({ "message": "Subject teacher assigned successfully" }),
    )
}

fn handle_teachers_subject_mappings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let today = (state.today)();
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match records::resolve_active_session(conn, today) {
        Ok(v) => v,
        Err(BatchError::NoActiveSession) => {
            return err(&req.id, "not_found", "No active session found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut class_stmt =
        match conn.prepare("SELECT class_id, class_name FROM classes ORDER BY grade, section") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let classes = match class_stmt
        .query_map([], |row| {
            let class_id: i64 = row.get(0)?;
            let class_name: String = row.get(1)?;
            Ok((class_id, class_name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut assign_stmt = match conn.prepare(
        "SELECT s.subject_id, s.subject_name, t.teacher_id, u.name AS teacher_name
         FROM teacher_assignments ta
         JOIN teachers t ON ta.teacher_id = t.teacher_id
         JOIN subjects s ON ta.subject_id = s.subject_id
         JOIN users u ON u.user_id = t.user_id
         WHERE ta.class_id = ? AND ta.session_id = ?
         ORDER BY s.subject_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut mappings: Vec<serde_json::Value> = Vec::with_capacity(classes.len());
    for (class_id, class_name) in classes {
        let subject_teacher = assign_stmt
            .query_map((class_id, session_id), |row| {
                let subject_id: i64 = row.get(0)?;
                let subject_name: String = row.get(1)?;
                let teacher_id: i64 = row.get(2)?;
                let teacher_name: String = row.get(3)?;
                Ok(json!({
                    "subject_id": subject_id,
                    "subject_name": subject_name,
                    "teacher_id": teacher_id,
                    "teacher_name": teacher_name
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());

        match subject_teacher {
            Ok(subject_teacher) => mappings.push(json!({
                "class_id": class_id,
                "class_name": class_name,
                "subject_teacher": subject_teacher
            })),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(&req.id, json!({ "mappings": mappings }))
}

fn handle_teachers_class_teacher_mappings(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let today = (state.today)();
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match records::resolve_active_session(conn, today) {
        Ok(v) => v,
        Err(BatchError::NoActiveSession) => {
            return err(&req.id, "not_found", "No active session found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT c.class_name, u.name AS class_teacher, s.subject_name, c.class_id, t.teacher_id
         FROM teacher_assignments ta
         JOIN teachers t ON ta.teacher_id = t.teacher_id
         JOIN users u ON t.user_id = u.user_id
         JOIN classes c ON ta.class_id = c.class_id
         JOIN subjects s ON ta.subject_id = s.subject_id
         WHERE ta.session_id = ? AND t.is_class_teacher = 1",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([session_id], |row| {
            let class_name: String = row.get(0)?;
            let class_teacher: String = row.get(1)?;
            let subject_name: String = row.get(2)?;
            let class_id: i64 = row.get(3)?;
            let teacher_id: i64 = row.get(4)?;
            Ok(json!({
                "class_name": class_name,
                "class_teacher": class_teacher,
                "subject_name": subject_name,
                "class_id": class_id,
                "teacher_id": teacher_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(mappings) => ok(&req.id, json!({ "mappings": mappings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_assign_class_teacher(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let today = (state.today)();
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };
    let Some(user_id) = req.params.get("user_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing user_id", None);
    };
    let Some(subject_id) = req.params.get("subject_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing subject_id", None);
    };

    let session_id = match records::resolve_active_session(conn, today) {
        Ok(v) => v,
        Err(BatchError::NoActiveSession) => {
            return err(&req.id, "not_found", "No active session found.", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT teacher_id FROM teachers WHERE class_id = ? AND is_class_teacher = 1",
            [class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(
            &req.id,
            "conflict",
            "This class already has a class teacher assigned.",
            None,
        );
    }

    let teacher_id: Option<i64> = match conn
        .query_row(
            "SELECT teacher_id FROM teachers WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(teacher_id) = teacher_id else {
        return err(&req.id, "bad_params", "Invalid teacher user ID.", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE teachers SET is_class_teacher = 1, class_id = ? WHERE user_id = ?",
        (class_id, user_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_write_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    if let Err(e) = tx.execute(
        "INSERT INTO teacher_assignments(teacher_id, class_id, subject_id, session_id)
         VALUES(?, ?, ?, ?)",
        (teacher_id, class_id, subject_id, session_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_assignments" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "message": "Class teacher mapped and assignment created successfully." }),
    )
}

fn handle_teachers_unassign_class_teacher(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(class_id) = req.params.get("class_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };
    let Some(teacher_id) = req.params.get("teacher_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing teacher_id", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM teacher_assignments WHERE class_id = ? AND teacher_id = ?",
        (class_id, teacher_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_assignments" })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE teachers SET is_class_teacher = 0, class_id = NULL WHERE teacher_id = ?",
        [teacher_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_write_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "message": "Class teacher unassigned successfully." }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "teachers.unassigned" => Some(handle_teachers_unassigned(state, req)),
        "teachers.assignSubject" => Some(handle_teachers_assign_subject(state, req)),
        "teachers.subjectMappings" => Some(handle_teachers_subject_mappings(state, req)),
        "teachers.classTeacherMappings" => {
            Some(handle_teachers_class_teacher_mappings(state, req))
        }
        "teachers.assignClassTeacher" => Some(handle_teachers_assign_class_teacher(state, req)),
        "teachers.unassignClassTeacher" => {
            Some(handle_teachers_unassign_class_teacher(state, req))
        }
        _ => None,
    }
}
