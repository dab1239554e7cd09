use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Which statement a profile update runs. The credential column is only
/// touched when the caller actually sent a new value; the two shapes are
/// fixed statements, never an assembled field list.
enum ProfileUpdate<'a> {
    WithCredential(&'a str),
    Profile,
}

fn run_profile_update(
    conn: &Connection,
    user_id: i64,
    name: &str,
    email: Option<&str>,
    mobile: &str,
    update: ProfileUpdate<'_>,
) -> Result<usize, rusqlite::Error> {
    match update {
        ProfileUpdate::WithCredential(password) => conn.execute(
            "UPDATE users SET name = ?, email = ?, mobile = ?, password = ? WHERE user_id = ?",
            (name, email, mobile, password, user_id),
        ),
        ProfileUpdate::Profile => conn.execute(
            "UPDATE users SET name = ?, email = ?, mobile = ? WHERE user_id = ?",
            (name, email, mobile, user_id),
        ),
    }
}

fn handle_users_admin_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(user_id) = req.params.get("user_id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing user_id", None);
    };

    let row = match conn
        .query_row(
            "SELECT user_id, name, email, mobile, role FROM users WHERE user_id = ?",
            [user_id],
            |r| {
                let user_id: i64 = r.get(0)?;
                let name: String = r.get(1)?;
                let email: Option<String> = r.get(2)?;
                let mobile: String = r.get(3)?;
                let role: String = r.get(4)?;
                Ok((user_id, name, email, mobile, role))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((user_id, name, email, mobile, role)) = row else {
        return err(&req.id, "not_found", "User not found", None);
    };
    if role != "admin" {
        return err(&req.id, "forbidden", "Access denied. Not an admin user.", None);
    }

    // Credential column never leaves the store.
    ok(
        &req.id,
        json!({
            "user_id": user_id,
            "name": name,
            "email": email,
            "mobile": mobile,
            "role": role
        }),
    )
}

fn handle_users_update_me(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty());

    let current = match conn
        .query_row(
            "SELECT email, mobile FROM users WHERE user_id = ?",
            [user_id],
            |r| {
                let email: Option<String> = r.get(0)?;
                let mobile: String = r.get(1)?;
                Ok((email, mobile))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current_email, current_mobile)) = current else {
        return err(&req.id, "not_found", "User not found", None);
    };

    // Uniqueness only needs re-checking when the identity fields change.
    if email != current_email || mobile != current_mobile {
        let clash: Option<i64> = match conn
            .query_row(
                "SELECT user_id FROM users
                 WHERE (email = ? OR mobile = ?) AND user_id != ?",
                (&email, &mobile, user_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if clash.is_some() {
            return err(
                &req.id,
                "conflict",
                "Email or mobile number already in use by another user",
                None,
            );
        }
    }

    let update = match password {
        Some(p) => ProfileUpdate::WithCredential(p),
        None => ProfileUpdate::Profile,
    };

    if let Err(e) = run_profile_update(conn, user_id, &name, email.as_deref(), &mobile, update) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "message": "User updated successfully" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.adminProfile" => Some(handle_users_admin_profile(state, req)),
        "users.updateMe" => Some(handle_users_update_me(state, req)),
        _ => None,
    }
}
