use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use thiserror::Error;

/// One row of a marks batch. The natural key is
/// (student, subject, class, session, exam type); the rest is payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkEntry {
    pub student_id: i64,
    pub subject_id: i64,
    pub class_id: i64,
    pub exam_type: String,
    pub marks_obtained: f64,
    pub total_marks: f64,
    pub grade: String,
    #[serde(default)]
    pub on_leave: bool,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no entries provided")]
    NoEntries,
    #[error("no active session found")]
    NoActiveSession,
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

/// Find the session whose [start_date, end_date] covers `today`.
///
/// Ranges are assumed non-overlapping upstream; if they do overlap, the
/// lowest session id wins.
pub fn resolve_active_session(conn: &Connection, today: NaiveDate) -> Result<i64, BatchError> {
    let day = today.format("%Y-%m-%d").to_string();
    let id: Option<i64> = conn
        .query_row(
            "SELECT session_id FROM sessions
             WHERE start_date <= ?1 AND end_date >= ?1
             ORDER BY session_id LIMIT 1",
            [&day],
            |r| r.get(0),
        )
        .optional()?;
    id.ok_or(BatchError::NoActiveSession)
}

/// Apply a marks batch as one transaction.
///
/// Entries run in input order; each upserts on the natural key, replacing the
/// non-key attributes. The transaction rolls back on drop if any statement
/// fails, so either every entry lands or none do. The caller resolves the
/// session before calling; no writes happen without one.
pub fn submit_marks(
    conn: &Connection,
    session_id: i64,
    entries: &[MarkEntry],
) -> Result<(), BatchError> {
    if entries.is_empty() {
        return Err(BatchError::NoEntries);
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO marks(
                 student_id, subject_id, class_id, session_id,
                 exam_type, marks_obtained, total_marks, grade, on_leave
             )
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, class_id, session_id, exam_type)
             DO UPDATE SET
               marks_obtained = excluded.marks_obtained,
               total_marks = excluded.total_marks,
               grade = excluded.grade,
               on_leave = excluded.on_leave",
        )?;
        for e in entries {
            stmt.execute((
                e.student_id,
                e.subject_id,
                e.class_id,
                session_id,
                &e.exam_type,
                e.marks_obtained,
                e.total_marks,
                &e.grade,
                e.on_leave,
            ))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Batch-update existing marks, matching on (student, class, subject, exam
/// type) without a session: rows under any session that fit the partial key
/// are touched. Same all-or-nothing contract as [`submit_marks`].
pub fn update_marks(conn: &Connection, entries: &[MarkEntry]) -> Result<(), BatchError> {
    if entries.is_empty() {
        return Err(BatchError::NoEntries);
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "UPDATE marks
             SET marks_obtained = ?, total_marks = ?, grade = ?, on_leave = ?
             WHERE student_id = ? AND class_id = ? AND subject_id = ? AND exam_type = ?",
        )?;
        for e in entries {
            stmt.execute((
                e.marks_obtained,
                e.total_marks,
                &e.grade,
                e.on_leave,
                e.student_id,
                e.class_id,
                e.subject_id,
                &e.exam_type,
            ))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Replace every class-subject mapping for `class_ids` with the
/// (class x subject) cross product, in one transaction. Blind
/// delete-then-insert: concurrent replaces over overlapping grades race at
/// the store and the last commit wins.
pub fn replace_class_subjects(
    conn: &Connection,
    class_ids: &[i64],
    subject_ids: &[i64],
) -> Result<(), BatchError> {
    if subject_ids.is_empty() {
        return Err(BatchError::NoEntries);
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut del = tx.prepare("DELETE FROM class_subjects WHERE class_id = ?")?;
        for class_id in class_ids {
            del.execute([class_id])?;
        }

        let mut ins = tx.prepare("INSERT INTO class_subjects(class_id, subject_id) VALUES(?, ?)")?;
        for class_id in class_ids {
            for subject_id in subject_ids {
                ins.execute((class_id, subject_id))?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn seed_session(conn: &Connection, name: &str, start: &str, end: &str) -> i64 {
        conn.execute(
            "INSERT INTO sessions(session_name, start_date, end_date) VALUES(?, ?, ?)",
            (name, start, end),
        )
        .expect("insert session");
        conn.last_insert_rowid()
    }

    fn seed_student(conn: &Connection, name: &str, mobile: &str) -> i64 {
        conn.execute(
            "INSERT INTO users(name, mobile, password, role) VALUES(?, ?, 'x', 'student')",
            (name, mobile),
        )
        .expect("insert user");
        let user_id = conn.last_insert_rowid();
        conn.execute("INSERT INTO students(user_id) VALUES(?)", [user_id])
            .expect("insert student");
        conn.last_insert_rowid()
    }

    fn seed_class(conn: &Connection, name: &str, grade: i64, section: &str) -> i64 {
        conn.execute(
            "INSERT INTO classes(class_name, grade, section) VALUES(?, ?, ?)",
            (name, grade, section),
        )
        .expect("insert class");
        conn.last_insert_rowid()
    }

    fn seed_subject(conn: &Connection, name: &str) -> i64 {
        conn.execute("INSERT INTO subjects(subject_name) VALUES(?)", [name])
            .expect("insert subject");
        conn.last_insert_rowid()
    }

    fn entry(student_id: i64, subject_id: i64, class_id: i64, obtained: f64) -> MarkEntry {
        MarkEntry {
            student_id,
            subject_id,
            class_id,
            exam_type: "midterm".to_string(),
            marks_obtained: obtained,
            total_marks: 50.0,
            grade: "A".to_string(),
            on_leave: false,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("parse date")
    }

    fn mark_row(conn: &Connection, student_id: i64) -> Option<(f64, f64, String, bool)> {
        conn.query_row(
            "SELECT marks_obtained, total_marks, grade, on_leave FROM marks WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .expect("query mark")
    }

    #[test]
    fn resolver_picks_covering_session() {
        let conn = test_conn();
        seed_session(&conn, "2024-25", "2024-04-01", "2025-03-31");
        let id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");

        let got = resolve_active_session(&conn, date("2025-06-15")).expect("resolve");
        assert_eq!(got, id);
    }

    #[test]
    fn resolver_includes_range_endpoints() {
        let conn = test_conn();
        let id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");

        assert_eq!(
            resolve_active_session(&conn, date("2025-04-01")).expect("start"),
            id
        );
        assert_eq!(
            resolve_active_session(&conn, date("2026-03-31")).expect("end"),
            id
        );
    }

    #[test]
    fn resolver_fails_without_covering_session() {
        let conn = test_conn();
        seed_session(&conn, "2024-25", "2024-04-01", "2025-03-31");

        let err = resolve_active_session(&conn, date("2025-06-15")).unwrap_err();
        assert!(matches!(err, BatchError::NoActiveSession));
    }

    #[test]
    fn submit_rejects_empty_batch_without_writes() {
        let conn = test_conn();
        let session_id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");

        let err = submit_marks(&conn, session_id, &[]).unwrap_err();
        assert!(matches!(err, BatchError::NoEntries));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM marks", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn submit_then_read_back_matches_entries() {
        let conn = test_conn();
        let session_id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");
        let class_id = seed_class(&conn, "5A", 5, "A");
        let subject_id = seed_subject(&conn, "Math");
        let s1 = seed_student(&conn, "Asha", "100");
        let s2 = seed_student(&conn, "Bilal", "101");

        submit_marks(
            &conn,
            session_id,
            &[
                entry(s1, subject_id, class_id, 45.0),
                entry(s2, subject_id, class_id, 38.0),
            ],
        )
        .expect("submit");

        let (obtained, total, grade, on_leave) = mark_row(&conn, s1).expect("row for s1");
        assert_eq!(obtained, 45.0);
        assert_eq!(total, 50.0);
        assert_eq!(grade, "A");
        assert!(!on_leave);
        assert_eq!(mark_row(&conn, s2).expect("row for s2").0, 38.0);
    }

    #[test]
    fn resubmit_upserts_in_place() {
        let conn = test_conn();
        let session_id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");
        let class_id = seed_class(&conn, "5A", 5, "A");
        let subject_id = seed_subject(&conn, "Math");
        let s1 = seed_student(&conn, "Asha", "100");

        let batch = vec![entry(s1, subject_id, class_id, 45.0)];
        submit_marks(&conn, session_id, &batch).expect("first submit");
        // Identical resubmission is a no-op on the final state.
        submit_marks(&conn, session_id, &batch).expect("resubmit");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM marks", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);

        let mut changed = entry(s1, subject_id, class_id, 48.0);
        changed.grade = "A+".to_string();
        submit_marks(&conn, session_id, &[changed]).expect("changed resubmit");

        let (obtained, _, grade, _) = mark_row(&conn, s1).expect("row");
        assert_eq!(obtained, 48.0);
        assert_eq!(grade, "A+");
    }

    #[test]
    fn failing_entry_rolls_back_whole_batch() {
        let conn = test_conn();
        let session_id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");
        let class_id = seed_class(&conn, "5A", 5, "A");
        let subject_id = seed_subject(&conn, "Math");
        let s1 = seed_student(&conn, "Asha", "100");

        // Second entry violates the student foreign key.
        let err = submit_marks(
            &conn,
            session_id,
            &[
                entry(s1, subject_id, class_id, 45.0),
                entry(9999, subject_id, class_id, 30.0),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::Store(_)));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM marks", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0, "first entry must not survive the rollback");
    }

    #[test]
    fn update_touches_matching_rows_only() {
        let conn = test_conn();
        let session_id = seed_session(&conn, "2025-26", "2025-04-01", "2026-03-31");
        let class_id = seed_class(&conn, "5A", 5, "A");
        let subject_id = seed_subject(&conn, "Math");
        let s1 = seed_student(&conn, "Asha", "100");
        let s2 = seed_student(&conn, "Bilal", "101");

        submit_marks(
            &conn,
            session_id,
            &[
                entry(s1, subject_id, class_id, 45.0),
                entry(s2, subject_id, class_id, 38.0),
            ],
        )
        .expect("submit");

        let mut changed = entry(s1, subject_id, class_id, 40.0);
        changed.grade = "B".to_string();
        update_marks(&conn, &[changed]).expect("update");

        assert_eq!(mark_row(&conn, s1).expect("s1").0, 40.0);
        assert_eq!(mark_row(&conn, s2).expect("s2").0, 38.0);
    }

    #[test]
    fn mapping_replace_leaves_exact_cross_product() {
        let conn = test_conn();
        let c10 = seed_class(&conn, "5A", 5, "A");
        let c11 = seed_class(&conn, "5B", 5, "B");
        let math = seed_subject(&conn, "Math");
        let sci = seed_subject(&conn, "Science");
        let eng = seed_subject(&conn, "English");

        replace_class_subjects(&conn, &[c10, c11], &[math, sci]).expect("first replace");
        // Replacing again drops the old mappings wholesale.
        replace_class_subjects(&conn, &[c10, c11], &[sci, eng]).expect("second replace");

        let mut stmt = conn
            .prepare("SELECT class_id, subject_id FROM class_subjects ORDER BY class_id, subject_id")
            .expect("prepare");
        let rows: Vec<(i64, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("collect");

        assert_eq!(rows, vec![(c10, sci), (c10, eng), (c11, sci), (c11, eng)]);
    }

    #[test]
    fn mapping_replace_rejects_empty_subject_set() {
        let conn = test_conn();
        let c10 = seed_class(&conn, "5A", 5, "A");
        let math = seed_subject(&conn, "Math");
        replace_class_subjects(&conn, &[c10], &[math]).expect("seed mapping");

        let err = replace_class_subjects(&conn, &[c10], &[]).unwrap_err();
        assert!(matches!(err, BatchError::NoEntries));

        // Existing mappings stay untouched.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM class_subjects", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }
}
