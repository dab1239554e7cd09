use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            user_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE,
            mobile TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;

    // Date columns hold ISO YYYY-MM-DD text; ranges are assumed non-overlapping
    // (maintained by administrative action, not enforced here).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            session_id INTEGER PRIMARY KEY,
            session_name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            class_id INTEGER PRIMARY KEY,
            class_name TEXT NOT NULL UNIQUE,
            grade INTEGER NOT NULL,
            section TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_grade ON classes(grade)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            subject_id INTEGER PRIMARY KEY,
            subject_name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            teacher_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL UNIQUE,
            is_class_teacher INTEGER NOT NULL DEFAULT 0,
            class_id INTEGER,
            FOREIGN KEY(user_id) REFERENCES users(user_id),
            FOREIGN KEY(class_id) REFERENCES classes(class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_class ON teachers(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL UNIQUE,
            is_current_student INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(user_id) REFERENCES users(user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_classes(
            student_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            PRIMARY KEY(student_id, class_id),
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(class_id) REFERENCES classes(class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_classes_class ON student_classes(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(class_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_subjects_subject ON class_subjects(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            class_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            PRIMARY KEY(class_id, subject_id, session_id),
            FOREIGN KEY(class_id) REFERENCES classes(class_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(teacher_id),
            FOREIGN KEY(session_id) REFERENCES sessions(session_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_assignments_teacher ON teacher_assignments(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_assignments_session ON teacher_assignments(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            exam_type TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            total_marks REAL NOT NULL,
            grade TEXT NOT NULL,
            on_leave INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(student_id, subject_id, class_id, session_id, exam_type),
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(class_id),
            FOREIGN KEY(session_id) REFERENCES sessions(session_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_class_subject ON marks(class_id, subject_id, exam_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_session ON marks(session_id)",
        [],
    )?;

    Ok(())
}
