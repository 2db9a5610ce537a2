use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            is_staff INTEGER NOT NULL DEFAULT 0,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS divisions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_divisions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            division_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES school_classes(id),
            FOREIGN KEY(division_id) REFERENCES divisions(id),
            UNIQUE(class_id, division_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES school_classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    // Subjects owned directly by a class (grades 1-10).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES school_classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    // Per-section subject choice (grades 11-12).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS division_subjects(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            class_division_id TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_division_id) REFERENCES class_divisions(id),
            UNIQUE(subject_id, class_division_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_division_subjects_division ON division_subjects(class_division_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            roll_number TEXT NOT NULL,
            class_division_id TEXT,
            id_number TEXT NOT NULL UNIQUE,
            phone_number TEXT,
            address TEXT,
            alternate_email TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(class_division_id) REFERENCES class_divisions(id),
            UNIQUE(roll_number, class_division_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_division ON students(class_division_id)",
        [],
    )?;
    // Older workspaces predate profile photos and edit timestamps.
    ensure_students_profile_photo(conn)?;
    ensure_students_updated_at(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            academic_year TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_date ON exams(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(student_id, subject_id, exam_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_exam ON marks(exam_id)",
        [],
    )?;

    Ok(())
}

fn ensure_students_profile_photo(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "profile_photo")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN profile_photo TEXT", [])?;
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_is_idempotent() {
        let conn = open_memory();
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "students", "profile_photo").expect("pragma"));
        assert!(table_has_column(&conn, "students", "updated_at").expect("pragma"));
    }

    #[test]
    fn mark_key_is_unique() {
        let conn = open_memory();
        conn.execute_batch(
            "INSERT INTO users(id, username, password_hash, created_at) VALUES('u1', 'kid', 'x', 'now');
             INSERT INTO students(id, user_id, roll_number, id_number) VALUES('s1', 'u1', '1', 'S1');
             INSERT INTO subjects(id, name) VALUES('sub1', 'Math');
             INSERT INTO exams(id, name, date, academic_year) VALUES('e1', 'Midterm', '2025-06-01', '2024-2025');
             INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m1', 's1', 'sub1', 'e1', 50);",
        )
        .expect("seed");
        let dup = conn.execute(
            "INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m2', 's1', 'sub1', 'e1', 60)",
            [],
        );
        assert!(dup.is_err());
    }
}
