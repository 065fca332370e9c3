use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "resultd.sqlite3";

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
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            section_id TEXT,
            roll_number INTEGER NOT NULL,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_roll ON students(class_id, roll_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            weight_share REAL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            term_id TEXT,
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;

    // A scheme is scoped to either one exam or one term. Redefining a scheme
    // inserts a new version; older versions keep their components and marks.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schemes(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            scope_kind TEXT NOT NULL CHECK(scope_kind IN ('exam', 'term')),
            scope_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(class_id, subject_id, scope_kind, scope_id, version)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS components(
            id TEXT PRIMARY KEY,
            scheme_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term_id TEXT,
            name TEXT NOT NULL,
            abbreviation TEXT NOT NULL,
            max_marks REAL NOT NULL,
            weightage_percent REAL NOT NULL,
            is_locked INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(scheme_id) REFERENCES schemes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_components_scheme ON components(scheme_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            student_id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            marks_obtained REAL,
            attendance TEXT NOT NULL DEFAULT 'P',
            updated_at TEXT,
            PRIMARY KEY(student_id, component_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(component_id) REFERENCES components(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_component ON marks(component_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Raw stored JSON text. Callers parse it so a corrupt value surfaces as
/// their own error rather than reading as unset.
pub fn settings_get_json(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value_json FROM settings WHERE key = ?",
        [key],
        |r| r.get(0),
    )
    .optional()
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert_eq!(settings_get_json(&conn, "grading.scale").expect("get"), None);
        settings_set_json(&conn, "grading.scale", &json!({ "v": 1 })).expect("set");
        settings_set_json(&conn, "grading.scale", &json!({ "v": 2 })).expect("set");
        let stored = settings_get_json(&conn, "grading.scale")
            .expect("get")
            .expect("present");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&stored).expect("json"),
            json!({ "v": 2 })
        );
    }
}
