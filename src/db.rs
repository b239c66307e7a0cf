use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "obe.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            short_name TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department_id TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS plos(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            program_id TEXT NOT NULL,
            credits REAL NOT NULL,
            is_lab INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(program_id) REFERENCES programs(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS clos(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            sl INTEGER NOT NULL,
            plo_id TEXT,
            description TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY(plo_id) REFERENCES plos(id) ON DELETE SET NULL,
            UNIQUE(course_id, sl)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clos_course ON clos(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            semester TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE,
            UNIQUE(course_id, name, year, semester)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            program_id TEXT NOT NULL,
            FOREIGN KEY(program_id) REFERENCES programs(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            enrollment_type TEXT NOT NULL DEFAULT 'Regular',
            enrolled_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(section_id) REFERENCES sections(id) ON DELETE CASCADE,
            UNIQUE(student_id, section_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_section ON enrollments(section_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_templates(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL UNIQUE,
            is_public INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(section_id) REFERENCES sections(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_components(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            name TEXT NOT NULL,
            component_type TEXT NOT NULL,
            weight REAL NOT NULL,
            clo_id TEXT NOT NULL,
            alternative_group TEXT,
            best_of_count INTEGER NOT NULL DEFAULT 1,
            is_visible_to_students INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(template_id) REFERENCES assessment_templates(id) ON DELETE CASCADE,
            FOREIGN KEY(clo_id) REFERENCES clos(id) ON DELETE CASCADE,
            UNIQUE(template_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_components_template ON assessment_components(template_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_components_clo ON assessment_components(clo_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_marks(
            id TEXT PRIMARY KEY,
            component_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            mark REAL NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(component_id) REFERENCES assessment_components(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            UNIQUE(component_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_component ON assessment_marks(component_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON assessment_marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_groups(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            group_sl INTEGER NOT NULL,
            project_name TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(section_id) REFERENCES sections(id) ON DELETE CASCADE,
            UNIQUE(section_id, group_sl)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_group_members(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES project_groups(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            UNIQUE(group_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_members_group ON project_group_members(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            date TEXT NOT NULL,
            is_holiday INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(section_id) REFERENCES sections(id) ON DELETE CASCADE,
            UNIQUE(section_id, number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_section ON sessions(section_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            present INTEGER NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            UNIQUE(session_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(session_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, raw),
    )?;
    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_db_is_idempotent() {
        let ws = temp_workspace("obed-db-open");
        drop(open_db(&ws).expect("first open"));
        let conn = open_db(&ws).expect("second open");
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sessions'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(n, 1);
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let ws = temp_workspace("obed-db-settings");
        let conn = open_db(&ws).expect("open");
        assert!(settings_get_json(&conn, "setup.schedule").expect("get").is_none());
        settings_set_json(&conn, "setup.schedule", &json!({ "maxWeeks": 40 })).expect("set");
        settings_set_json(&conn, "setup.schedule", &json!({ "maxWeeks": 30 })).expect("set");
        let v = settings_get_json(&conn, "setup.schedule").expect("get");
        assert_eq!(v, Some(json!({ "maxWeeks": 30 })));
    }
}
