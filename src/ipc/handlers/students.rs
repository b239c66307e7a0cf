use crate::db::now_timestamp;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, insert_err, list_enrolled, load_section_ref,
    with_db, HandlerErr,
};
use crate::ipc::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const SEARCH_DEFAULT_LIMIT: i64 = 20;
const SEARCH_MAX_LIMIT: i64 = 100;
const BULK_MAX_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnrollmentType {
    Regular,
    Backlog,
    SelfStudy,
}

impl EnrollmentType {
    fn parse(raw: Option<&str>) -> Result<Self, HandlerErr> {
        match raw {
            None | Some("Regular") => Ok(Self::Regular),
            Some("Backlog") => Ok(Self::Backlog),
            Some("Self-Study") => Ok(Self::SelfStudy),
            Some(other) => Err(HandlerErr::bad_params(
                "enrollmentType must be one of: Regular, Backlog, Self-Study",
            )
            .with_details(json!({ "enrollmentType": other }))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "Regular",
            Self::Backlog => "Backlog",
            Self::SelfStudy => "Self-Study",
        }
    }
}

fn find_student_by_no(conn: &Connection, student_no: &str) -> rusqlite::Result<Option<(String, String)>> {
    conn.query_row(
        "SELECT id, name FROM students WHERE student_id = ?",
        [student_no],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
}

fn insert_student(
    conn: &Connection,
    student_no: &str,
    name: &str,
    program_id: &str,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, student_id, name, program_id) VALUES(?, ?, ?, ?)",
        (&id, student_no, name, program_id),
    )?;
    Ok(id)
}

/// Returns false when the student was already enrolled.
fn insert_enrollment(
    conn: &Connection,
    section_id: &str,
    student_id: &str,
    kind: EnrollmentType,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO enrollments(id, student_id, section_id, enrollment_type, enrolled_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, section_id) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            student_id,
            section_id,
            kind.as_str(),
            now_timestamp(),
        ),
    )?;
    Ok(n > 0)
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let name = get_required_str(params, "name")?;
    let program_id = get_required_str(params, "programId")?;
    let program_exists = conn
        .query_row("SELECT 1 FROM programs WHERE id = ?", [&program_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err("db_query_failed"))?
        .is_some();
    if !program_exists {
        return Err(HandlerErr::not_found("program"));
    }
    let id = insert_student(conn, &student_no, &name, &program_id).map_err(insert_err("student"))?;
    Ok(json!({ "studentId": id }))
}

fn students_search(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let query = get_optional_str(params, "query")?.unwrap_or_default();
    let limit = match params.get("limit") {
        None | Some(Value::Null) => SEARCH_DEFAULT_LIMIT,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=SEARCH_MAX_LIMIT).contains(&n) => n,
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "limit must be between 1 and {}",
                    SEARCH_MAX_LIMIT
                )))
            }
        },
    };
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, name, program_id
             FROM students
             WHERE instr(lower(student_id), lower(?1)) > 0 OR instr(lower(name), lower(?1)) > 0
             ORDER BY student_id
             LIMIT ?2",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map((&query, limit), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentNo": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "programId": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "students": rows }))
}

fn enrollments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    load_section_ref(conn, &section_id)?;
    let students: Vec<Value> = list_enrolled(conn, &section_id)?
        .into_iter()
        .map(|s| {
            json!({
                "id": s.id,
                "studentNo": s.student_no,
                "name": s.name,
                "enrollmentType": s.enrollment_type,
            })
        })
        .collect();
    Ok(json!({ "students": students }))
}

fn enrollments_add(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let kind = EnrollmentType::parse(get_optional_str(params, "enrollmentType")?.as_deref())?;
    load_section_ref(conn, &section_id)?;
    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err("db_query_failed"))?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student"));
    }
    let inserted = insert_enrollment(conn, &section_id, &student_id, kind)
        .map_err(insert_err("enrollment"))?;
    if !inserted {
        return Err(HandlerErr::new("conflict", "student is already enrolled in this section"));
    }
    Ok(json!({ "ok": true }))
}

fn enrollments_remove(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let n = conn
        .execute(
            "DELETE FROM enrollments WHERE section_id = ? AND student_id = ?",
            (&section_id, &student_id),
        )
        .map_err(db_err("db_update_failed"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("enrollment"));
    }
    conn.execute(
        "DELETE FROM project_group_members
         WHERE student_id = ?
           AND group_id IN (SELECT id FROM project_groups WHERE section_id = ?)",
        (&student_id, &section_id),
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "ok": true }))
}

fn bulk_lines(params: &Value) -> Result<Vec<String>, HandlerErr> {
    match params.get("lines") {
        Some(Value::String(s)) => Ok(s.lines().map(|l| l.to_string()).collect()),
        Some(Value::Array(arr)) => arr
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params("lines[] must contain strings"))
            })
            .collect(),
        _ => Err(HandlerErr::bad_params("missing lines")),
    }
}

/// Enroll a pasted `student_id,name` list in one transaction. Any bad line
/// rolls back the whole batch.
fn enrollments_bulk(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let kind = EnrollmentType::parse(get_optional_str(params, "enrollmentType")?.as_deref())?;
    let lines = bulk_lines(params)?;
    if lines.len() > BULK_MAX_LINES {
        return Err(HandlerErr::bad_params(format!(
            "bulk payload exceeds max lines: {} > {}",
            lines.len(),
            BULK_MAX_LINES
        )));
    }
    let section = load_section_ref(conn, &section_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let mut errors: Vec<String> = Vec::new();
    let mut created: usize = 0;
    let mut enrolled: usize = 0;
    let mut already: usize = 0;

    for (i, raw) in lines.iter().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let (student_no, name) = match parts.as_slice() {
            [no, name] if !no.is_empty() && !name.is_empty() => (*no, *name),
            _ => {
                errors.push(format!("line {}: expected student_id,name", line_no));
                continue;
            }
        };

        let student_id = match find_student_by_no(&tx, student_no) {
            Ok(Some((id, stored_name))) => {
                if !stored_name.trim().eq_ignore_ascii_case(name) {
                    errors.push(format!(
                        "line {}: student {} is already registered as {:?}",
                        line_no, student_no, stored_name
                    ));
                    continue;
                }
                id
            }
            Ok(None) => match insert_student(&tx, student_no, name, &section.program_id) {
                Ok(id) => {
                    created += 1;
                    id
                }
                Err(e) => {
                    errors.push(format!("line {}: {}", line_no, e));
                    continue;
                }
            },
            Err(e) => {
                errors.push(format!("line {}: {}", line_no, e));
                continue;
            }
        };

        match insert_enrollment(&tx, &section.id, &student_id, kind) {
            Ok(true) => enrolled += 1,
            Ok(false) => already += 1,
            Err(e) => errors.push(format!("line {}: {}", line_no, e)),
        }
    }

    if !errors.is_empty() {
        drop(tx);
        tracing::warn!(
            section_id = %section.id,
            errors = errors.len(),
            "bulk enrollment rolled back"
        );
        return Err(HandlerErr::new(
            "conflict",
            format!("{} line(s) rejected; nothing was enrolled", errors.len()),
        )
        .with_details(json!({ "errors": errors })));
    }

    tx.commit().map_err(db_err("db_tx_failed"))?;
    tracing::info!(
        section_id = %section.id,
        enrolled,
        created,
        already,
        "bulk enrollment committed"
    );
    Ok(json!({
        "ok": true,
        "enrolled": enrolled,
        "created": created,
        "alreadyEnrolled": already
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.create" => students_create,
        "students.search" => students_search,
        "enrollments.list" => enrollments_list,
        "enrollments.add" => enrollments_add,
        "enrollments.remove" => enrollments_remove,
        "enrollments.bulk" => enrollments_bulk,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
