use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::calendar;
pub use crate::ipc::error::HandlerErr;
use crate::ipc::error::{err, ok};
use crate::ipc::{AppState, Request};

/// Map a rusqlite failure onto a protocol error code.
pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

/// Insert failures caused by a UNIQUE constraint surface as `conflict`.
pub fn insert_err(what: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            HandlerErr::new("conflict", format!("{} already exists", what))
                .with_details(json!({ "reason": e.to_string() }))
        }
        _ => HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": what })),
    }
}

/// Run `f` against the open workspace database and wrap the result.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, message = %error.message, "request rejected");
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string or null", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    calendar::parse_date(&raw).map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e)))
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key)? {
        Some(raw) => calendar::parse_date(&raw)
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// The course-level facts most section operations need.
#[derive(Debug, Clone)]
pub struct SectionRef {
    pub id: String,
    pub course_id: String,
    pub course_code: String,
    pub program_id: String,
    pub is_lab: bool,
}

pub fn load_section_ref(conn: &Connection, section_id: &str) -> Result<SectionRef, HandlerErr> {
    conn.query_row(
        "SELECT s.id, c.id, c.code, c.program_id, c.is_lab
         FROM sections s JOIN courses c ON c.id = s.course_id
         WHERE s.id = ?",
        [section_id],
        |r| {
            Ok(SectionRef {
                id: r.get(0)?,
                course_id: r.get(1)?,
                course_code: r.get(2)?,
                program_id: r.get(3)?,
                is_lab: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("section"))
}

pub fn is_enrolled(conn: &Connection, section_id: &str, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE section_id = ? AND student_id = ?",
        (section_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err("db_query_failed"))
}

#[derive(Debug, Clone)]
pub struct EnrolledStudent {
    pub id: String,
    pub student_no: String,
    pub name: String,
    pub enrollment_type: String,
}

pub fn list_enrolled(conn: &Connection, section_id: &str) -> Result<Vec<EnrolledStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT st.id, st.student_id, st.name, e.enrollment_type
             FROM enrollments e JOIN students st ON st.id = e.student_id
             WHERE e.section_id = ?
             ORDER BY st.student_id",
        )
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map([section_id], |r| {
        Ok(EnrolledStudent {
            id: r.get(0)?,
            student_no: r.get(1)?,
            name: r.get(2)?,
            enrollment_type: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}
