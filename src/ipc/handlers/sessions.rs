use crate::ipc::handlers::setup::schedule_settings;
use crate::ipc::helpers::{get_required_date, get_required_str, load_section_ref, with_db, HandlerErr};
use crate::ipc::{AppState, Request};
use crate::schedule;
use rusqlite::Connection;
use serde_json::{json, Value};

fn sessions_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let first = get_required_date(params, "firstDate")?;
    let second = get_required_date(params, "secondDate")?;
    let settings = schedule_settings(conn)?;
    let sessions = schedule::generate_for_section(conn, &section_id, first, second, &settings)?;
    let holidays = sessions.iter().filter(|s| s.is_holiday).count();
    Ok(json!({
        "created": sessions.len(),
        "holidaySessions": holidays,
        "sessions": sessions,
    }))
}

fn sessions_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let section = load_section_ref(conn, &section_id)?;
    let expected = schedule_settings(conn)?.session_count(section.is_lab);
    let sessions = schedule::list_sessions(conn, &section.id)?;
    Ok(json!({
        "isLab": section.is_lab,
        "expectedCount": expected,
        "sessions": sessions,
    }))
}

fn sessions_clear(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    load_section_ref(conn, &section_id)?;
    let removed = schedule::clear_sessions(conn, &section_id)?;
    Ok(json!({ "ok": true, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "sessions.generate" => sessions_generate,
        "sessions.list" => sessions_list,
        "sessions.clear" => sessions_clear,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
