use crate::attainment;
use crate::ipc::handlers::setup::attainment_decimals;
use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value;

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn section_attainment(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let decimals = attainment_decimals(conn)?;
    let report = attainment::section_attainment(conn, &section_id, decimals)?;
    to_value(&report)
}

fn student_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let decimals = attainment_decimals(conn)?;
    let history = attainment::student_history(conn, &student_id, decimals)?;
    to_value(&history)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "obe.sectionAttainment" => section_attainment,
        "obe.studentHistory" => student_history,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
