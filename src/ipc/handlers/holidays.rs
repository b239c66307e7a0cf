use crate::calendar::{self, Semester};
use crate::ipc::helpers::{
    get_optional_date, get_required_date, get_required_i64, get_required_str, with_db, HandlerErr,
};
use crate::ipc::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn holidays_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let holidays = calendar::list_holidays(conn)?;
    Ok(json!({ "holidays": holidays }))
}

fn holidays_add(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_optional_date(params, "endDate")?;
    let holiday = calendar::add_holiday(conn, &name, start, end)?;
    Ok(json!({ "holiday": holiday }))
}

fn holidays_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let holiday_id = get_required_str(params, "holidayId")?;
    calendar::delete_holiday(conn, &holiday_id)?;
    Ok(json!({ "ok": true }))
}

fn holidays_check(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let found = calendar::holiday_on(conn, date)?;
    Ok(json!({
        "date": calendar::format_date(date),
        "isHoliday": found.is_some(),
        "name": found.map(|h| h.name),
    }))
}

fn holidays_load_semester(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let semester = Semester::parse(&get_required_str(params, "semester")?)?;
    let year = get_required_i64(params, "year")?;
    let year = i32::try_from(year)
        .ok()
        .filter(|y| (1900..=9999).contains(y))
        .ok_or_else(|| HandlerErr::bad_params("year must be between 1900 and 9999"))?;
    let inserted = calendar::load_semester_holidays(conn, semester, year)?;
    Ok(json!({ "ok": true, "inserted": inserted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "holidays.list" => holidays_list,
        "holidays.add" => holidays_add,
        "holidays.delete" => holidays_delete,
        "holidays.check" => holidays_check,
        "holidays.loadSemester" => holidays_load_semester,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
