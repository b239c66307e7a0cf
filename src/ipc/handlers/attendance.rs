use crate::attainment::round_to;
use crate::calendar;
use crate::ipc::handlers::setup::attainment_decimals;
use crate::ipc::helpers::{
    db_err, get_required_str, is_enrolled, list_enrolled, load_section_ref, with_db, HandlerErr,
};
use crate::ipc::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

struct SessionRow {
    id: String,
    section_id: String,
    number: i64,
    date: NaiveDate,
    is_holiday: bool,
}

fn load_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    conn.query_row(
        "SELECT id, section_id, number, date, is_holiday FROM sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                section_id: r.get(1)?,
                number: r.get(2)?,
                date: calendar::date_column(r, 3)?,
                is_holiday: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("session"))
}

fn attendance_load(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = load_session(conn, &session_id)?;

    let mut stmt = conn
        .prepare("SELECT student_id, present FROM attendance WHERE session_id = ?")
        .map_err(db_err("db_query_failed"))?;
    let recorded: HashMap<String, bool> = stmt
        .query_map([&session.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let students: Vec<Value> = list_enrolled(conn, &session.section_id)?
        .into_iter()
        .map(|s| {
            let present = recorded.get(&s.id).copied();
            json!({
                "studentId": s.id,
                "studentNo": s.student_no,
                "name": s.name,
                "present": present.unwrap_or(false),
                "recorded": present.is_some(),
            })
        })
        .collect();

    Ok(json!({
        "session": {
            "id": session.id,
            "sectionId": session.section_id,
            "number": session.number,
            "date": calendar::format_date(session.date),
            "isHoliday": session.is_holiday,
        },
        "students": students,
    }))
}

fn attendance_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records[]"));
    };
    let session = load_session(conn, &session_id)?;
    if session.is_holiday {
        return Err(HandlerErr::new(
            "holiday_session",
            format!(
                "session {} on {} is a holiday",
                session.number,
                calendar::format_date(session.date)
            ),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let mut errors: Vec<String> = Vec::new();
    let mut saved: usize = 0;

    for (i, record) in records.iter().enumerate() {
        let (Some(student_id), Some(present)) = (
            record.get("studentId").and_then(|v| v.as_str()),
            record.get("present").and_then(|v| v.as_bool()),
        ) else {
            errors.push(format!("record {}: expected {{studentId, present}}", i));
            continue;
        };
        match is_enrolled(&tx, &session.section_id, student_id) {
            Ok(true) => {}
            Ok(false) => {
                errors.push(format!("record {}: student {} is not enrolled", i, student_id));
                continue;
            }
            Err(e) => {
                errors.push(format!("record {}: {}", i, e.message));
                continue;
            }
        }
        let res = tx.execute(
            "INSERT INTO attendance(id, session_id, student_id, present) VALUES(?, ?, ?, ?)
             ON CONFLICT(session_id, student_id) DO UPDATE SET present = excluded.present",
            (
                Uuid::new_v4().to_string(),
                &session.id,
                student_id,
                i64::from(present),
            ),
        );
        match res {
            Ok(_) => saved += 1,
            Err(e) => errors.push(format!("record {}: {}", i, e)),
        }
    }

    if !errors.is_empty() {
        drop(tx);
        tracing::warn!(session_id = %session.id, errors = errors.len(), "attendance save rolled back");
        return Err(HandlerErr::bad_params(format!(
            "{} record(s) rejected; attendance was not saved",
            errors.len()
        ))
        .with_details(json!({ "errors": errors })));
    }

    tx.commit().map_err(db_err("db_tx_failed"))?;
    tracing::info!(session_id = %session.id, saved, "attendance saved");
    Ok(json!({ "ok": true, "saved": saved }))
}

fn attendance_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let section = load_section_ref(conn, &section_id)?;
    let decimals = attainment_decimals(conn)?;

    let held: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE section_id = ? AND is_holiday = 0",
            [&section.id],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;

    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, COUNT(*)
             FROM attendance a JOIN sessions s ON s.id = a.session_id
             WHERE s.section_id = ? AND s.is_holiday = 0 AND a.present = 1
             GROUP BY a.student_id",
        )
        .map_err(db_err("db_query_failed"))?;
    let present_counts: HashMap<String, i64> = stmt
        .query_map([&section.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let students: Vec<Value> = list_enrolled(conn, &section.id)?
        .into_iter()
        .map(|s| {
            let present = present_counts.get(&s.id).copied().unwrap_or(0);
            let percentage = if held > 0 {
                Some(round_to(present as f64 * 100.0 / held as f64, decimals))
            } else {
                None
            };
            json!({
                "studentId": s.id,
                "studentNo": s.student_no,
                "name": s.name,
                "present": present,
                "held": held,
                "percentage": percentage,
            })
        })
        .collect();

    Ok(json!({ "sectionId": section.id, "held": held, "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "attendance.load" => attendance_load,
        "attendance.save" => attendance_save,
        "attendance.summary" => attendance_summary,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
