use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::{AppState, Request};
use crate::schedule::ScheduleSettings;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Schedule,
    Attainment,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(Self::Schedule),
            "attainment" => Some(Self::Attainment),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Schedule => "setup.schedule",
            Self::Attainment => "setup.attainment",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Schedule => {
            let d = ScheduleSettings::default();
            json!({
                "theorySessions": d.theory_sessions,
                "labSessions": d.lab_sessions,
                "maxWeeks": d.max_weeks
            })
        }
        SetupSection::Attainment => json!({
            "decimals": 2
        }),
    }
}

fn parse_int_in_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let Some(n) = v.as_i64() else {
        return Err(format!("{} must be an integer", key));
    };
    if n < min || n > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Schedule => match k.as_str() {
                "theorySessions" | "labSessions" => {
                    obj.insert(k.clone(), json!(parse_int_in_range(v, k, 1, 200)?));
                }
                "maxWeeks" => {
                    obj.insert(k.clone(), json!(parse_int_in_range(v, k, 1, 260)?));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            SetupSection::Attainment => match k.as_str() {
                "decimals" => {
                    obj.insert(k.clone(), json!(parse_int_in_range(v, k, 0, 6)?));
                }
                _ => return Err(format!("unknown attainment field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

fn field_u32(v: &Value, key: &str, fallback: u32) -> u32 {
    v.get(key)
        .and_then(|x| x.as_u64())
        .and_then(|x| u32::try_from(x).ok())
        .unwrap_or(fallback)
}

pub fn schedule_settings(conn: &Connection) -> Result<ScheduleSettings, HandlerErr> {
    let v = load_section(conn, SetupSection::Schedule)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let d = ScheduleSettings::default();
    Ok(ScheduleSettings {
        theory_sessions: field_u32(&v, "theorySessions", d.theory_sessions),
        lab_sessions: field_u32(&v, "labSessions", d.lab_sessions),
        max_weeks: field_u32(&v, "maxWeeks", d.max_weeks),
    })
}

pub fn attainment_decimals(conn: &Connection) -> Result<u32, HandlerErr> {
    let v = load_section(conn, SetupSection::Attainment)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(field_u32(&v, "decimals", 2))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let schedule = match load_section(conn, SetupSection::Schedule) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let attainment = match load_section(conn, SetupSection::Attainment) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "schedule": schedule,
            "attainment": attainment
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section_raw, "settings updated");
    ok(&req.id, json!({ "ok": true, "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
