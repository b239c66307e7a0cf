use crate::attainment::clo_code;
use crate::db::now_timestamp;
use crate::ipc::helpers::{
    db_err, get_optional_bool, get_optional_str, get_required_f64, get_required_str, insert_err, is_enrolled,
    list_enrolled, load_section_ref, with_db, HandlerErr, SectionRef,
};
use crate::ipc::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

const MARKS_SAVE_MAX_ENTRIES: usize = 5000;

#[derive(Debug, Clone)]
struct Component {
    id: String,
    name: String,
    component_type: String,
    weight: f64,
    clo_id: String,
    clo_code: String,
    alternative_group: Option<String>,
    best_of_count: i64,
    visible_to_students: bool,
    sort_order: i64,
}

impl Component {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "componentType": self.component_type,
            "weight": self.weight,
            "cloId": self.clo_id,
            "cloCode": self.clo_code,
            "alternativeGroup": self.alternative_group,
            "bestOfCount": self.best_of_count,
            "isVisibleToStudents": self.visible_to_students,
            "sortOrder": self.sort_order,
        })
    }
}

fn parse_component_type(raw: &str) -> Result<&'static str, HandlerErr> {
    match raw.to_ascii_uppercase().as_str() {
        "THEORY" => Ok("THEORY"),
        "LAB" => Ok("LAB"),
        _ => Err(HandlerErr::bad_params("componentType must be THEORY or LAB")),
    }
}

fn find_template(conn: &Connection, section_id: &str) -> Result<Option<(String, bool)>, HandlerErr> {
    conn.query_row(
        "SELECT id, is_public FROM assessment_templates WHERE section_id = ?",
        [section_id],
        |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
    )
    .optional()
    .map_err(db_err("db_query_failed"))
}

fn ensure_template(conn: &Connection, section_id: &str) -> Result<(String, bool), HandlerErr> {
    if let Some(t) = find_template(conn, section_id)? {
        return Ok(t);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assessment_templates(id, section_id, is_public, created_at) VALUES(?, ?, 0, ?)",
        (&id, section_id, now_timestamp()),
    )
    .map_err(insert_err("assessment template"))?;
    Ok((id, false))
}

fn list_components(
    conn: &Connection,
    section: &SectionRef,
    template_id: &str,
) -> Result<Vec<Component>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT ac.id, ac.name, ac.component_type, ac.weight, ac.clo_id, cl.sl,
                    ac.alternative_group, ac.best_of_count, ac.is_visible_to_students, ac.sort_order
             FROM assessment_components ac JOIN clos cl ON cl.id = ac.clo_id
             WHERE ac.template_id = ?
             ORDER BY ac.sort_order, ac.name",
        )
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map([template_id], |r| {
        let sl: i64 = r.get(5)?;
        Ok(Component {
            id: r.get(0)?,
            name: r.get(1)?,
            component_type: r.get(2)?,
            weight: r.get(3)?,
            clo_id: r.get(4)?,
            clo_code: clo_code(&section.course_code, sl),
            alternative_group: r.get(6)?,
            best_of_count: r.get(7)?,
            visible_to_students: r.get::<_, i64>(8)? != 0,
            sort_order: r.get(9)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

fn assessments_template(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let section = load_section_ref(conn, &section_id)?;
    let (template_id, is_public) = ensure_template(conn, &section.id)?;
    let components = list_components(conn, &section, &template_id)?;
    let total_weight: f64 = components.iter().map(|c| c.weight).sum();
    Ok(json!({
        "templateId": template_id,
        "sectionId": section.id,
        "isPublic": is_public,
        "totalWeight": total_weight,
        "components": components.iter().map(Component::to_json).collect::<Vec<_>>(),
    }))
}

fn assessments_set_public(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let Some(is_public) = get_optional_bool(params, "isPublic")? else {
        return Err(HandlerErr::bad_params("missing isPublic"));
    };
    let section = load_section_ref(conn, &section_id)?;
    let (template_id, _) = ensure_template(conn, &section.id)?;
    conn.execute(
        "UPDATE assessment_templates SET is_public = ? WHERE id = ?",
        (is_public as i64, &template_id),
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "ok": true, "isPublic": is_public }))
}

fn assessments_add_component(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let name = get_required_str(params, "name")?;
    let component_type = parse_component_type(&get_required_str(params, "componentType")?)?;
    let weight = get_required_f64(params, "weight")?;
    if !weight.is_finite() || weight <= 0.0 {
        return Err(HandlerErr::bad_params("weight must be greater than 0"));
    }
    let clo_id = get_required_str(params, "cloId")?;
    let alternative_group = get_optional_str(params, "alternativeGroup")?;
    let best_of_count = match params.get("bestOfCount") {
        None | Some(Value::Null) => 1,
        Some(v) => v
            .as_i64()
            .filter(|n| *n >= 1)
            .ok_or_else(|| HandlerErr::bad_params("bestOfCount must be a positive integer"))?,
    };
    let visible = get_optional_bool(params, "isVisibleToStudents")?.unwrap_or(true);

    let section = load_section_ref(conn, &section_id)?;
    let clo_course: Option<String> = conn
        .query_row("SELECT course_id FROM clos WHERE id = ?", [&clo_id], |r| r.get(0))
        .optional()
        .map_err(db_err("db_query_failed"))?;
    match clo_course {
        None => return Err(HandlerErr::not_found("clo")),
        Some(course_id) if course_id != section.course_id => {
            return Err(HandlerErr::bad_params("clo does not belong to the section's course")
                .with_details(json!({ "cloId": clo_id })));
        }
        Some(_) => {}
    }

    let (template_id, _) = ensure_template(conn, &section.id)?;
    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM assessment_components WHERE template_id = ?",
            [&template_id],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assessment_components(
            id, template_id, name, component_type, weight, clo_id,
            alternative_group, best_of_count, is_visible_to_students, sort_order
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &template_id,
            &name,
            component_type,
            weight,
            &clo_id,
            &alternative_group,
            best_of_count,
            i64::from(visible),
            sort_order,
        ),
    )
    .map_err(insert_err("assessment component"))?;
    Ok(json!({ "componentId": id, "sortOrder": sort_order }))
}

fn marks_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let section = load_section_ref(conn, &section_id)?;
    let components = match find_template(conn, &section.id)? {
        Some((template_id, _)) => list_components(conn, &section, &template_id)?,
        None => Vec::new(),
    };
    let students = list_enrolled(conn, &section.id)?;

    let mut stmt = conn
        .prepare(
            "SELECT am.student_id, am.component_id, am.mark
             FROM assessment_marks am
             JOIN assessment_components ac ON ac.id = am.component_id
             JOIN assessment_templates t ON t.id = ac.template_id
             WHERE t.section_id = ?",
        )
        .map_err(db_err("db_query_failed"))?;
    let mut marks: HashMap<(String, String), f64> = HashMap::new();
    let rows = stmt
        .query_map([&section.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
        })
        .map_err(db_err("db_query_failed"))?;
    for row in rows {
        let (student_id, component_id, mark) = row.map_err(db_err("db_query_failed"))?;
        marks.insert((student_id, component_id), mark);
    }

    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let cells: Vec<Option<f64>> = components
                .iter()
                .map(|c| marks.get(&(s.id.clone(), c.id.clone())).copied())
                .collect();
            json!({
                "studentId": s.id,
                "studentNo": s.student_no,
                "name": s.name,
                "marks": cells,
            })
        })
        .collect();

    Ok(json!({
        "sectionId": section.id,
        "components": components.iter().map(Component::to_json).collect::<Vec<_>>(),
        "rows": rows,
    }))
}

fn entry_error(index: usize, code: &str, message: impl Into<String>) -> Value {
    json!({ "index": index, "code": code, "message": message.into() })
}

fn marks_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries[]"));
    };
    if entries.len() > MARKS_SAVE_MAX_ENTRIES {
        return Err(HandlerErr::bad_params(format!(
            "marks payload exceeds max entries: {} > {}",
            entries.len(),
            MARKS_SAVE_MAX_ENTRIES
        )));
    }
    let section = load_section_ref(conn, &section_id)?;
    let weights: HashMap<String, f64> = match find_template(conn, &section.id)? {
        Some((template_id, _)) => list_components(conn, &section, &template_id)?
            .into_iter()
            .map(|c| (c.id, c.weight))
            .collect(),
        None => HashMap::new(),
    };

    let mut updated: usize = 0;
    let mut errors: Vec<Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            errors.push(entry_error(i, "bad_params", "entry must be an object"));
            continue;
        };
        let (Some(student_id), Some(component_id)) = (
            obj.get("studentId").and_then(|v| v.as_str()),
            obj.get("componentId").and_then(|v| v.as_str()),
        ) else {
            errors.push(entry_error(i, "bad_params", "entry needs studentId and componentId"));
            continue;
        };
        let mark = match obj.get("mark") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_f64() {
                Some(m) => Some(m),
                None => {
                    errors.push(entry_error(i, "bad_params", "mark must be a number or null"));
                    continue;
                }
            },
        };

        let Some(&weight) = weights.get(component_id) else {
            errors.push(entry_error(i, "not_found", "component is not part of this section"));
            continue;
        };
        match is_enrolled(conn, &section.id, student_id) {
            Ok(true) => {}
            Ok(false) => {
                errors.push(entry_error(i, "not_found", "student is not enrolled in this section"));
                continue;
            }
            Err(e) => {
                errors.push(entry_error(i, e.code, e.message));
                continue;
            }
        }

        let result = match mark {
            Some(m) if !(0.0..=weight).contains(&m) => {
                errors.push(entry_error(
                    i,
                    "bad_params",
                    format!("mark {} is outside 0..={}", m, weight),
                ));
                continue;
            }
            Some(m) => conn.execute(
                "INSERT INTO assessment_marks(id, component_id, student_id, mark, updated_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(component_id, student_id) DO UPDATE SET
                   mark = excluded.mark,
                   updated_at = excluded.updated_at",
                (
                    Uuid::new_v4().to_string(),
                    component_id,
                    student_id,
                    m,
                    now_timestamp(),
                ),
            ),
            // Clearing a mark that was never stored changes nothing.
            None => conn.execute(
                "DELETE FROM assessment_marks WHERE component_id = ? AND student_id = ?",
                (component_id, student_id),
            ),
        };
        match result {
            Ok(n) if n > 0 => updated += 1,
            Ok(_) => {}
            Err(e) => errors.push(entry_error(i, "db_update_failed", e.to_string())),
        }
    }

    if !errors.is_empty() {
        tracing::debug!(section_id = %section.id, rejected = errors.len(), "marks partially rejected");
    }
    Ok(json!({
        "ok": true,
        "updated": updated,
        "rejected": errors.len(),
        "errors": errors,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "assessments.template" => assessments_template,
        "assessments.setPublic" => assessments_set_public,
        "assessments.addComponent" => assessments_add_component,
        "marks.get" => marks_get,
        "marks.save" => marks_save,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
