use crate::attainment::clo_code;
use crate::calendar::Semester;
use crate::ipc::helpers::{
    db_err, get_optional_bool, get_optional_str, get_required_f64, get_required_i64,
    get_required_str, insert_err, load_section_ref, with_db, HandlerErr,
};
use crate::ipc::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err("db_query_failed"))
}

fn require(conn: &Connection, table: &'static str, what: &str, id: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    if exists(conn, &sql, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what))
    }
}

fn departments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let short_name = get_required_str(params, "shortName")?.to_ascii_uppercase();
    let name = get_required_str(params, "name")?;
    if short_name.len() > 10 {
        return Err(HandlerErr::bad_params("shortName must be at most 10 characters"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, short_name, name) VALUES(?, ?, ?)",
        (&id, &short_name, &name),
    )
    .map_err(insert_err("department"))?;
    Ok(json!({ "departmentId": id }))
}

fn departments_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, short_name, name FROM departments ORDER BY short_name")
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "shortName": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "departments": rows }))
}

fn programs_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let department_id = get_optional_str(params, "departmentId")?;
    if let Some(d) = &department_id {
        require(conn, "departments", "department", d)?;
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(id, name, department_id) VALUES(?, ?, ?)",
        (&id, &name, &department_id),
    )
    .map_err(insert_err("program"))?;
    Ok(json!({ "programId": id }))
}

fn programs_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.name, p.department_id, d.short_name
             FROM programs p LEFT JOIN departments d ON d.id = p.department_id
             ORDER BY p.name",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "departmentId": r.get::<_, Option<String>>(2)?,
                "department": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "programs": rows }))
}

fn plos_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let description = get_optional_str(params, "description")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO plos(id, code, description) VALUES(?, ?, ?)",
        (&id, &code, &description),
    )
    .map_err(insert_err("plo"))?;
    Ok(json!({ "ploId": id }))
}

fn plos_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, code, description FROM plos ORDER BY code")
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "plos": rows }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let title = get_required_str(params, "title")?;
    let program_id = get_required_str(params, "programId")?;
    let credits = get_required_f64(params, "credits")?;
    let is_lab = get_optional_bool(params, "isLab")?.unwrap_or(false);
    if !(0.0..=99.9).contains(&credits) {
        return Err(HandlerErr::bad_params("credits must be between 0 and 99.9"));
    }
    require(conn, "programs", "program", &program_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, title, program_id, credits, is_lab) VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &code, &title, &program_id, credits, i64::from(is_lab)),
    )
    .map_err(insert_err("course"))?;
    Ok(json!({ "courseId": id }))
}

fn courses_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let program_id = get_optional_str(params, "programId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, code, title, program_id, credits, is_lab
             FROM courses
             WHERE ?1 IS NULL OR program_id = ?1
             ORDER BY code",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([&program_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "programId": r.get::<_, String>(3)?,
                "credits": r.get::<_, f64>(4)?,
                "isLab": r.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "courses": rows }))
}

fn clos_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let sl = get_required_i64(params, "sl")?;
    let description = get_required_str(params, "description")?;
    let plo_id = get_optional_str(params, "ploId")?;
    if sl < 1 {
        return Err(HandlerErr::bad_params("sl must be a positive integer"));
    }
    require(conn, "courses", "course", &course_id)?;
    if let Some(p) = &plo_id {
        require(conn, "plos", "plo", p)?;
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO clos(id, course_id, sl, plo_id, description) VALUES(?, ?, ?, ?, ?)",
        (&id, &course_id, sl, &plo_id, &description),
    )
    .map_err(insert_err("clo"))?;
    Ok(json!({ "cloId": id }))
}

fn clos_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let course_code: String = conn
        .query_row("SELECT code FROM courses WHERE id = ?", [&course_id], |r| r.get(0))
        .optional()
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("course"))?;
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.sl, c.description, c.plo_id, p.code
             FROM clos c LEFT JOIN plos p ON p.id = c.plo_id
             WHERE c.course_id = ?
             ORDER BY c.sl",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([&course_id], |r| {
            let sl: i64 = r.get(1)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sl": sl,
                "code": clo_code(&course_code, sl),
                "description": r.get::<_, String>(2)?,
                "ploId": r.get::<_, Option<String>>(3)?,
                "ploCode": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "clos": rows }))
}

fn clos_map(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let clo_id = get_required_str(params, "cloId")?;
    let plo_id = get_optional_str(params, "ploId")?;
    if let Some(p) = &plo_id {
        require(conn, "plos", "plo", p)?;
    }
    let n = conn
        .execute("UPDATE clos SET plo_id = ? WHERE id = ?", (&plo_id, &clo_id))
        .map_err(db_err("db_update_failed"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("clo"));
    }
    Ok(json!({ "ok": true }))
}

fn sections_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let name = get_required_str(params, "name")?;
    let year = get_required_i64(params, "year")?;
    let semester_raw = get_required_str(params, "semester")?;
    let semester = Semester::parse(&semester_raw).map_err(HandlerErr::from)?;
    if name.chars().count() > 10 {
        return Err(HandlerErr::bad_params("name must be at most 10 characters"));
    }
    if !(1900..=9999).contains(&year) {
        return Err(HandlerErr::bad_params("year out of range"));
    }
    require(conn, "courses", "course", &course_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, course_id, name, year, semester) VALUES(?, ?, ?, ?, ?)",
        (&id, &course_id, &name, year, semester.as_str()),
    )
    .map_err(insert_err("section"))?;
    tracing::info!(section_id = %id, course_id = %course_id, "section created");
    Ok(json!({ "sectionId": id }))
}

fn section_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "courseId": r.get::<_, String>(1)?,
        "courseCode": r.get::<_, String>(2)?,
        "name": r.get::<_, String>(3)?,
        "year": r.get::<_, i64>(4)?,
        "semester": r.get::<_, String>(5)?,
        "isLab": r.get::<_, i64>(6)? != 0,
        "studentCount": r.get::<_, i64>(7)?,
    }))
}

const SECTION_SELECT: &str = "SELECT s.id, c.id, c.code, s.name, s.year, s.semester, c.is_lab,
        (SELECT COUNT(*) FROM enrollments e WHERE e.section_id = s.id)
     FROM sections s JOIN courses c ON c.id = s.course_id";

fn sections_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_optional_str(params, "courseId")?;
    let sql = format!(
        "{} WHERE ?1 IS NULL OR s.course_id = ?1
         ORDER BY s.year DESC,
           CASE s.semester WHEN 'Spring' THEN 0 WHEN 'Summer' THEN 1 ELSE 2 END,
           c.code, s.name",
        SECTION_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([&course_id], section_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "sections": rows }))
}

fn sections_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let section = load_section_ref(conn, &section_id)?;
    let sql = format!("{} WHERE s.id = ?", SECTION_SELECT);
    let row = conn
        .query_row(&sql, [&section.id], section_json)
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "section": row }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "departments.create" => departments_create,
        "departments.list" => departments_list,
        "programs.create" => programs_create,
        "programs.list" => programs_list,
        "plos.create" => plos_create,
        "plos.list" => plos_list,
        "courses.create" => courses_create,
        "courses.list" => courses_list,
        "clos.create" => clos_create,
        "clos.list" => clos_list,
        "clos.map" => clos_map,
        "sections.create" => sections_create,
        "sections.list" => sections_list,
        "sections.get" => sections_get,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
