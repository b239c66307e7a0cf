use crate::db::now_timestamp;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, insert_err, is_enrolled, load_section_ref, with_db,
    HandlerErr,
};
use crate::ipc::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

/// A group needs at least this many members to count as valid.
const MIN_GROUP_SIZE: i64 = 2;

struct GroupRef {
    id: String,
    section_id: String,
    group_sl: i64,
}

fn load_group(conn: &Connection, group_id: &str) -> Result<GroupRef, HandlerErr> {
    conn.query_row(
        "SELECT id, section_id, group_sl FROM project_groups WHERE id = ?",
        [group_id],
        |r| {
            Ok(GroupRef {
                id: r.get(0)?,
                section_id: r.get(1)?,
                group_sl: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("project group"))
}

fn member_count(conn: &Connection, group_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM project_group_members WHERE group_id = ?",
        [group_id],
        |r| r.get(0),
    )
    .map_err(db_err("db_query_failed"))
}

fn membership_result(conn: &Connection, group: &GroupRef) -> Result<Value, HandlerErr> {
    let count = member_count(conn, &group.id)?;
    Ok(json!({
        "ok": true,
        "groupId": group.id,
        "groupSl": group.group_sl,
        "studentCount": count,
        "isValid": count >= MIN_GROUP_SIZE,
    }))
}

fn groups_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let project_name = get_optional_str(params, "projectName")?;
    let section = load_section_ref(conn, &section_id)?;

    let group_sl = match params.get("groupSl") {
        None | Some(Value::Null) => conn
            .query_row(
                "SELECT COALESCE(MAX(group_sl), 0) + 1 FROM project_groups WHERE section_id = ?",
                [&section.id],
                |r| r.get::<_, i64>(0),
            )
            .map_err(db_err("db_query_failed"))?,
        Some(v) => v
            .as_i64()
            .filter(|n| *n >= 1)
            .ok_or_else(|| HandlerErr::bad_params("groupSl must be a positive integer"))?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO project_groups(id, section_id, group_sl, project_name, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &section.id, group_sl, &project_name, now_timestamp()),
    )
    .map_err(insert_err("project group"))?;
    tracing::info!(section_id = %section.id, group_sl, "project group created");
    Ok(json!({ "groupId": id, "groupSl": group_sl, "projectName": project_name }))
}

fn groups_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let section = load_section_ref(conn, &section_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, group_sl, project_name FROM project_groups
             WHERE section_id = ?
             ORDER BY group_sl",
        )
        .map_err(db_err("db_query_failed"))?;
    let groups: Vec<(String, i64, Option<String>)> = stmt
        .query_map([&section.id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let mut members_stmt = conn
        .prepare(
            "SELECT st.id, st.student_id, st.name
             FROM project_group_members m JOIN students st ON st.id = m.student_id
             WHERE m.group_id = ?
             ORDER BY st.student_id",
        )
        .map_err(db_err("db_query_failed"))?;

    let mut out: Vec<Value> = Vec::with_capacity(groups.len());
    let mut invalid: Vec<i64> = Vec::new();
    for (id, group_sl, project_name) in groups {
        let students: Vec<Value> = members_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "studentNo": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed"))?;
        let is_valid = students.len() as i64 >= MIN_GROUP_SIZE;
        if !is_valid {
            invalid.push(group_sl);
        }
        out.push(json!({
            "id": id,
            "groupSl": group_sl,
            "projectName": project_name,
            "studentCount": students.len(),
            "isValid": is_valid,
            "students": students,
        }));
    }

    Ok(json!({
        "sectionId": section.id,
        "minGroupSize": MIN_GROUP_SIZE,
        "groups": out,
        "invalidGroups": invalid,
    }))
}

fn groups_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let n = conn
        .execute("DELETE FROM project_groups WHERE id = ?", [&group_id])
        .map_err(db_err("db_update_failed"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("project group"));
    }
    Ok(json!({ "ok": true }))
}

fn groups_add_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let student_id = get_required_str(params, "studentId")?;
    let group = load_group(conn, &group_id)?;
    if !is_enrolled(conn, &group.section_id, &student_id)? {
        return Err(HandlerErr::bad_params("student is not enrolled in the group's section")
            .with_details(json!({ "studentId": student_id })));
    }
    conn.execute(
        "INSERT INTO project_group_members(id, group_id, student_id) VALUES(?, ?, ?)",
        (Uuid::new_v4().to_string(), &group.id, &student_id),
    )
    .map_err(insert_err("group membership"))?;
    membership_result(conn, &group)
}

fn groups_remove_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let student_id = get_required_str(params, "studentId")?;
    let group = load_group(conn, &group_id)?;
    let n = conn
        .execute(
            "DELETE FROM project_group_members WHERE group_id = ? AND student_id = ?",
            (&group.id, &student_id),
        )
        .map_err(db_err("db_update_failed"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("group membership"));
    }
    membership_result(conn, &group)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let op: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "projectGroups.create" => groups_create,
        "projectGroups.list" => groups_list,
        "projectGroups.delete" => groups_delete,
        "projectGroups.addStudent" => groups_add_student,
        "projectGroups.removeStudent" => groups_remove_student,
        _ => return None,
    };
    Some(with_db(state, req, op))
}
