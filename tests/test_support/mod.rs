#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_obed");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn obed");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Error code of a failed response, panicking if the request succeeded.
pub fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected failure: {}",
        value
    );
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// Catalog rows shared by most scenarios: one program, two PLOs, one course
/// with three CLOs (CLO1, CLO2 -> PLO1; CLO3 -> PLO2) and a single section.
pub struct Seeded {
    pub program_id: String,
    pub plo_ids: Vec<String>,
    pub course_id: String,
    pub clo_ids: Vec<String>,
    pub section_id: String,
}

pub fn seed_section(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    course_code: &str,
    is_lab: bool,
) -> Seeded {
    let dept = request_ok(
        stdin,
        reader,
        "seed-dept",
        "departments.create",
        json!({ "shortName": format!("D{}", course_code), "name": "Computer Science" }),
    );
    let program = request_ok(
        stdin,
        reader,
        "seed-program",
        "programs.create",
        json!({ "name": "BSc CSE", "departmentId": str_field(&dept, "departmentId") }),
    );
    let program_id = str_field(&program, "programId");

    let mut plo_ids = Vec::new();
    for n in 1..=2 {
        let plo = request_ok(
            stdin,
            reader,
            &format!("seed-plo-{}", n),
            "plos.create",
            json!({ "code": format!("{}-PLO{}", course_code, n), "description": "outcome" }),
        );
        plo_ids.push(str_field(&plo, "ploId"));
    }

    let course = request_ok(
        stdin,
        reader,
        "seed-course",
        "courses.create",
        json!({
            "code": course_code,
            "title": "Data Structures",
            "programId": program_id,
            "credits": 3.0,
            "isLab": is_lab
        }),
    );
    let course_id = str_field(&course, "courseId");

    let mut clo_ids = Vec::new();
    for (sl, plo_idx) in [(1, 0usize), (2, 0), (3, 1)] {
        let clo = request_ok(
            stdin,
            reader,
            &format!("seed-clo-{}", sl),
            "clos.create",
            json!({
                "courseId": course_id,
                "sl": sl,
                "description": format!("outcome {}", sl),
                "ploId": plo_ids[plo_idx]
            }),
        );
        clo_ids.push(str_field(&clo, "cloId"));
    }

    let section = request_ok(
        stdin,
        reader,
        "seed-section",
        "sections.create",
        json!({ "courseId": course_id, "name": "A", "year": 2024, "semester": "Spring" }),
    );

    Seeded {
        program_id,
        plo_ids,
        course_id,
        clo_ids,
        section_id: str_field(&section, "sectionId"),
    }
}

/// Spawn the daemon and open a fresh workspace.
pub fn open_workspace(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    (child, stdin, reader)
}

/// Bulk-enroll `student_no,name` lines and return the enrolled roster.
pub fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    section_id: &str,
    lines: &[&str],
) -> Vec<serde_json::Value> {
    request_ok(
        stdin,
        reader,
        "seed-enroll",
        "enrollments.bulk",
        json!({ "sectionId": section_id, "lines": lines }),
    );
    let list = request_ok(
        stdin,
        reader,
        "seed-roster",
        "enrollments.list",
        json!({ "sectionId": section_id }),
    );
    list["students"].as_array().cloned().unwrap_or_default()
}
