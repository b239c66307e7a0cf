mod test_support;

use serde_json::json;
use test_support::{enroll, open_workspace, request, request_ok, seed_section, str_field};

fn add_component(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    section_id: &str,
    name: &str,
    weight: f64,
    clo_id: &str,
) -> String {
    let r = request_ok(
        stdin,
        reader,
        &format!("comp-{}", name),
        "assessments.addComponent",
        json!({
            "sectionId": section_id,
            "name": name,
            "componentType": "THEORY",
            "weight": weight,
            "cloId": clo_id
        }),
    );
    str_field(&r, "componentId")
}

#[test]
fn section_attainment_rolls_clos_into_plos() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-attainment-section");
    let seeded = seed_section(&mut stdin, &mut reader, "CSE250", false);
    let roster = enroll(
        &mut stdin,
        &mut reader,
        &seeded.section_id,
        &[
            "2021-1-60-201,Ayesha Khan",
            "2021-1-60-202,Rahim Uddin",
            "2021-1-60-203,Tanvir Ahmed",
        ],
    );
    let a = str_field(&roster[0], "id");
    let b = str_field(&roster[1], "id");

    let quiz = add_component(&mut stdin, &mut reader, &seeded.section_id, "Quiz", 10.0, &seeded.clo_ids[0]);
    let quiz2 = add_component(&mut stdin, &mut reader, &seeded.section_id, "Quiz 2", 10.0, &seeded.clo_ids[0]);
    let mid = add_component(&mut stdin, &mut reader, &seeded.section_id, "Mid", 20.0, &seeded.clo_ids[1]);
    let fin = add_component(&mut stdin, &mut reader, &seeded.section_id, "Final", 40.0, &seeded.clo_ids[2]);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "marks",
        "marks.save",
        json!({
            "sectionId": seeded.section_id,
            "entries": [
                { "studentId": a, "componentId": quiz, "mark": 8 },
                { "studentId": a, "componentId": mid, "mark": 15 },
                { "studentId": a, "componentId": fin, "mark": 30 },
                { "studentId": b, "componentId": quiz, "mark": 5 },
                { "studentId": b, "componentId": quiz2, "mark": 6 }
            ]
        }),
    );
    assert_eq!(saved["rejected"], json!(0));

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "obe",
        "obe.sectionAttainment",
        json!({ "sectionId": seeded.section_id }),
    );
    let students = report["students"].as_array().expect("students[]");
    assert_eq!(students.len(), 3);

    let sa = &students[0];
    assert_eq!(sa["studentNo"], json!("2021-1-60-201"));
    assert_eq!(sa["clo"]["CSE250-CLO1"], json!(80.0));
    assert_eq!(sa["clo"]["CSE250-CLO2"], json!(75.0));
    assert_eq!(sa["clo"]["CSE250-CLO3"], json!(75.0));
    assert_eq!(sa["plo"]["CSE250-PLO1"], json!(77.5));
    assert_eq!(sa["plo"]["CSE250-PLO2"], json!(75.0));

    // Only CLO1 has marks; the other mapped CLOs pull the PLO means down.
    let sb = &students[1];
    assert_eq!(sb["clo"], json!({ "CSE250-CLO1": 55.0 }));
    assert_eq!(sb["plo"]["CSE250-PLO1"], json!(27.5));
    assert_eq!(sb["plo"]["CSE250-PLO2"], json!(0.0));

    let sc = &students[2];
    assert_eq!(sc["clo"], json!({}));
    assert_eq!(sc["plo"], json!({}));

    assert_eq!(report["cloAverages"]["CSE250-CLO1"], json!(67.5));
    assert_eq!(report["cloAverages"]["CSE250-CLO3"], json!(75.0));
    assert_eq!(report["ploAverages"]["CSE250-PLO1"], json!(52.5));
    assert_eq!(report["ploAverages"]["CSE250-PLO2"], json!(37.5));

    let plos = report["plos"].as_array().expect("plos[]");
    assert_eq!(plos.len(), 2);
    assert_eq!(plos[0]["cloCodes"], json!(["CSE250-CLO1", "CSE250-CLO2"]));

    request_ok(
        &mut stdin,
        &mut reader,
        "decimals",
        "setup.update",
        json!({ "section": "attainment", "patch": { "decimals": 0 } }),
    );
    let rounded = request_ok(
        &mut stdin,
        &mut reader,
        "obe2",
        "obe.sectionAttainment",
        json!({ "sectionId": seeded.section_id }),
    );
    assert_eq!(rounded["ploAverages"]["CSE250-PLO2"], json!(38.0));

    let missing = request(
        &mut stdin,
        &mut reader,
        "missing",
        "obe.sectionAttainment",
        json!({ "sectionId": "nope" }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn student_history_lists_terms_oldest_first() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-attainment-history");
    let seeded = seed_section(&mut stdin, &mut reader, "CSE251", false);
    let roster = enroll(&mut stdin, &mut reader, &seeded.section_id, &["2021-1-60-301,Nadia Islam"]);
    let student = str_field(&roster[0], "id");

    let older = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "older",
            "sections.create",
            json!({ "courseId": seeded.course_id, "name": "B", "year": 2023, "semester": "Fall" }),
        ),
        "sectionId",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "enroll-older",
        "enrollments.add",
        json!({ "sectionId": older, "studentId": student, "enrollmentType": "Backlog" }),
    );

    let spring_quiz = add_component(&mut stdin, &mut reader, &seeded.section_id, "Quiz", 10.0, &seeded.clo_ids[0]);
    let fall_quiz = add_component(&mut stdin, &mut reader, &older, "Quiz", 20.0, &seeded.clo_ids[0]);
    request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "marks.save",
        json!({ "sectionId": seeded.section_id, "entries": [{ "studentId": student, "componentId": spring_quiz, "mark": 9 }] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "marks.save",
        json!({ "sectionId": older, "entries": [{ "studentId": student, "componentId": fall_quiz, "mark": 8 }] }),
    );

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "history",
        "obe.studentHistory",
        json!({ "studentId": student }),
    );
    assert_eq!(history["studentNo"], json!("2021-1-60-301"));
    let entries = history["history"].as_array().expect("history[]");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["term"], json!("Fall 2023"));
    assert_eq!(entries[0]["clo"]["CSE251-CLO1"], json!(40.0));
    assert_eq!(entries[1]["term"], json!("Spring 2024"));
    assert_eq!(entries[1]["clo"]["CSE251-CLO1"], json!(90.0));

    drop(stdin);
    let _ = child.wait();
}
