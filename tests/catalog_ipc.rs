mod test_support;

use serde_json::json;
use test_support::{enroll, error_code, open_workspace, request, request_ok, seed_section};

#[test]
fn catalog_lists_and_clo_mapping() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-catalog");
    let seeded = seed_section(&mut stdin, &mut reader, "CSE280", true);

    let depts = request_ok(&mut stdin, &mut reader, "d", "departments.list", json!({}));
    assert_eq!(depts["departments"][0]["shortName"], json!("DCSE280"));

    let dup = request(
        &mut stdin,
        &mut reader,
        "dup",
        "courses.create",
        json!({ "code": "CSE280", "title": "Again", "programId": seeded.program_id, "credits": 3 }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let courses = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "courses.list",
        json!({ "programId": seeded.program_id }),
    );
    assert_eq!(courses["courses"].as_array().map(|c| c.len()), Some(1));
    assert_eq!(courses["courses"][0]["isLab"], json!(true));
    let none = request_ok(&mut stdin, &mut reader, "c2", "courses.list", json!({ "programId": "other" }));
    assert_eq!(none["courses"], json!([]));

    let clos = request_ok(
        &mut stdin,
        &mut reader,
        "clos",
        "clos.list",
        json!({ "courseId": seeded.course_id }),
    );
    let rows = clos["clos"].as_array().expect("clos[]");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["code"], json!("CSE280-CLO3"));
    assert_eq!(rows[2]["ploCode"], json!("CSE280-PLO2"));

    request_ok(
        &mut stdin,
        &mut reader,
        "unmap",
        "clos.map",
        json!({ "cloId": seeded.clo_ids[2], "ploId": null }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "remap",
        "clos.map",
        json!({ "cloId": seeded.clo_ids[0], "ploId": seeded.plo_ids[1] }),
    );
    let clos = request_ok(
        &mut stdin,
        &mut reader,
        "clos2",
        "clos.list",
        json!({ "courseId": seeded.course_id }),
    );
    assert_eq!(clos["clos"][0]["ploId"], json!(seeded.plo_ids[1]));
    assert!(clos["clos"][2]["ploId"].is_null());

    let bad_sl = request(
        &mut stdin,
        &mut reader,
        "sl",
        "clos.create",
        json!({ "courseId": seeded.course_id, "sl": 0, "description": "zero" }),
    );
    assert_eq!(error_code(&bad_sl), "bad_params");

    let bad_sem = request(
        &mut stdin,
        &mut reader,
        "sem",
        "sections.create",
        json!({ "courseId": seeded.course_id, "name": "B", "year": 2024, "semester": "Winter" }),
    );
    assert_eq!(error_code(&bad_sem), "bad_params");

    enroll(&mut stdin, &mut reader, &seeded.section_id, &["2021-1-60-901,Ayesha Khan"]);
    let section = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "sections.get",
        json!({ "sectionId": seeded.section_id }),
    );
    assert_eq!(section["section"]["courseCode"], json!("CSE280"));
    assert_eq!(section["section"]["semester"], json!("Spring"));
    assert_eq!(section["section"]["studentCount"], json!(1));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "sections",
        "sections.list",
        json!({ "courseId": seeded.course_id }),
    );
    assert_eq!(listed["sections"].as_array().map(|s| s.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
}
