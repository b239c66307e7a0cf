mod test_support;

use serde_json::json;
use test_support::{enroll, error_code, open_workspace, request, request_ok, seed_section, str_field};

#[test]
fn groups_track_members_and_validity() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-project-groups");
    let seeded = seed_section(&mut stdin, &mut reader, "CSE400", false);
    let other = seed_section(&mut stdin, &mut reader, "CSE401", false);

    let roster = enroll(
        &mut stdin,
        &mut reader,
        &seeded.section_id,
        &[
            "2020-1-60-001,Ayesha Khan",
            "2020-1-60-002,Rahim Uddin",
            "2020-1-60-003,Nusrat Jahan",
        ],
    );
    let s1 = str_field(&roster[0], "id");
    let s2 = str_field(&roster[1], "id");
    let s3 = str_field(&roster[2], "id");
    let outsider_roster = enroll(
        &mut stdin,
        &mut reader,
        &other.section_id,
        &["2020-1-60-099,Tanvir Hasan"],
    );
    let outsider = str_field(&outsider_roster[0], "id");

    let g1 = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "projectGroups.create",
        json!({ "sectionId": seeded.section_id, "projectName": "Library System" }),
    );
    assert_eq!(g1["groupSl"], json!(1));
    let g1_id = str_field(&g1, "groupId");
    let g2 = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "projectGroups.create",
        json!({ "sectionId": seeded.section_id }),
    );
    assert_eq!(g2["groupSl"], json!(2));
    let g2_id = str_field(&g2, "groupId");

    let dup = request(
        &mut stdin,
        &mut reader,
        "dup-sl",
        "projectGroups.create",
        json!({ "sectionId": seeded.section_id, "groupSl": 2 }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add1",
        "projectGroups.addStudent",
        json!({ "groupId": g1_id, "studentId": s1 }),
    );
    assert_eq!(added["studentCount"], json!(1));
    assert_eq!(added["isValid"], json!(false));
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add2",
        "projectGroups.addStudent",
        json!({ "groupId": g1_id, "studentId": s2 }),
    );
    assert_eq!(added["studentCount"], json!(2));
    assert_eq!(added["isValid"], json!(true));
    request_ok(
        &mut stdin,
        &mut reader,
        "add3",
        "projectGroups.addStudent",
        json!({ "groupId": g2_id, "studentId": s3 }),
    );

    let again = request(
        &mut stdin,
        &mut reader,
        "add-again",
        "projectGroups.addStudent",
        json!({ "groupId": g1_id, "studentId": s1 }),
    );
    assert_eq!(error_code(&again), "conflict");
    let foreign = request(
        &mut stdin,
        &mut reader,
        "add-outsider",
        "projectGroups.addStudent",
        json!({ "groupId": g1_id, "studentId": outsider }),
    );
    assert_eq!(error_code(&foreign), "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "projectGroups.list",
        json!({ "sectionId": seeded.section_id }),
    );
    let groups = listed["groups"].as_array().expect("groups[]");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["projectName"], json!("Library System"));
    assert_eq!(groups[0]["studentCount"], json!(2));
    assert_eq!(groups[0]["isValid"], json!(true));
    assert_eq!(groups[0]["students"][0]["studentNo"], json!("2020-1-60-001"));
    assert_eq!(groups[1]["isValid"], json!(false));
    assert_eq!(listed["invalidGroups"], json!([2]));

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "remove",
        "projectGroups.removeStudent",
        json!({ "groupId": g1_id, "studentId": s2 }),
    );
    assert_eq!(removed["studentCount"], json!(1));
    assert_eq!(removed["isValid"], json!(false));
    let missing = request(
        &mut stdin,
        &mut reader,
        "remove-again",
        "projectGroups.removeStudent",
        json!({ "groupId": g1_id, "studentId": s2 }),
    );
    assert_eq!(error_code(&missing), "not_found");

    request_ok(
        &mut stdin,
        &mut reader,
        "delete",
        "projectGroups.delete",
        json!({ "groupId": g2_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "delete-again",
        "projectGroups.delete",
        json!({ "groupId": g2_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list2",
        "projectGroups.list",
        json!({ "sectionId": seeded.section_id }),
    );
    assert_eq!(listed["groups"].as_array().map(Vec::len), Some(1));
    assert_eq!(listed["invalidGroups"], json!([1]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unenrolling_drops_group_membership() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-project-groups-unenroll");
    let seeded = seed_section(&mut stdin, &mut reader, "CSE402", false);
    let roster = enroll(
        &mut stdin,
        &mut reader,
        &seeded.section_id,
        &["2020-1-60-011,Farhan Ahmed", "2020-1-60-012,Sadia Islam"],
    );
    let s1 = str_field(&roster[0], "id");
    let s2 = str_field(&roster[1], "id");

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "g",
        "projectGroups.create",
        json!({ "sectionId": seeded.section_id, "groupSl": 5, "projectName": "Compiler" }),
    );
    assert_eq!(group["groupSl"], json!(5));
    let group_id = str_field(&group, "groupId");
    for (i, s) in [&s1, &s2].into_iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("add-{}", i),
            "projectGroups.addStudent",
            json!({ "groupId": group_id, "studentId": s }),
        );
    }

    request_ok(
        &mut stdin,
        &mut reader,
        "unenroll",
        "enrollments.remove",
        json!({ "sectionId": seeded.section_id, "studentId": s2 }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "projectGroups.list",
        json!({ "sectionId": seeded.section_id }),
    );
    assert_eq!(listed["groups"][0]["studentCount"], json!(1));
    assert_eq!(listed["groups"][0]["isValid"], json!(false));
    assert_eq!(listed["invalidGroups"], json!([5]));

    drop(stdin);
    let _ = child.wait();
}
