mod test_support;

use serde_json::json;
use test_support::{error_code, open_workspace, request, request_ok, str_field};

#[test]
fn add_check_and_delete() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-holidays-crud");

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add",
        "holidays.add",
        json!({ "name": "Exam Break", "startDate": "2024-03-10", "endDate": "2024-03-12" }),
    );
    let holiday_id = str_field(&added["holiday"], "id");
    assert_eq!(added["holiday"]["endDate"], json!("2024-03-12"));

    let inside = request_ok(&mut stdin, &mut reader, "c1", "holidays.check", json!({ "date": "2024-03-11" }));
    assert_eq!(inside["isHoliday"], json!(true));
    assert_eq!(inside["name"], json!("Exam Break"));

    let outside = request_ok(&mut stdin, &mut reader, "c2", "holidays.check", json!({ "date": "2024-03-13" }));
    assert_eq!(outside["isHoliday"], json!(false));
    assert!(outside["name"].is_null());

    let backwards = request(
        &mut stdin,
        &mut reader,
        "bad",
        "holidays.add",
        json!({ "name": "Oops", "startDate": "2024-03-10", "endDate": "2024-03-09" }),
    );
    assert_eq!(error_code(&backwards), "bad_params");

    request_ok(&mut stdin, &mut reader, "del", "holidays.delete", json!({ "holidayId": holiday_id }));
    let again = request(&mut stdin, &mut reader, "del2", "holidays.delete", json!({ "holidayId": holiday_id }));
    assert_eq!(error_code(&again), "not_found");

    let listed = request_ok(&mut stdin, &mut reader, "list", "holidays.list", json!({}));
    assert_eq!(listed["holidays"], json!([]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn semester_preset_replaces_the_year() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-holidays-preset");

    request_ok(
        &mut stdin,
        &mut reader,
        "old",
        "holidays.add",
        json!({ "name": "Stale Entry", "startDate": "2024-05-05" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "keep",
        "holidays.add",
        json!({ "name": "Next Year", "startDate": "2025-01-01" }),
    );

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "load",
        "holidays.loadSemester",
        json!({ "semester": "Fall", "year": 2024 }),
    );
    let inserted = loaded["inserted"].as_u64().expect("inserted");
    assert!(inserted > 0);

    let listed = request_ok(&mut stdin, &mut reader, "list", "holidays.list", json!({}));
    let holidays = listed["holidays"].as_array().expect("holidays[]");
    assert_eq!(holidays.len() as u64, inserted + 1);
    assert!(holidays.iter().all(|h| h["name"] != json!("Stale Entry")));
    assert!(holidays.iter().any(|h| h["name"] == json!("Next Year")));
    assert!(holidays
        .iter()
        .filter(|h| h["name"] != json!("Next Year"))
        .all(|h| str_field(h, "startDate").starts_with("2024-")));

    let bad = request(
        &mut stdin,
        &mut reader,
        "bad",
        "holidays.loadSemester",
        json!({ "semester": "Winter", "year": 2024 }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
