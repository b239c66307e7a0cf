mod test_support;

use serde_json::json;
use test_support::{error_code, open_workspace, request, request_ok, seed_section};

#[test]
fn defaults_and_patches() {
    let (mut child, mut stdin, mut reader) = open_workspace("obe-setup");

    let current = request_ok(&mut stdin, &mut reader, "get", "setup.get", json!({}));
    assert_eq!(
        current["schedule"],
        json!({ "theorySessions": 28, "labSessions": 14, "maxWeeks": 52 })
    );
    assert_eq!(current["attainment"], json!({ "decimals": 2 }));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "upd",
        "setup.update",
        json!({ "section": "schedule", "patch": { "labSessions": 12 } }),
    );
    assert_eq!(updated["values"]["labSessions"], json!(12));
    assert_eq!(updated["values"]["theorySessions"], json!(28));

    for (i, patch) in [
        json!({ "section": "schedule", "patch": { "labSessions": 0 } }),
        json!({ "section": "schedule", "patch": { "weekends": true } }),
        json!({ "section": "attainment", "patch": { "decimals": 9 } }),
        json!({ "section": "grading", "patch": {} }),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("bad{}", i), "setup.update", patch);
        assert_eq!(error_code(&resp), "bad_params");
    }

    let seeded = seed_section(&mut stdin, &mut reader, "CSE270", true);
    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "gen",
        "sessions.generate",
        json!({ "sectionId": seeded.section_id, "firstDate": "2024-01-01", "secondDate": "2024-01-03" }),
    );
    assert_eq!(generated["created"], json!(12));

    drop(stdin);
    let _ = child.wait();
}
