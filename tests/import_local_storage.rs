mod test_support;

use serde_json::json;
use test_support::{authority, request_ok, select_workspace, spawn_sidecar, temp_dir};

#[test]
fn dump_import_quarantines_nonconforming_records() {
    let workspace = temp_dir("gradebook-import-dump");
    let teacher = authority("Teacher");
    let student = authority("Student");
    let users = json!([
        { "authority": teacher, "username": "frizzle", "role": "teacher", "createdAt": 10 },
        { "authority": student, "username": "arnold", "role": "Student", "createdAt": 11 },
        { "authority": authority("Ghost"), "username": "ghost", "role": "Janitor" },
    ]);
    let mut dump = json!({
        // Browser storage keeps values as JSON strings.
        "all_users": users.to_string(),
        "all_classrooms": [
            { "id": "c1", "name": "Bus", "course": "Science", "teacher": teacher, "students": [student] },
        ],
        "all_grades": [
            {
                "id": "g1", "studentWallet": student, "teacherWallet": teacher,
                "assignmentName": "Quiz", "grade": 45, "maxGrade": 50, "percentage": 12,
                "timestamp": 1_700_000_000_000i64,
            },
            {
                "id": "g2", "studentWallet": student, "teacherWallet": teacher,
                "assignmentName": "Overflow", "grade": 60, "maxGrade": 50,
                "timestamp": 1_700_000_000_000i64,
            },
        ],
        "unrelated_key": "ignored",
    });
    dump[format!("user_{}", teacher)] = json!(users[0].to_string());
    let dump_path = workspace.join("localStorage.json");
    std::fs::write(&dump_path, dump.to_string()).expect("write dump");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "import.localStorage",
        json!({ "path": dump_path.to_string_lossy() }),
    );
    assert_eq!(summary["users"], 2);
    assert_eq!(summary["classrooms"], 1);
    assert_eq!(summary["grades"], 1);
    assert_eq!(summary["quarantined"], 2);

    let q = request_ok(&mut stdin, &mut reader, "q1", "quarantine.list", json!({}));
    let records = q["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r["collection"] == "users"));
    assert!(records.iter().any(|r| r["collection"] == "grades" && r["recordKey"] == "g2"));

    let classrooms = request_ok(&mut stdin, &mut reader, "c", "classrooms.list", json!({}));
    assert_eq!(classrooms["classrooms"][0]["students"][0]["pubkey"], student.as_str());
    let grades = request_ok(&mut stdin, &mut reader, "g", "grades.list", json!({}));
    assert_eq!(grades["grades"][0]["percentage"], 90);

    // Everything is already present the second time round.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "i2",
        "import.localStorage",
        json!({ "path": dump_path.to_string_lossy() }),
    );
    assert_eq!(again["users"], 0);
    assert_eq!(again["grades"], 0);
    assert_eq!(again["quarantined"], 6);
    let q = request_ok(&mut stdin, &mut reader, "q2", "quarantine.list", json!({}));
    assert_eq!(q["records"].as_array().map(|a| a.len()), Some(8));
    let _ = std::fs::remove_dir_all(workspace);
}
