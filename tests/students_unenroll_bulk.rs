mod test_support;

use serde_json::json;
use test_support::{request_ok, setup_course, spawn_sidecar, temp_dir};

#[test]
fn unenrollment_deletes_only_course_orphaned_students() {
    let workspace = temp_dir("rollcall-unenroll");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let algo = setup_course(&mut stdin, &mut reader, &workspace, "Algorithms", "CS301");
    let db_course = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "courses.create",
        json!({ "name": "Databases", "code": "CS302" }),
    );
    let db_id = db_course
        .get("id")
        .and_then(|v| v.as_str())
        .expect("course id")
        .to_string();

    // One student in both courses, one only in Algorithms.
    for (course, text) in [
        (&algo, "roll_number,name\n21CS001,Asha Rao\n21CS002,Vikram Shah\n"),
        (&db_id, "roll_number,name\n21CS001,Asha Rao\n"),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "imp",
            "import.apply",
            json!({ "courseId": course, "text": text }),
        );
    }

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "pv",
        "import.preview",
        json!({ "text": "roll_number,name\n21CS001,x\n21CS002,x\n" }),
    );
    let rows = preview.get("rows").and_then(|v| v.as_array()).expect("rows");
    let both_id = rows[0]
        .get("matchedStudentId")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();
    let only_algo_id = rows[1]
        .get("matchedStudentId")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "un",
        "students.unenrollCourse",
        json!({ "courseId": algo, "studentIds": [both_id.clone(), only_algo_id.clone(), "not-a-student".to_string()] }),
    );
    assert_eq!(outcome.get("removed").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(outcome.get("deleted").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(outcome.get("skipped").and_then(|v| v.as_u64()), Some(0));

    // The dual-enrolled student survives with the other course intact.
    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "rv",
        "students.resolve",
        json!({ "id": both_id }),
    );
    let identity = resolved.get("identity").expect("identity");
    assert_eq!(
        identity
            .get("courses")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    // The orphaned one is gone from every store.
    let gone = request_ok(
        &mut stdin,
        &mut reader,
        "rv2",
        "students.resolve",
        json!({ "id": only_algo_id }),
    );
    assert!(gone.get("identity").map(|v| v.is_null()).unwrap_or(false));
}
