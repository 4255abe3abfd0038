mod test_support;

use serde_json::json;
use test_support::{request_ok, setup_course, spawn_sidecar, temp_dir};

#[test]
fn account_id_lands_on_the_imported_record_that_holds_the_marks() {
    let workspace = temp_dir("rollcall-resolver-retarget");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let course_id = setup_course(&mut stdin, &mut reader, &workspace, "Algorithms", "CS301");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.apply",
        json!({
            "courseId": course_id,
            "text": "roll_number,name,email\n21CS001,Asha Rao,asha@example.edu\n"
        }),
    );
    let account = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "accounts.create",
        json!({ "name": "Asha Rao", "email": "asha@example.edu" }),
    );
    let account_id = account
        .get("id")
        .and_then(|v| v.as_str())
        .expect("account id")
        .to_string();

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.resolve",
        json!({ "id": account_id }),
    );
    assert_eq!(
        resolved.get("foundVia").and_then(|v| v.as_str()),
        Some("account-email")
    );
    assert_eq!(
        resolved
            .get("isAccountIdentity")
            .and_then(|v| v.as_bool()),
        Some(false)
    );
    let identity = resolved.get("identity").expect("identity");
    assert_eq!(
        identity.get("variant").and_then(|v| v.as_str()),
        Some("imported")
    );
    assert_eq!(
        identity.get("rollNumber").and_then(|v| v.as_str()),
        Some("21CS001")
    );
}

#[test]
fn account_without_linked_import_falls_back_to_itself() {
    let workspace = temp_dir("rollcall-resolver-fallback");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _course_id = setup_course(&mut stdin, &mut reader, &workspace, "Databases", "CS302");

    let account = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "accounts.create",
        json!({ "name": "Nobody Imported", "email": "nobody@example.edu" }),
    );
    let account_id = account
        .get("id")
        .and_then(|v| v.as_str())
        .expect("account id")
        .to_string();

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.resolve",
        json!({ "id": account_id }),
    );
    assert_eq!(
        resolved.get("foundVia").and_then(|v| v.as_str()),
        Some("account-fallback")
    );
    assert_eq!(
        resolved
            .get("isAccountIdentity")
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    // Deterministic: the same question gets the same answer.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.resolve",
        json!({ "id": account_id }),
    );
    assert_eq!(resolved, again);
}

#[test]
fn unknown_id_is_a_miss_not_an_error() {
    let workspace = temp_dir("rollcall-resolver-miss");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.resolve",
        json!({ "id": "no-such-person" }),
    );
    assert!(resolved.get("identity").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(resolved.get("foundVia").and_then(|v| v.as_str()), Some("none"));
}

#[test]
fn enrolled_profile_resolves_through_its_account() {
    let workspace = temp_dir("rollcall-resolver-enrolled");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let course_id = setup_course(&mut stdin, &mut reader, &workspace, "Networks", "CS303");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.apply",
        json!({
            "courseId": course_id,
            "text": "roll_number,name,email\n21CS005,Meena Pillai,meena@example.edu\n"
        }),
    );
    let account = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "accounts.create",
        json!({ "name": "Meena Pillai", "email": "meena@example.edu" }),
    );
    let account_id = account
        .get("id")
        .and_then(|v| v.as_str())
        .expect("account id")
        .to_string();
    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrolled.create",
        json!({ "accountId": account_id, "rollNumber": "21CS005", "department": "CSE" }),
    );
    let enrolled_id = enrolled
        .get("id")
        .and_then(|v| v.as_str())
        .expect("enrolled id")
        .to_string();

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.resolve",
        json!({ "id": enrolled_id }),
    );
    assert_eq!(
        resolved.get("foundVia").and_then(|v| v.as_str()),
        Some("enrolled-email")
    );
    let identity = resolved.get("identity").expect("identity");
    assert_eq!(
        identity.get("variant").and_then(|v| v.as_str()),
        Some("imported")
    );
}
