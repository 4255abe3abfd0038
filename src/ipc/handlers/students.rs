use crate::identity;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, SessionFilter};
use rusqlite::Connection;
use serde_json::json;
use tracing::warn;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match identity::resolve(conn, &id) {
        Ok(resolution) => ok(&req.id, json!(resolution)),
        Err(e) => store_err(&req.id, e),
    }
}

/// Resolve first, then aggregate against the resolved record's id. Marks
/// were stored against whichever representation existed at capture time,
/// and a raw account id would silently show an empty history.
fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let resolution = match identity::resolve(conn, &student_id) {
        Ok(r) => r,
        Err(e) => return store_err(&req.id, e),
    };
    let Some(identity) = &resolution.identity else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let mut filter = SessionFilter::default();
    if let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_str()) {
        filter.course_id = Some(course_id.to_string());
    }
    let sessions = match stats::load_sessions(conn, &filter) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e),
    };
    let courses = match stats::load_course_meta(conn) {
        Ok(c) => c,
        Err(e) => return store_err(&req.id, e),
    };
    let computed = stats::compute_stats(&sessions, identity.id(), &courses);

    ok(
        &req.id,
        json!({
            "student": identity,
            "foundVia": resolution.found_via,
            "isAccountIdentity": resolution.is_account_identity,
            "perCourse": computed.per_course,
            "totalPresent": computed.total_present,
            "totalClasses": computed.total_classes,
            "overallRate": computed.overall_rate,
        }),
    )
}

/// Bulk course unenrollment: the only path that deletes an imported
/// student, and only once its course set is empty.
fn handle_unenroll_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(student_ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };
    let student_ids: Vec<String> = student_ids
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let mut removed = 0usize;
    let mut deleted = 0usize;
    let mut skipped = 0usize;
    for student_id in &student_ids {
        let changed = conn.execute(
            "DELETE FROM imported_student_courses WHERE student_id = ? AND course_id = ?",
            (student_id, &course_id),
        );
        let changed = match changed {
            Ok(n) => n,
            Err(e) => {
                warn!(student_id = %student_id, error = %e, "unenroll failed; skipping");
                skipped += 1;
                continue;
            }
        };
        if changed == 0 {
            continue;
        }
        removed += 1;

        let remaining: Result<i64, _> = conn.query_row(
            "SELECT COUNT(*) FROM imported_student_courses WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        );
        match remaining {
            Ok(0) => {
                match conn.execute("DELETE FROM imported_students WHERE id = ?", [student_id]) {
                    Ok(n) if n > 0 => deleted += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(student_id = %student_id, error = %e, "orphan delete failed");
                        skipped += 1;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(student_id = %student_id, error = %e, "course count failed");
                skipped += 1;
            }
        }
    }

    ok(
        &req.id,
        json!({
            "removed": removed,
            "deleted": deleted,
            "skipped": skipped,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.resolve" => Some(handle_resolve(state, req)),
        "students.stats" => Some(handle_stats(state, req)),
        "students.unenrollCourse" => Some(handle_unenroll_course(state, req)),
        _ => None,
    }
}
