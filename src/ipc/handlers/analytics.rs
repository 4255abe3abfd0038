use crate::analytics;
use crate::identity;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, SessionFilter};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

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

/// Resolve the route id to the identity the marks were written against,
/// then load every session once. All three student-facing series share
/// this path so they cannot drift apart.
fn resolve_and_load(
    conn: &Connection,
    req: &Request,
) -> Result<(String, Vec<stats::SessionRow>), serde_json::Value> {
    let student_id = required_str(req, "studentId")?;
    let resolution = identity::resolve(conn, &student_id).map_err(|e| store_err(&req.id, e))?;
    let Some(identity) = resolution.identity else {
        return Err(err(&req.id, "not_found", "student not found", None));
    };
    let sessions = stats::load_sessions(conn, &SessionFilter::default())
        .map_err(|e| store_err(&req.id, e))?;
    Ok((identity.id().to_string(), sessions))
}

fn handle_student_trend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (student_id, sessions) = match resolve_and_load(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let trend = analytics::monthly_trend(&sessions, &student_id);
    ok(&req.id, json!({ "studentId": student_id, "points": trend }))
}

fn handle_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (student_id, sessions) = match resolve_and_load(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let courses = match stats::load_course_meta(conn) {
        Ok(c) => c,
        Err(e) => return store_err(&req.id, e),
    };
    let computed = stats::compute_stats(&sessions, &student_id, &courses);
    let series = analytics::distribution(computed.total_present, computed.total_classes);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "series": series,
            "overallRate": computed.overall_rate,
        }),
    )
}

fn handle_course_comparison(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (student_id, sessions) = match resolve_and_load(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let courses = match stats::load_course_meta(conn) {
        Ok(c) => c,
        Err(e) => return store_err(&req.id, e),
    };
    let computed = stats::compute_stats(&sessions, &student_id, &courses);
    let codes: HashMap<String, String> = courses
        .iter()
        .map(|(id, meta)| (id.clone(), meta.code.clone()))
        .collect();
    let points = analytics::course_comparison(&computed.per_course, &codes);
    ok(&req.id, json!({ "studentId": student_id, "courses": points }))
}

/// The dashboard is the fourth aggregation call site: per-course session
/// tallies folded from the same per-session counting as everywhere else.
fn handle_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let sessions = match stats::load_sessions(conn, &SessionFilter::default()) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e),
    };
    let courses = match stats::load_course_meta(conn) {
        Ok(c) => c,
        Err(e) => return store_err(&req.id, e),
    };

    let mut order: Vec<String> = Vec::new();
    let mut per_course: HashMap<String, stats::CourseStatSnapshot> = HashMap::new();
    let mut total_present = 0i64;
    let mut total_marks = 0i64;

    for session in &sessions {
        let breakdown = stats::compute_session_stats(session);
        let snapshot = per_course
            .entry(session.course_id.clone())
            .or_insert_with(|| {
                order.push(session.course_id.clone());
                let meta = courses.get(&session.course_id);
                stats::CourseStatSnapshot {
                    course_id: session.course_id.clone(),
                    name: meta.map(|m| m.name.clone()).unwrap_or_default(),
                    present: 0,
                    absent: 0,
                    total: 0,
                    faculty_name: meta.and_then(|m| m.faculty_name.clone()),
                }
            });
        snapshot.present += breakdown.present;
        snapshot.absent += breakdown.absent + breakdown.late;
        snapshot.total += breakdown.total;
        total_present += breakdown.present;
        total_marks += breakdown.total;
    }

    let snapshots: Vec<_> = order
        .into_iter()
        .filter_map(|course_id| per_course.remove(&course_id))
        .collect();

    ok(
        &req.id,
        json!({
            "perCourse": snapshots,
            "totalSessions": sessions.len(),
            "totalPresent": total_present,
            "totalMarks": total_marks,
            "overallRate": stats::rate(total_present, total_marks),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.studentTrend" => Some(handle_student_trend(state, req)),
        "analytics.distribution" => Some(handle_distribution(state, req)),
        "analytics.courseComparison" => Some(handle_course_comparison(state, req)),
        "analytics.dashboard" => Some(handle_dashboard(state, req)),
        _ => None,
    }
}
