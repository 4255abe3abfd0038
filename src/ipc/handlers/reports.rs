use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, SessionFilter};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn parse_optional_date(
    req: &Request,
    key: &str,
) -> Result<Option<NaiveDate>, serde_json::Value> {
    let Some(raw) = req.params.get(key).and_then(|v| v.as_str()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(Some)
        .map_err(|_| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be YYYY-MM-DD", key),
                None,
            )
        })
}

/// Builds the plain report-data contract consumed by the PDF/Excel
/// renderer. The renderer sees dates and counts only; identity resolution
/// never leaks across this boundary.
fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let from = match parse_optional_date(req, "from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match parse_optional_date(req, "to") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let course_name: Option<String> = match conn
        .query_row("SELECT name FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_name) = course_name else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let filter = SessionFilter {
        course_id: Some(course_id.clone()),
        from,
        to,
    };
    let sessions = match stats::load_sessions(conn, &filter) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e),
    };

    let rows: Vec<serde_json::Value> = sessions
        .iter()
        .map(|session| {
            let breakdown = stats::compute_session_stats(session);
            json!({
                "date": session.date.format("%Y-%m-%d").to_string(),
                "present": breakdown.present,
                "absent": breakdown.absent + breakdown.late,
                "total": breakdown.total,
                "percentage": breakdown.rate,
            })
        })
        .collect();

    let period = match (from, to) {
        (Some(f), Some(t)) => format!("{} to {}", f.format("%Y-%m-%d"), t.format("%Y-%m-%d")),
        (Some(f), None) => format!("from {}", f.format("%Y-%m-%d")),
        (None, Some(t)) => format!("until {}", t.format("%Y-%m-%d")),
        (None, None) => "all sessions".to_string(),
    };

    ok(
        &req.id,
        json!({
            "courseName": course_name,
            "period": period,
            "rows": rows,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.attendanceSummary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
