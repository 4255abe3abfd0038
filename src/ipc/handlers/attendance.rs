use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, MarkSubmission};
use crate::stats::{self, SessionFilter};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: None,
    })
}

fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn parse_marks(params: &serde_json::Value) -> Result<Vec<(usize, Option<MarkSubmission>)>, HandlerErr> {
    let Some(raw) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing marks".to_string(),
            details: None,
        });
    };
    Ok(raw
        .iter()
        .enumerate()
        .map(|(i, v)| (i, serde_json::from_value::<MarkSubmission>(v.clone()).ok()))
        .collect())
}

/// Create or replace the session row for (course, date). The session write
/// is the one fatal step of a capture; everything per-mark degrades to
/// skip-and-continue.
fn upsert_session(
    conn: &Connection,
    course_id: &str,
    date: &str,
    topic: Option<&str>,
    faculty_id: Option<&str>,
) -> Result<String, HandlerErr> {
    let stamp = chrono::Utc::now().to_rfc3339();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_sessions WHERE course_id = ? AND date = ?",
            (course_id, date),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    if let Some(session_id) = existing {
        conn.execute(
            "UPDATE attendance_sessions SET topic = ?, faculty_id = ?, updated_at = ? WHERE id = ?",
            (topic, faculty_id, &stamp, &session_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_sessions" })),
        })?;
        // Re-capture replaces the mark list wholesale.
        conn.execute(
            "DELETE FROM attendance_marks WHERE session_id = ?",
            [&session_id],
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_marks" })),
        })?;
        return Ok(session_id);
    }

    let session_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance_sessions(id, course_id, date, topic, faculty_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&session_id, course_id, date, topic, faculty_id, &stamp, &stamp),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_sessions" })),
    })?;
    Ok(session_id)
}

fn attendance_capture(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date(&date_raw)?;
    let date_text = date.format("%Y-%m-%d").to_string();
    let topic = params.get("topic").and_then(|v| v.as_str());
    let faculty_id = params.get("facultyId").and_then(|v| v.as_str());
    let parsed = parse_marks(params)?;

    if !course_exists(conn, &course_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    }

    let mut submissions = Vec::new();
    let mut bad_entries = Vec::new();
    for (index, item) in parsed {
        match item {
            Some(mark) => submissions.push(mark),
            None => bad_entries.push(index),
        }
    }

    let mut outcome =
        reconcile::reconcile_batch(conn, &submissions, &course_id).map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.message,
            details: e.details,
        })?;
    for index in bad_entries {
        outcome.errors += 1;
        outcome.warnings.push(reconcile::BatchItemWarning {
            index,
            code: "invalid_reference".to_string(),
            message: "mark entry is not an object with a status".to_string(),
        });
    }

    let session_id = upsert_session(conn, &course_id, &date_text, topic, faculty_id)?;

    // Marks are written sequentially in submission order; a failed insert
    // downgrades that mark to skipped rather than aborting the capture.
    let mut written = 0usize;
    for (sort_order, record) in outcome.records.iter().enumerate() {
        let mark_id = Uuid::new_v4().to_string();
        let insert = conn.execute(
            "INSERT INTO attendance_marks(id, session_id, identity_ref, identity_variant,
                                          status, remarks, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &mark_id,
                &session_id,
                &record.identity_ref,
                record.identity_variant,
                &record.status,
                &record.remarks,
                sort_order as i64,
            ),
        );
        match insert {
            Ok(_) => written += 1,
            Err(e) => {
                warn!(identity_ref = %record.identity_ref, error = %e, "failed to write mark");
                outcome.skipped += 1;
                outcome.warnings.push(reconcile::BatchItemWarning {
                    index: sort_order,
                    code: "db_update_failed".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(json!({
        "sessionId": session_id,
        "date": date_text,
        "records": outcome.records,
        "responses": outcome.responses,
        "processed": written,
        "skipped": outcome.skipped,
        "errors": outcome.errors,
        "warnings": outcome.warnings,
    }))
}

fn find_session(
    conn: &Connection,
    course_id: &str,
    date: &str,
) -> Result<Option<stats::SessionRow>, HandlerErr> {
    let filter = SessionFilter {
        course_id: Some(course_id.to_string()),
        from: None,
        to: None,
    };
    let sessions = stats::load_sessions(conn, &filter).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.message,
        details: e.details,
    })?;
    Ok(sessions
        .into_iter()
        .find(|s| s.date.format("%Y-%m-%d").to_string() == date))
}

fn attendance_session_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date(&date_raw)?.format("%Y-%m-%d").to_string();

    let Some(session) = find_session(conn, &course_id, &date)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "no session for course and date".to_string(),
            details: None,
        });
    };
    let breakdown = stats::compute_session_stats(&session);
    let marks_json: Vec<serde_json::Value> = session
        .marks
        .iter()
        .map(|m| {
            json!({
                "identityRef": m.identity_ref,
                "status": m.status,
                "remarks": m.remarks,
            })
        })
        .collect();
    Ok(json!({
        "sessionId": session.id,
        "courseId": session.course_id,
        "date": date,
        "topic": session.topic,
        "stats": breakdown,
        "marks": marks_json,
    }))
}

fn attendance_list_sessions(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut filter = SessionFilter::default();
    if let Some(course_id) = params.get("courseId").and_then(|v| v.as_str()) {
        filter.course_id = Some(course_id.to_string());
    }
    if let Some(from) = params.get("from").and_then(|v| v.as_str()) {
        filter.from = Some(parse_date(from)?);
    }
    if let Some(to) = params.get("to").and_then(|v| v.as_str()) {
        filter.to = Some(parse_date(to)?);
    }
    let sessions = stats::load_sessions(conn, &filter).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.message,
        details: e.details,
    })?;

    let sessions_json: Vec<serde_json::Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "courseId": s.course_id,
                "date": s.date.format("%Y-%m-%d").to_string(),
                "topic": s.topic,
                "facultyId": s.faculty_id,
                "markCount": s.marks.len(),
            })
        })
        .collect();
    Ok(json!({ "sessions": sessions_json }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.capture" => Some(with_conn(state, req, attendance_capture)),
        "attendance.sessionStats" => Some(with_conn(state, req, attendance_session_stats)),
        "attendance.listSessions" => Some(with_conn(state, req, attendance_list_sessions)),
        _ => None,
    }
}
