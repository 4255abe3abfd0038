//! Two-phase spreadsheet roster import: preview parses and matches without
//! writing; apply runs the reconciler per row. Both are per-item, so half a
//! sheet of malformed roll numbers never blocks the other half.

use crate::identity;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, ImportedUpsert, UpsertOutcome};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
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

#[derive(Debug, Clone)]
struct RosterRow {
    line_no: usize,
    roll_number: Option<String>,
    name: String,
    email: Option<String>,
    discipline: Option<String>,
    program: Option<String>,
    semester: Option<i64>,
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == ',' {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    fields.push(field);
    fields
}

fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Header-driven column detection with positional fallbacks, so both
/// exported templates and hand-made sheets parse.
fn parse_roster_rows(text: &str) -> (Vec<RosterRow>, Vec<Value>, usize) {
    let mut warnings = Vec::new();
    let mut rows = Vec::new();
    let lines = text.lines().collect::<Vec<_>>();
    if lines.is_empty() {
        return (rows, warnings, 0);
    }

    let header_fields = parse_csv_record(lines[0])
        .into_iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();
    let mut idx = HashMap::<String, usize>::new();
    for (i, f) in header_fields.iter().enumerate() {
        idx.insert(f.clone(), i);
    }

    let roll_col = idx
        .get("roll_number")
        .or_else(|| idx.get("roll"))
        .or_else(|| idx.get("rollno"))
        .copied()
        .unwrap_or(0);
    let name_col = idx
        .get("name")
        .or_else(|| idx.get("student_name"))
        .copied()
        .unwrap_or(1);
    let email_col = idx.get("email").copied().unwrap_or(2);
    let discipline_col = idx
        .get("discipline")
        .or_else(|| idx.get("branch"))
        .copied()
        .unwrap_or(3);
    let program_col = idx.get("program").copied().unwrap_or(4);
    let semester_col = idx.get("semester").copied().unwrap_or(5);

    let mut total = 0usize;
    for (line_no, raw_line) in lines.iter().enumerate().skip(1) {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        total += 1;
        let fields = parse_csv_record(line);

        let name = fields
            .get(name_col)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "missing_name",
                "message": "name is required"
            }));
            continue;
        }
        let semester = match fields.get(semester_col).and_then(|s| non_empty_trimmed(s)) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warnings.push(json!({
                        "line": line_no + 1,
                        "code": "bad_semester",
                        "message": "semester must be numeric"
                    }));
                    None
                }
            },
            None => None,
        };

        rows.push(RosterRow {
            line_no: line_no + 1,
            roll_number: fields.get(roll_col).and_then(|s| non_empty_trimmed(s)),
            name,
            email: fields.get(email_col).and_then(|s| non_empty_trimmed(s)),
            discipline: fields.get(discipline_col).and_then(|s| non_empty_trimmed(s)),
            program: fields.get(program_col).and_then(|s| non_empty_trimmed(s)),
            semester,
        });
    }

    (rows, warnings, total)
}

fn import_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let text = get_required_str(params, "text")?;
    let (rows, warnings, total) = parse_roster_rows(&text);

    let mut preview = Vec::new();
    for row in &rows {
        let action = match &row.roll_number {
            Some(roll) => match identity::find_imported_by_roll_number(conn, roll) {
                Ok(Some(existing)) => json!({
                    "line": row.line_no,
                    "rollNumber": roll,
                    "name": row.name,
                    "action": "update",
                    "matchedStudentId": existing.id,
                }),
                Ok(None) => json!({
                    "line": row.line_no,
                    "rollNumber": roll,
                    "name": row.name,
                    "action": "create",
                }),
                Err(e) => {
                    return Err(HandlerErr {
                        code: "db_query_failed",
                        message: e.message,
                        details: e.details,
                    })
                }
            },
            None => json!({
                "line": row.line_no,
                "rollNumber": Value::Null,
                "name": row.name,
                "action": "create",
            }),
        };
        preview.push(action);
    }

    Ok(json!({
        "rows": preview,
        "warnings": warnings,
        "totalLines": total,
        "parsed": rows.len(),
    }))
}

fn import_apply(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let text = get_required_str(params, "text")?;

    let exists = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    }

    let (rows, mut warnings, total) = parse_roster_rows(&text);

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut unchanged = 0usize;
    let mut skipped = 0usize;
    for row in &rows {
        let input = ImportedUpsert {
            roll_number: row.roll_number.clone(),
            name: Some(row.name.clone()),
            email: row.email.clone(),
            discipline: row.discipline.clone(),
            program: row.program.clone(),
            semester: row.semester,
            course_id: Some(course_id.clone()),
        };
        match reconcile::upsert_imported(conn, &input) {
            Ok((_, UpsertOutcome::Created)) => created += 1,
            Ok((_, UpsertOutcome::Updated)) => updated += 1,
            Ok((_, UpsertOutcome::Unchanged)) => unchanged += 1,
            Err(e) => {
                warn!(line = row.line_no, code = %e.code, "skipping roster row");
                skipped += 1;
                warnings.push(json!({
                    "line": row.line_no,
                    "code": e.code,
                    "message": e.message,
                }));
            }
        }
    }

    Ok(json!({
        "created": created,
        "updated": updated,
        "unchanged": unchanged,
        "skipped": skipped,
        "totalLines": total,
        "warnings": warnings,
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "import.preview" => Some(with_conn(state, req, import_preview)),
        "import.apply" => Some(with_conn(state, req, import_apply)),
        _ => None,
    }
}
