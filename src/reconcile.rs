//! Monotonic reconciliation of imported student records.
//!
//! Imports and attendance captures both feed partial data about the same
//! student. The upgrade rules only ever move a field from placeholder to
//! real, never back, so re-running an import or retrying a half-applied
//! batch converges on the same stored state.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::identity::{self, ImportedRecord, PersonIdentity};

// Exact literal sets observed in production data; preserved, not
// generalized. Flag to product owners before changing.
pub const PLACEHOLDER_NAMES: &[&str] = &["Unknown", "Student"];
pub const DEFAULT_DISCIPLINE: &str = "Not Specified";
pub const DEFAULT_PROGRAM: &str = "B.tech";
pub const DEFAULT_SEMESTER: i64 = 4;
pub const AUTO_ROLL_PREFIX: &str = "AUTO-";

pub fn is_placeholder_name(name: &str) -> bool {
    PLACEHOLDER_NAMES.iter().any(|p| *p == name.trim())
}

pub fn is_auto_roll_number(roll: &str) -> bool {
    roll.starts_with(AUTO_ROLL_PREFIX)
}

pub fn auto_roll_number() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("{}{}-{}", AUTO_ROLL_PREFIX, secs, suffix)
}

// ── Per-field upgrade rules ──────────────────────────────────────────────
//
// Each returns Some(new value) only when the stored field should change.
// The rules are independent; upsert_imported composes them.

pub fn upgrade_name(current: &str, incoming: Option<&str>) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|s| !s.is_empty())?;
    if is_placeholder_name(current) && !is_placeholder_name(incoming) {
        return Some(incoming.to_string());
    }
    None
}

pub fn upgrade_defaulted(current: &str, incoming: Option<&str>, default: &str) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|s| !s.is_empty())?;
    if current == default && incoming != default {
        return Some(incoming.to_string());
    }
    None
}

pub fn upgrade_semester(current: i64, incoming: Option<i64>) -> Option<i64> {
    let incoming = incoming?;
    if current == DEFAULT_SEMESTER && incoming != DEFAULT_SEMESTER {
        return Some(incoming);
    }
    None
}

pub fn upgrade_roll_number(current: &str, incoming: Option<&str>) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|s| !s.is_empty())?;
    if is_auto_roll_number(current) && !is_auto_roll_number(incoming) {
        return Some(incoming.to_string());
    }
    None
}

pub fn upgrade_email(current: Option<&str>, incoming: Option<&str>) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|s| !s.is_empty())?;
    match current {
        Some(c) if !c.trim().is_empty() => None,
        _ => Some(incoming.to_string()),
    }
}

// ── Upsert ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedUpsert {
    pub roll_number: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub discipline: Option<String>,
    pub program: Option<String>,
    pub semester: Option<i64>,
    pub course_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Create or monotonically upgrade an imported student, keyed by roll
/// number. Writes only when at least one field actually changes, so a
/// repeated call with identical input is a no-op.
pub fn upsert_imported(
    conn: &Connection,
    input: &ImportedUpsert,
) -> Result<(ImportedRecord, UpsertOutcome), StoreError> {
    let supplied_roll = input
        .roll_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let existing = match supplied_roll {
        Some(roll) => identity::find_imported_by_roll_number(conn, roll)?,
        None => None,
    };

    let Some(current) = existing else {
        return create_imported(conn, input, supplied_roll);
    };

    let mut name = current.name.clone();
    let mut email = current.email.clone();
    let mut discipline = current.discipline.clone();
    let mut program = current.program.clone();
    let mut semester = current.semester;
    let mut roll_number = current.roll_number.clone();
    let mut changed = false;

    if let Some(v) = upgrade_name(&name, input.name.as_deref()) {
        name = v;
        changed = true;
    }
    if let Some(v) = upgrade_email(email.as_deref(), input.email.as_deref()) {
        email = Some(v);
        changed = true;
    }
    if let Some(v) = upgrade_defaulted(&discipline, input.discipline.as_deref(), DEFAULT_DISCIPLINE)
    {
        discipline = v;
        changed = true;
    }
    if let Some(v) = upgrade_defaulted(&program, input.program.as_deref(), DEFAULT_PROGRAM) {
        program = v;
        changed = true;
    }
    if let Some(v) = upgrade_semester(semester, input.semester) {
        semester = v;
        changed = true;
    }
    if let Some(v) = upgrade_roll_number(&roll_number, supplied_roll) {
        roll_number = v;
        changed = true;
    }

    if changed {
        conn.execute(
            "UPDATE imported_students
             SET roll_number = ?, name = ?, email = ?, discipline = ?, program = ?,
                 semester = ?, updated_at = ?
             WHERE id = ?",
            (
                &roll_number,
                &name,
                &email,
                &discipline,
                &program,
                semester,
                now_stamp(),
                &current.id,
            ),
        )
        .map_err(StoreError::update)?;
        debug!(student_id = %current.id, roll_number, "upgraded imported student");
    }

    let course_added = associate_course(conn, &current.id, input.course_id.as_deref())?;

    let record = ImportedRecord {
        id: current.id.clone(),
        roll_number,
        name,
        email,
        discipline,
        program,
        semester,
        courses: identity::load_course_refs(conn, &current.id)?,
    };
    let outcome = if changed || course_added {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Unchanged
    };
    Ok((record, outcome))
}

fn create_imported(
    conn: &Connection,
    input: &ImportedUpsert,
    supplied_roll: Option<&str>,
) -> Result<(ImportedRecord, UpsertOutcome), StoreError> {
    let id = Uuid::new_v4().to_string();
    let roll_number = match supplied_roll {
        Some(roll) => roll.to_string(),
        None => auto_roll_number(),
    };
    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string();
    let email = input
        .email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let discipline = input
        .discipline
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DISCIPLINE)
        .to_string();
    let program = input
        .program
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROGRAM)
        .to_string();
    let semester = input.semester.unwrap_or(DEFAULT_SEMESTER);
    let stamp = now_stamp();

    conn.execute(
        "INSERT INTO imported_students(id, roll_number, name, email, discipline, program,
                                       semester, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &roll_number, &name, &email, &discipline, &program, semester, &stamp, &stamp,
        ),
    )
    .map_err(StoreError::update)?;
    debug!(student_id = %id, roll_number, "created imported student");

    associate_course(conn, &id, input.course_id.as_deref())?;

    let record = ImportedRecord {
        id: id.clone(),
        roll_number,
        name,
        email,
        discipline,
        program,
        semester,
        courses: identity::load_course_refs(conn, &id)?,
    };
    Ok((record, UpsertOutcome::Created))
}

fn associate_course(
    conn: &Connection,
    student_id: &str,
    course_id: Option<&str>,
) -> Result<bool, StoreError> {
    let Some(course_id) = course_id.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(false);
    };
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO imported_student_courses(student_id, course_id) VALUES(?, ?)",
            (student_id, course_id),
        )
        .map_err(StoreError::update)?;
    Ok(inserted > 0)
}

// ── Batch reconciliation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSubmission {
    #[serde(default)]
    pub identity_ref: Option<String>,
    #[serde(default)]
    pub roll_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// A mark ready to be written against a session, pinned to the store its
/// identity actually lives in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRecord {
    pub identity_ref: String,
    pub identity_variant: &'static str,
    pub status: String,
    pub remarks: Option<String>,
}

/// Denormalized display fields so the caller need not re-query per mark.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMarkView {
    pub identity_ref: String,
    pub name: Option<String>,
    pub roll_number: Option<String>,
    pub discipline: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemWarning {
    pub index: usize,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub records: Vec<MarkRecord>,
    pub responses: Vec<EnrichedMarkView>,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub warnings: Vec<BatchItemWarning>,
}

/// Run one reconciliation per submitted mark. A failing item is skipped and
/// counted, never fatal for the batch; partial success is the expected
/// common case.
pub fn reconcile_batch(
    conn: &Connection,
    marks: &[MarkSubmission],
    course_id: &str,
) -> Result<BatchOutcome, StoreError> {
    let mut outcome = BatchOutcome::default();

    for (index, mark) in marks.iter().enumerate() {
        match reconcile_one(conn, mark, course_id) {
            Ok(Some((record, view))) => {
                outcome.processed += 1;
                outcome.records.push(record);
                outcome.responses.push(view);
            }
            Ok(None) => {
                outcome.errors += 1;
                outcome.warnings.push(BatchItemWarning {
                    index,
                    code: "invalid_reference".to_string(),
                    message: "mark has no usable identity reference".to_string(),
                });
            }
            Err(e) => {
                warn!(index, code = %e.code, message = %e.message, "skipping mark in batch");
                outcome.skipped += 1;
                outcome.warnings.push(BatchItemWarning {
                    index,
                    code: e.code,
                    message: e.message,
                });
            }
        }
    }

    Ok(outcome)
}

fn reconcile_one(
    conn: &Connection,
    mark: &MarkSubmission,
    course_id: &str,
) -> Result<Option<(MarkRecord, EnrichedMarkView)>, StoreError> {
    // Malformed (present but blank) references invalidate the entry itself
    // rather than falling through to roll-number creation.
    if let Some(identity_ref) = mark.identity_ref.as_deref() {
        if identity_ref.trim().is_empty() {
            return Ok(None);
        }
        let resolution = identity::resolve(conn, identity_ref.trim())?;
        if let Some(identity) = resolution.identity {
            // Keep the imported record's fields fresh while we are here.
            if let PersonIdentity::Imported(ref rec) = identity {
                let upsert = ImportedUpsert {
                    roll_number: Some(rec.roll_number.clone()),
                    name: mark.name.clone(),
                    email: None,
                    discipline: None,
                    program: None,
                    semester: None,
                    course_id: Some(course_id.to_string()),
                };
                let _ = upsert_imported(conn, &upsert)?;
            }
            return Ok(Some(build_mark(&identity, mark)));
        }
        // Fall back to the roll number when the stale ref resolves nowhere.
    }

    let has_roll = mark
        .roll_number
        .as_deref()
        .map(str::trim)
        .is_some_and(|s| !s.is_empty());
    let has_name = mark
        .name
        .as_deref()
        .map(str::trim)
        .is_some_and(|s| !s.is_empty());
    if !has_roll && !has_name {
        return Ok(None);
    }

    // A name-only mark matches an existing import by exact name before a
    // placeholder is minted, so re-capturing the same register does not
    // create duplicates.
    if !has_roll {
        let name = mark.name.as_deref().unwrap_or("").trim();
        if let Some(existing) = identity::find_imported_by_name(conn, name)? {
            let upsert = ImportedUpsert {
                roll_number: Some(existing.roll_number.clone()),
                name: None,
                email: None,
                discipline: None,
                program: None,
                semester: None,
                course_id: Some(course_id.to_string()),
            };
            let (record, _) = upsert_imported(conn, &upsert)?;
            return Ok(Some(build_mark(&PersonIdentity::Imported(record), mark)));
        }
    }

    let upsert = ImportedUpsert {
        roll_number: mark.roll_number.clone(),
        name: mark.name.clone(),
        email: None,
        discipline: None,
        program: None,
        semester: None,
        course_id: Some(course_id.to_string()),
    };
    let (record, _) = upsert_imported(conn, &upsert)?;
    Ok(Some(build_mark(&PersonIdentity::Imported(record), mark)))
}

fn build_mark(identity: &PersonIdentity, mark: &MarkSubmission) -> (MarkRecord, EnrichedMarkView) {
    let status = mark.status.trim().to_string();
    let record = MarkRecord {
        identity_ref: identity.id().to_string(),
        identity_variant: identity.variant(),
        status: status.clone(),
        remarks: mark.remarks.clone(),
    };
    let discipline = match identity {
        PersonIdentity::Imported(r) => Some(r.discipline.clone()),
        PersonIdentity::Enrolled(r) => r.department.clone(),
        PersonIdentity::Account(_) => None,
    };
    let view = EnrichedMarkView {
        identity_ref: identity.id().to_string(),
        name: identity.display_name().map(str::to_string),
        roll_number: identity.roll_number().map(str::to_string),
        discipline,
        status,
    };
    (record, view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::init_schema(&conn).expect("init schema");
        conn
    }

    fn insert_course(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO courses(id, name, code) VALUES(?, 'Data Structures', 'CS201')",
            [id],
        )
        .unwrap();
    }

    fn upsert(conn: &Connection, input: ImportedUpsert) -> (ImportedRecord, UpsertOutcome) {
        upsert_imported(conn, &input).expect("upsert")
    }

    #[test]
    fn fresh_import_creates_with_given_fields() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let (rec, outcome) = upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Asha Rao".into()),
                discipline: Some("CSE".into()),
                course_id: Some("c-1".into()),
                ..Default::default()
            },
        );
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(rec.roll_number, "21CS001");
        assert_eq!(rec.name, "Asha Rao");
        assert_eq!(rec.discipline, "CSE");
        assert_eq!(rec.program, DEFAULT_PROGRAM);
        assert_eq!(rec.semester, DEFAULT_SEMESTER);
        assert_eq!(rec.courses, vec!["c-1".to_string()]);
    }

    #[test]
    fn real_name_is_never_overwritten() {
        let conn = test_conn();
        upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Asha Rao".into()),
                ..Default::default()
            },
        );
        let (rec, _) = upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Asha R.".into()),
                ..Default::default()
            },
        );
        assert_eq!(rec.name, "Asha Rao");
    }

    #[test]
    fn placeholder_name_upgrades_to_real_name() {
        let conn = test_conn();
        upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Unknown".into()),
                ..Default::default()
            },
        );
        let (rec, outcome) = upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Asha Rao".into()),
                ..Default::default()
            },
        );
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(rec.name, "Asha Rao");
    }

    #[test]
    fn placeholder_never_replaces_real_value() {
        let conn = test_conn();
        upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Asha Rao".into()),
                discipline: Some("CSE".into()),
                semester: Some(6),
                ..Default::default()
            },
        );
        let (rec, outcome) = upsert(
            &conn,
            ImportedUpsert {
                roll_number: Some("21CS001".into()),
                name: Some("Student".into()),
                discipline: Some(DEFAULT_DISCIPLINE.into()),
                semester: Some(DEFAULT_SEMESTER),
                ..Default::default()
            },
        );
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(rec.name, "Asha Rao");
        assert_eq!(rec.discipline, "CSE");
        assert_eq!(rec.semester, 6);
    }

    #[test]
    fn upsert_twice_with_identical_input_is_a_no_op() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let input = ImportedUpsert {
            roll_number: Some("21CS001".into()),
            name: Some("Asha Rao".into()),
            discipline: Some("CSE".into()),
            program: Some("M.tech".into()),
            semester: Some(6),
            course_id: Some("c-1".into()),
            ..Default::default()
        };
        let (first, _) = upsert(&conn, input.clone());
        let (second, outcome) = upsert(&conn, input);
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, second.name);
        assert_eq!(first.courses, second.courses);
    }

    #[test]
    fn auto_roll_number_promotes_to_real_one() {
        let conn = test_conn();
        let auto = auto_roll_number();
        assert!(is_auto_roll_number(&auto));
        conn.execute(
            "INSERT INTO imported_students(id, roll_number, name) VALUES('i-1', ?, 'Unknown')",
            [&auto],
        )
        .unwrap();
        let promoted = upgrade_roll_number(&auto, Some("21CS007"));
        assert_eq!(promoted.as_deref(), Some("21CS007"));
        // And a real roll number is never demoted back.
        assert_eq!(upgrade_roll_number("21CS007", Some(&auto)), None);
    }

    #[test]
    fn course_association_has_set_semantics() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let input = ImportedUpsert {
            roll_number: Some("21CS001".into()),
            name: Some("Asha Rao".into()),
            course_id: Some("c-1".into()),
            ..Default::default()
        };
        upsert(&conn, input.clone());
        let (rec, outcome) = upsert(&conn, input);
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(rec.courses, vec!["c-1".to_string()]);
    }

    #[test]
    fn unknown_mark_auto_creates_placeholder_identity() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let marks = vec![MarkSubmission {
            identity_ref: None,
            roll_number: Some("21CS099".into()),
            name: None,
            status: "present".into(),
            remarks: None,
        }];
        let outcome = reconcile_batch(&conn, &marks, "c-1").unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.errors, 0);
        let view = &outcome.responses[0];
        assert_eq!(view.name.as_deref(), Some("Unknown"));
        assert_eq!(view.roll_number.as_deref(), Some("21CS099"));
        assert_eq!(outcome.records[0].identity_variant, "imported");
    }

    #[test]
    fn mark_without_roll_number_gets_auto_placeholder() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let marks = vec![MarkSubmission {
            identity_ref: None,
            roll_number: None,
            name: Some("Walk-in Student".into()),
            status: "late".into(),
            remarks: None,
        }];
        let outcome = reconcile_batch(&conn, &marks, "c-1").unwrap();
        assert_eq!(outcome.processed, 1);
        let roll = outcome.responses[0].roll_number.clone().unwrap();
        assert!(is_auto_roll_number(&roll));
    }

    #[test]
    fn name_only_marks_reuse_the_same_identity_across_captures() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let marks = vec![MarkSubmission {
            identity_ref: None,
            roll_number: None,
            name: Some("Walk-in Student".into()),
            status: "present".into(),
            remarks: None,
        }];
        let first = reconcile_batch(&conn, &marks, "c-1").unwrap();
        let second = reconcile_batch(&conn, &marks, "c-1").unwrap();
        assert_eq!(
            first.records[0].identity_ref,
            second.records[0].identity_ref
        );
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM imported_students", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn bad_entry_is_rejected_without_aborting_the_batch() {
        let conn = test_conn();
        insert_course(&conn, "c-1");
        let marks = vec![
            MarkSubmission {
                identity_ref: Some("   ".into()),
                roll_number: None,
                name: None,
                status: "present".into(),
                remarks: None,
            },
            MarkSubmission {
                identity_ref: None,
                roll_number: Some("21CS001".into()),
                name: Some("Asha Rao".into()),
                status: "present".into(),
                remarks: None,
            },
        ];
        let outcome = reconcile_batch(&conn, &marks, "c-1").unwrap();
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].code, "invalid_reference");
        assert_eq!(outcome.warnings[0].index, 0);
    }
}
