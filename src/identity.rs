//! Identity resolution across the three student record stores.
//!
//! A logical student can be represented by an account, an enrolled profile,
//! or a spreadsheet-imported student, and attendance marks reference
//! whichever representation existed when they were captured (almost always
//! the imported one). `resolve` walks the stores in a fixed order and
//! re-targets account/enrolled hits onto an imported student by email or
//! name, so statistics land on the record the marks were written against.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledRecord {
    pub id: String,
    pub account_id: String,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub attendance_goal: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedRecord {
    pub id: String,
    pub roll_number: String,
    pub name: String,
    pub email: Option<String>,
    pub discipline: String,
    pub program: String,
    pub semester: i64,
    pub courses: Vec<String>,
}

/// The closed union of the three record shapes that can represent one
/// student. Exactly one variant is the canonical target of any given mark.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum PersonIdentity {
    Imported(ImportedRecord),
    Account(AccountRecord),
    Enrolled(EnrolledRecord),
}

impl PersonIdentity {
    pub fn id(&self) -> &str {
        match self {
            PersonIdentity::Imported(r) => &r.id,
            PersonIdentity::Account(r) => &r.id,
            PersonIdentity::Enrolled(r) => &r.id,
        }
    }

    pub fn variant(&self) -> &'static str {
        match self {
            PersonIdentity::Imported(_) => "imported",
            PersonIdentity::Account(_) => "account",
            PersonIdentity::Enrolled(_) => "enrolled",
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            PersonIdentity::Imported(r) => Some(&r.name),
            PersonIdentity::Account(r) => Some(&r.name),
            PersonIdentity::Enrolled(_) => None,
        }
    }

    pub fn roll_number(&self) -> Option<&str> {
        match self {
            PersonIdentity::Imported(r) => Some(&r.roll_number),
            PersonIdentity::Account(_) => None,
            PersonIdentity::Enrolled(r) => r.roll_number.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub identity: Option<PersonIdentity>,
    pub found_via: &'static str,
    pub is_account_identity: bool,
}

impl Resolution {
    fn hit(identity: PersonIdentity, found_via: &'static str) -> Self {
        let is_account_identity = matches!(identity, PersonIdentity::Account(_));
        Self {
            identity: Some(identity),
            found_via,
            is_account_identity,
        }
    }

    fn miss() -> Self {
        Self {
            identity: None,
            found_via: "none",
            is_account_identity: false,
        }
    }
}

/// Which lookup produced the enrolled profile, for the `foundVia` tag.
#[derive(Debug, Clone, Copy)]
enum EnrolledPath {
    ById,
    ByAccount,
}

/// Resolve an opaque identifier to a person record. First hit wins; later
/// stores are not consulted. Returns a miss rather than an error when no
/// store knows the id.
pub fn resolve(conn: &Connection, id: &str) -> Result<Resolution, StoreError> {
    if let Some(imported) = find_imported_by_id(conn, id)? {
        debug!(id, found_via = "imported", "resolved identity");
        return Ok(Resolution::hit(PersonIdentity::Imported(imported), "imported"));
    }

    if let Some(account) = find_account_by_id(conn, id)? {
        if let Some(imported) = find_imported_by_email(conn, &account.email)? {
            debug!(id, found_via = "account-email", "resolved identity");
            return Ok(Resolution::hit(
                PersonIdentity::Imported(imported),
                "account-email",
            ));
        }
        if let Some(imported) = find_imported_by_name(conn, &account.name)? {
            debug!(id, found_via = "account-name", "resolved identity");
            return Ok(Resolution::hit(
                PersonIdentity::Imported(imported),
                "account-name",
            ));
        }
        // Marks key off imported students; an account with no linked import
        // has no attendance history, but it is still the best answer we have.
        debug!(id, found_via = "account-fallback", "resolved identity");
        return Ok(Resolution::hit(
            PersonIdentity::Account(account),
            "account-fallback",
        ));
    }

    if let Some(enrolled) = find_enrolled_by_id(conn, id)? {
        return retarget_enrolled(conn, enrolled, EnrolledPath::ById);
    }

    // The caller may have passed an account id for a student who has an
    // enrolled profile but never appeared in an import.
    if let Some(enrolled) = find_enrolled_by_account(conn, id)? {
        return retarget_enrolled(conn, enrolled, EnrolledPath::ByAccount);
    }

    debug!(id, "identity not found in any store");
    Ok(Resolution::miss())
}

fn retarget_enrolled(
    conn: &Connection,
    enrolled: EnrolledRecord,
    path: EnrolledPath,
) -> Result<Resolution, StoreError> {
    let account = find_account_by_id(conn, &enrolled.account_id)?;
    if let Some(account) = &account {
        if let Some(imported) = find_imported_by_email(conn, &account.email)? {
            let tag = match path {
                EnrolledPath::ById => "enrolled-email",
                EnrolledPath::ByAccount => "enrolled-by-account-email",
            };
            debug!(enrolled_id = %enrolled.id, found_via = tag, "resolved identity");
            return Ok(Resolution::hit(PersonIdentity::Imported(imported), tag));
        }
        if let Some(imported) = find_imported_by_name(conn, &account.name)? {
            let tag = match path {
                EnrolledPath::ById => "enrolled-name",
                EnrolledPath::ByAccount => "enrolled-by-account-name",
            };
            debug!(enrolled_id = %enrolled.id, found_via = tag, "resolved identity");
            return Ok(Resolution::hit(PersonIdentity::Imported(imported), tag));
        }
    }
    let tag = match path {
        EnrolledPath::ById => "enrolled-fallback",
        EnrolledPath::ByAccount => "enrolled-by-account-fallback",
    };
    debug!(enrolled_id = %enrolled.id, found_via = tag, "resolved identity");
    Ok(Resolution::hit(PersonIdentity::Enrolled(enrolled), tag))
}

// ── Store lookups ────────────────────────────────────────────────────────

pub fn find_imported_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<ImportedRecord>, StoreError> {
    query_imported(conn, "WHERE id = ?", id)
}

pub fn find_imported_by_roll_number(
    conn: &Connection,
    roll_number: &str,
) -> Result<Option<ImportedRecord>, StoreError> {
    query_imported(conn, "WHERE roll_number = ?", roll_number)
}

fn find_imported_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<ImportedRecord>, StoreError> {
    if email.trim().is_empty() {
        return Ok(None);
    }
    // Deterministic pick when several imports share an email.
    query_imported(conn, "WHERE email = ? ORDER BY roll_number LIMIT 1", email)
}

pub fn find_imported_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Option<ImportedRecord>, StoreError> {
    if name.trim().is_empty() {
        return Ok(None);
    }
    query_imported(conn, "WHERE name = ? ORDER BY roll_number LIMIT 1", name)
}

fn query_imported(
    conn: &Connection,
    clause: &str,
    param: &str,
) -> Result<Option<ImportedRecord>, StoreError> {
    let sql = format!(
        "SELECT id, roll_number, name, email, discipline, program, semester
         FROM imported_students {}",
        clause
    );
    let row = conn
        .query_row(&sql, [param], |r| {
            Ok(ImportedRecord {
                id: r.get(0)?,
                roll_number: r.get(1)?,
                name: r.get(2)?,
                email: r.get(3)?,
                discipline: r.get(4)?,
                program: r.get(5)?,
                semester: r.get(6)?,
                courses: Vec::new(),
            })
        })
        .optional()
        .map_err(StoreError::query)?;
    let Some(mut record) = row else {
        return Ok(None);
    };
    record.courses = load_course_refs(conn, &record.id)?;
    Ok(Some(record))
}

pub fn load_course_refs(conn: &Connection, student_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT course_id FROM imported_student_courses
             WHERE student_id = ? ORDER BY course_id",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

pub fn find_account_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<AccountRecord>, StoreError> {
    conn.query_row(
        "SELECT id, name, email, role FROM accounts WHERE id = ?",
        [id],
        |r| {
            Ok(AccountRecord {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                role: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::query)
}

fn find_enrolled_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<EnrolledRecord>, StoreError> {
    query_enrolled(conn, "WHERE id = ?", id)
}

fn find_enrolled_by_account(
    conn: &Connection,
    account_id: &str,
) -> Result<Option<EnrolledRecord>, StoreError> {
    query_enrolled(conn, "WHERE account_id = ?", account_id)
}

fn query_enrolled(
    conn: &Connection,
    clause: &str,
    param: &str,
) -> Result<Option<EnrolledRecord>, StoreError> {
    let sql = format!(
        "SELECT id, account_id, roll_number, department, attendance_goal
         FROM enrolled_profiles {}",
        clause
    );
    conn.query_row(&sql, [param], |r| {
        Ok(EnrolledRecord {
            id: r.get(0)?,
            account_id: r.get(1)?,
            roll_number: r.get(2)?,
            department: r.get(3)?,
            attendance_goal: r.get(4)?,
        })
    })
    .optional()
    .map_err(StoreError::query)
}
