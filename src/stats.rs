//! Attendance counting and percentage math.
//!
//! Every statistic in the product (course view, student view, dashboard,
//! export) goes through `compute_stats` / `compute_session_stats`, so the
//! counting rules live here once: status comparison is case-insensitive,
//! "present" is the only affirmative value, and an empty input yields rate
//! zero rather than a division error.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStatus {
    Present,
    Absent,
    Late,
}

impl MarkStatus {
    /// Unrecognized values count as absent; only `present` affirms.
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if t.eq_ignore_ascii_case("present") {
            MarkStatus::Present
        } else if t.eq_ignore_ascii_case("late") {
            MarkStatus::Late
        } else {
            MarkStatus::Absent
        }
    }

    pub fn is_present(self) -> bool {
        self == MarkStatus::Present
    }
}

#[derive(Debug, Clone)]
pub struct MarkRow {
    pub identity_ref: String,
    pub status: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub course_id: String,
    pub date: NaiveDate,
    pub topic: Option<String>,
    pub faculty_id: Option<String>,
    pub marks: Vec<MarkRow>,
}

#[derive(Debug, Clone)]
pub struct CourseMeta {
    pub name: String,
    pub code: String,
    pub faculty_name: Option<String>,
}

/// Derived per-course tally; produced fresh on every aggregation call,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatSnapshot {
    pub course_id: String,
    pub name: String,
    pub present: i64,
    pub absent: i64,
    pub total: i64,
    pub faculty_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub per_course: Vec<CourseStatSnapshot>,
    pub total_present: i64,
    pub total_classes: i64,
    pub overall_rate: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub total: i64,
    pub rate: i64,
}

pub fn rate(present: i64, total: i64) -> i64 {
    if total == 0 {
        return 0;
    }
    ((present as f64) / (total as f64) * 100.0).round() as i64
}

/// Per-student aggregation over many sessions. Sessions where the student
/// has no mark are skipped entirely; they do not count toward the total.
pub fn compute_stats(
    sessions: &[SessionRow],
    student_id: &str,
    courses: &HashMap<String, CourseMeta>,
) -> StudentStats {
    let mut order: Vec<String> = Vec::new();
    let mut by_course: HashMap<String, CourseStatSnapshot> = HashMap::new();
    let mut total_present = 0i64;
    let mut total_classes = 0i64;

    for session in sessions {
        let Some(mark) = session.marks.iter().find(|m| m.identity_ref == student_id) else {
            continue;
        };
        let present = MarkStatus::parse(&mark.status).is_present();

        let snapshot = by_course
            .entry(session.course_id.clone())
            .or_insert_with(|| {
                order.push(session.course_id.clone());
                let meta = courses.get(&session.course_id);
                CourseStatSnapshot {
                    course_id: session.course_id.clone(),
                    name: meta.map(|m| m.name.clone()).unwrap_or_default(),
                    present: 0,
                    absent: 0,
                    total: 0,
                    faculty_name: meta.and_then(|m| m.faculty_name.clone()),
                }
            });
        snapshot.total += 1;
        if present {
            snapshot.present += 1;
            total_present += 1;
        } else {
            snapshot.absent += 1;
        }
        total_classes += 1;
    }

    let per_course = order
        .into_iter()
        .filter_map(|course_id| by_course.remove(&course_id))
        .collect();

    StudentStats {
        per_course,
        total_present,
        total_classes,
        overall_rate: rate(total_present, total_classes),
    }
}

/// Per-session counting with the three-way breakdown the capture screen
/// shows. `present + absent + late == total` always holds.
pub fn compute_session_stats(session: &SessionRow) -> SessionStats {
    let mut present = 0i64;
    let mut absent = 0i64;
    let mut late = 0i64;

    for mark in &session.marks {
        match MarkStatus::parse(&mark.status) {
            MarkStatus::Present => present += 1,
            MarkStatus::Absent => absent += 1,
            MarkStatus::Late => late += 1,
        }
    }

    let total = present + absent + late;
    SessionStats {
        present,
        absent,
        late,
        total,
        rate: rate(present, total),
    }
}

// ── Store loaders ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub course_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Load sessions (with their marks, in capture order) matching the filter,
/// ordered by date.
pub fn load_sessions(conn: &Connection, filter: &SessionFilter) -> Result<Vec<SessionRow>, StoreError> {
    let mut sql = String::from(
        "SELECT id, course_id, date, topic, faculty_id FROM attendance_sessions WHERE 1=1",
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(course_id) = &filter.course_id {
        sql.push_str(" AND course_id = ?");
        params.push(course_id.clone());
    }
    if let Some(from) = &filter.from {
        sql.push_str(" AND date >= ?");
        params.push(from.format("%Y-%m-%d").to_string());
    }
    if let Some(to) = &filter.to {
        sql.push_str(" AND date <= ?");
        params.push(to.format("%Y-%m-%d").to_string());
    }
    sql.push_str(" ORDER BY date, course_id");

    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    let mut sessions = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |r| {
            let date_text: String = r.get(2)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                date_text,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?
        .into_iter()
        .filter_map(|(id, course_id, date_text, topic, faculty_id)| {
            let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").ok()?;
            Some(SessionRow {
                id,
                course_id,
                date,
                topic,
                faculty_id,
                marks: Vec::new(),
            })
        })
        .collect::<Vec<_>>();

    for session in &mut sessions {
        session.marks = load_marks(conn, &session.id)?;
    }
    Ok(sessions)
}

pub fn load_marks(conn: &Connection, session_id: &str) -> Result<Vec<MarkRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT identity_ref, status, remarks
             FROM attendance_marks
             WHERE session_id = ?
             ORDER BY sort_order",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([session_id], |r| {
        Ok(MarkRow {
            identity_ref: r.get(0)?,
            status: r.get(1)?,
            remarks: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

pub fn load_course_meta(conn: &Connection) -> Result<HashMap<String, CourseMeta>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.code, f.name
             FROM courses c LEFT JOIN faculty f ON f.id = c.faculty_id",
        )
        .map_err(StoreError::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                CourseMeta {
                    name: r.get(1)?,
                    code: r.get(2)?,
                    faculty_name: r.get(3)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(identity_ref: &str, status: &str) -> MarkRow {
        MarkRow {
            identity_ref: identity_ref.to_string(),
            status: status.to_string(),
            remarks: None,
        }
    }

    fn session(course_id: &str, date: &str, marks: Vec<MarkRow>) -> SessionRow {
        SessionRow {
            id: format!("{}-{}", course_id, date),
            course_id: course_id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            topic: None,
            faculty_id: None,
            marks,
        }
    }

    fn course_meta(name: &str, code: &str) -> CourseMeta {
        CourseMeta {
            name: name.to_string(),
            code: code.to_string(),
            faculty_name: Some("Dr. Iyer".to_string()),
        }
    }

    #[test]
    fn seven_of_ten_present_rounds_to_seventy() {
        let mut sessions = Vec::new();
        for i in 0..7 {
            sessions.push(session("c-1", &format!("2025-01-{:02}", i + 1), vec![mark("s-1", "present")]));
        }
        sessions.push(session("c-1", "2025-01-08", vec![mark("s-1", "absent")]));
        sessions.push(session("c-1", "2025-01-09", vec![mark("s-1", "absent")]));
        sessions.push(session("c-1", "2025-01-10", vec![mark("s-1", "late")]));

        let courses = HashMap::from([("c-1".to_string(), course_meta("Algorithms", "CS301"))]);
        let stats = compute_stats(&sessions, "s-1", &courses);
        assert_eq!(stats.total_classes, 10);
        assert_eq!(stats.total_present, 7);
        assert_eq!(stats.overall_rate, 70);
        assert_eq!(stats.per_course.len(), 1);
        let snap = &stats.per_course[0];
        assert_eq!(snap.present + snap.absent, snap.total);
        assert_eq!(snap.name, "Algorithms");
        assert_eq!(snap.faculty_name.as_deref(), Some("Dr. Iyer"));
    }

    #[test]
    fn sessions_without_a_mark_for_the_student_are_skipped() {
        let sessions = vec![
            session("c-1", "2025-01-01", vec![mark("someone-else", "present")]),
            session("c-1", "2025-01-02", vec![]),
            session("c-2", "2025-01-03", vec![mark("other", "absent")]),
            session("c-2", "2025-01-04", vec![mark("other", "present")]),
            session("c-3", "2025-01-05", vec![mark("other", "late")]),
        ];
        let stats = compute_stats(&sessions, "s-1", &HashMap::new());
        assert_eq!(stats.total_classes, 0);
        assert_eq!(stats.overall_rate, 0);
        assert!(stats.per_course.is_empty());
    }

    #[test]
    fn status_comparison_is_case_insensitive() {
        let sessions = vec![
            session("c-1", "2025-01-01", vec![mark("s-1", "Present")]),
            session("c-1", "2025-01-02", vec![mark("s-1", "PRESENT")]),
            session("c-1", "2025-01-03", vec![mark("s-1", "absent")]),
        ];
        let stats = compute_stats(&sessions, "s-1", &HashMap::new());
        assert_eq!(stats.total_present, 2);
        assert_eq!(stats.overall_rate, 67);
    }

    #[test]
    fn unrecognized_status_counts_as_absent() {
        assert_eq!(MarkStatus::parse("excused"), MarkStatus::Absent);
        assert_eq!(MarkStatus::parse(""), MarkStatus::Absent);
        assert_eq!(MarkStatus::parse(" LATE "), MarkStatus::Late);
    }

    #[test]
    fn session_breakdown_sums_to_total() {
        let s = session(
            "c-1",
            "2025-01-01",
            vec![
                mark("a", "present"),
                mark("b", "present"),
                mark("c", "late"),
                mark("d", "absent"),
                mark("e", "sick"),
            ],
        );
        let stats = compute_session_stats(&s);
        assert_eq!(stats.present + stats.absent + stats.late, stats.total);
        assert_eq!(stats.present, 2);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.absent, 2);
        assert_eq!(stats.rate, 40);
    }

    #[test]
    fn empty_session_yields_zero_rate() {
        let s = session("c-1", "2025-01-01", vec![]);
        let stats = compute_session_stats(&s);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.rate, 0);
    }

    #[test]
    fn rate_stays_within_bounds() {
        assert_eq!(rate(0, 0), 0);
        assert_eq!(rate(0, 7), 0);
        assert_eq!(rate(7, 7), 100);
        assert_eq!(rate(1, 3), 33);
        assert_eq!(rate(2, 3), 67);
    }

    #[test]
    fn per_course_snapshots_split_by_course() {
        let sessions = vec![
            session("c-1", "2025-01-01", vec![mark("s-1", "present")]),
            session("c-2", "2025-01-02", vec![mark("s-1", "absent")]),
            session("c-1", "2025-01-03", vec![mark("s-1", "late")]),
        ];
        let courses = HashMap::from([
            ("c-1".to_string(), course_meta("Algorithms", "CS301")),
            ("c-2".to_string(), course_meta("Databases", "CS302")),
        ]);
        let stats = compute_stats(&sessions, "s-1", &courses);
        assert_eq!(stats.per_course.len(), 2);
        // First-seen order follows session date order.
        assert_eq!(stats.per_course[0].course_id, "c-1");
        assert_eq!(stats.per_course[0].total, 2);
        assert_eq!(stats.per_course[0].present, 1);
        // Late lands in the two-way absent bucket here.
        assert_eq!(stats.per_course[0].absent, 1);
        assert_eq!(stats.per_course[1].total, 1);
    }
}
