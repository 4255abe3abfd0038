//! Chart-shaped series derived from aggregator output. Pure functions, no
//! I/O; handlers load the rows and these shape the numbers.

use chrono::Datelike;
use serde::Serialize;
use std::collections::HashMap;

use crate::stats::{self, CourseStatSnapshot, MarkStatus, SessionRow};

pub const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub month: &'static str,
    pub present: i64,
    pub total: i64,
    pub attendance: i64,
}

/// Bucket a student's marks by calendar month name of the session date.
/// Months with no matched marks are omitted; buckets come out in calendar
/// order, and their totals sum to the student's `total_classes`.
pub fn monthly_trend(sessions: &[SessionRow], student_id: &str) -> Vec<TrendPoint> {
    let mut present = [0i64; 12];
    let mut total = [0i64; 12];

    for session in sessions {
        let Some(mark) = session.marks.iter().find(|m| m.identity_ref == student_id) else {
            continue;
        };
        let idx = session.date.month0() as usize;
        total[idx] += 1;
        if MarkStatus::parse(&mark.status).is_present() {
            present[idx] += 1;
        }
    }

    (0..12)
        .filter(|&i| total[i] > 0)
        .map(|i| TrendPoint {
            month: MONTH_NAMES[i],
            present: present[i],
            total: total[i],
            attendance: stats::rate(present[i], total[i]),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSlice {
    pub name: &'static str,
    pub value: i64,
}

pub fn distribution(total_present: i64, total_classes: i64) -> Vec<DistributionSlice> {
    vec![
        DistributionSlice {
            name: "Present",
            value: total_present,
        },
        DistributionSlice {
            name: "Absent",
            value: total_classes - total_present,
        },
    ]
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseComparisonPoint {
    pub id: String,
    pub name: String,
    pub code: String,
    pub attendance: i64,
}

/// Passthrough shaping of per-course snapshots for the comparison chart.
pub fn course_comparison(
    snapshots: &[CourseStatSnapshot],
    codes: &HashMap<String, String>,
) -> Vec<CourseComparisonPoint> {
    snapshots
        .iter()
        .map(|s| CourseComparisonPoint {
            id: s.course_id.clone(),
            name: s.name.clone(),
            code: codes.get(&s.course_id).cloned().unwrap_or_default(),
            attendance: stats::rate(s.present, s.total),
        })
        .collect()
}
