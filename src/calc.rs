//! Pure aggregation rules shared by the grade, attendance and finance
//! surfaces. Everything here is deterministic and side-effect free; handlers
//! load rows, call in, and serialize whatever comes back.

use serde::{Deserialize, Serialize};

/// One scored assessment for a (student, subject) pair.
///
/// `weight` is a fractional share of the overall grade (0.4 reads as 40%).
/// Values are stored exactly as entered: scores above `total`, zero totals
/// and out-of-range weights are all representable, and the aggregation is
/// defined over whatever is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeItem {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub total: f64,
    pub weight: f64,
}

/// Overall percentage for one item set.
///
/// Each item contributes its `score/total` ratio weighted by `weight`, and
/// the sum is normalized by the actual weight total so partially entered
/// weight sets still land on the 0-100 scale. When the weights sum to zero
/// (fresh sheets default every weight to 0) the ratios are averaged
/// unweighted instead. No clamping and no input checks: an over-max score
/// pushes the result past 100, and a zero `total` yields a non-finite value
/// that callers pass through untouched.
pub fn overall_grade(items: &[GradeItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }

    let total_weight: f64 = items.iter().map(|i| i.weight).sum();

    if total_weight == 0.0 {
        if items.is_empty() {
            return 0.0;
        }
        let ratio_sum: f64 = items.iter().map(|i| i.score / i.total).sum();
        return (ratio_sum / items.len() as f64) * 100.0;
    }

    let weighted: f64 = items.iter().map(|i| (i.score / i.total) * i.weight).sum();
    (weighted / total_weight) * 100.0
}

/// School-wide mean over per-(student, subject) overall grades.
///
/// Sheets that grade to zero count as not yet graded and are excluded. NaN
/// sheets fail the `> 0` test and drop out the same way. Returns 0 when
/// nothing qualifies.
pub fn school_average(overalls: &[f64]) -> f64 {
    let graded: Vec<f64> = overalls.iter().copied().filter(|g| *g > 0.0).collect();
    if graded.is_empty() {
        return 0.0;
    }
    graded.iter().sum::<f64>() / graded.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }

    /// Case-insensitive parse. Imported browser snapshots carry capitalized
    /// values, the database stores lowercase.
    pub fn parse(s: &str) -> Option<AttendanceStatus> {
        match s.to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }

    /// Capitalized form used in exported reports.
    pub fn display(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
        }
    }
}

/// Per-student attendance counts over some span of recorded days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceTally {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
    pub present_percent: f64,
}

/// Tally recorded statuses. Days without a record never reach this function,
/// so `total` and `present_percent` cover recorded days only.
pub fn attendance_tally<I>(statuses: I) -> AttendanceTally
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut tally = AttendanceTally::default();
    for status in statuses {
        match status {
            AttendanceStatus::Present => tally.present += 1,
            AttendanceStatus::Absent => tally.absent += 1,
            AttendanceStatus::Late => tally.late += 1,
        }
    }
    tally.total = tally.present + tally.absent + tally.late;
    tally.present_percent = if tally.total > 0 {
        (tally.present as f64 / tally.total as f64) * 100.0
    } else {
        0.0
    };
    tally
}

/// Billing position for one student.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentBalance {
    pub total_due: f64,
    pub paid: f64,
    pub balance: f64,
}

pub fn student_balance(total_due: f64, payments: &[f64]) -> StudentBalance {
    let paid: f64 = payments.iter().sum();
    StudentBalance {
        total_due,
        paid,
        balance: total_due - paid,
    }
}
