use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_TUITION: f64 = 1500.0;

const GRADE_SHEET_HEADERS: [&str; 7] = [
    "Student Name",
    "Section",
    "Overall Grade (%)",
    "Grade Item",
    "Score",
    "Total",
    "Weight (%)",
];

const ATTENDANCE_DAY_HEADERS: [&str; 3] = ["Student Name", "Section", "Status"];

const FINANCE_SUMMARY_HEADERS: [&str; 5] =
    ["Student Name", "Section", "Total Due", "Paid", "Balance"];

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

fn section_filter(req: &Request) -> Option<String> {
    req.params
        .get("section")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != "All")
        .map(|s| s.to_string())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn subject_name(
    conn: &Connection,
    req: &Request,
    subject_id: &str,
) -> Result<String, serde_json::Value> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    name.ok_or_else(|| err(&req.id, "not_found", "subject not found", None))
}

fn roster(
    conn: &Connection,
    req: &Request,
    subject_id: &str,
    section: Option<&str>,
) -> Result<Vec<(String, String, Option<String>)>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.section
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.subject_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let mut rows = stmt
        .query_map([subject_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if let Some(wanted) = section {
        rows.retain(|(_, _, s): &(String, String, Option<String>)| {
            s.as_deref() == Some(wanted)
        });
    }
    Ok(rows)
}

/// Cell values are plain text, already formatted the way the exported file
/// shows them. Quoting and separators stay with the renderer.
fn handle_reports_grade_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = section_filter(req);

    let subject = match subject_name(conn, req, &subject_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let students = match roster(conn, req, &subject_id, section.as_deref()) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut item_stmt = match conn.prepare(
        "SELECT id, name, score, total, weight
         FROM grade_items
         WHERE subject_id = ? AND student_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows: Vec<serde_json::Value> = Vec::new();
    for (student_id, name, student_section) in &students {
        let items = match item_stmt
            .query_map([&subject_id, student_id], |r| {
                Ok(calc::GradeItem {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    score: r.get(2)?,
                    total: r.get(3)?,
                    weight: r.get(4)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let overall = format!("{:.1}", calc::overall_grade(&items));
        let section_cell = student_section.clone().unwrap_or_default();
        if items.is_empty() {
            rows.push(json!([name, section_cell, overall, "No items", "", "", ""]));
        } else {
            for item in &items {
                rows.push(json!([
                    name,
                    section_cell,
                    overall,
                    item.name,
                    format!("{}", item.score),
                    format!("{}", item.total),
                    format!("{:.0}", item.weight * 100.0)
                ]));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "subjectName": subject,
            "headers": GRADE_SHEET_HEADERS,
            "rows": rows,
            "generatedAt": now_iso()
        }),
    )
}

fn handle_reports_attendance_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if chrono::NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").is_err() {
        return err(&req.id, "bad_params", "date must be YYYY-MM-DD", None);
    }
    let section = section_filter(req);

    let subject = match subject_name(conn, req, &subject_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let students = match roster(conn, req, &subject_id, section.as_deref()) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut status_stmt = match conn.prepare(
        "SELECT student_id, status
         FROM attendance_records
         WHERE subject_id = ? AND date = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let by_student: HashMap<String, String> = match status_stmt
        .query_map((&subject_id, date.trim()), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|(student_id, name, student_section)| {
            let status_cell = by_student
                .get(student_id)
                .and_then(|s| calc::AttendanceStatus::parse(s))
                .map(|s| s.display().to_string())
                .unwrap_or_else(|| "Not Recorded".to_string());
            json!([name, student_section.clone().unwrap_or_default(), status_cell])
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subjectName": subject,
            "date": date.trim(),
            "headers": ATTENDANCE_DAY_HEADERS,
            "rows": rows,
            "generatedAt": now_iso()
        }),
    )
}

fn handle_reports_finance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tuition = match db::settings_get_json(conn, "setup.billing") {
        Ok(section) => section
            .as_ref()
            .and_then(|v| v.get("tuitionPerStudent"))
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_TUITION),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare("SELECT id, name, section FROM students ORDER BY sort_order")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students: Vec<(String, String, Option<String>)> = match stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut paid_stmt = match conn.prepare(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE student_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    let mut collected = 0.0_f64;
    for (student_id, name, section) in &students {
        let paid: f64 = match paid_stmt.query_row([student_id], |r| r.get(0)) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        collected += paid;
        // The statement shows N/A for unsectioned students, unlike the sheet exports.
        let section_cell = section.clone().unwrap_or_else(|| "N/A".to_string());
        rows.push(json!([
            name,
            section_cell,
            format!("{:.2}", tuition),
            format!("{:.2}", paid),
            format!("{:.2}", tuition - paid)
        ]));
    }

    let projected = tuition * students.len() as f64;
    let logged = conn.execute(
        "INSERT INTO finance_events(id, timestamp, action, details) VALUES(?, ?, ?, ?)",
        (
            &Uuid::new_v4().to_string(),
            &now_iso(),
            "finance_report_printed",
            "Printed detailed financial statement.",
        ),
    );
    if let Err(e) = logged {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "finance_events" })),
        );
    }

    ok(
        &req.id,
        json!({
            "headers": FINANCE_SUMMARY_HEADERS,
            "rows": rows,
            "summary": {
                "projectedRevenue": projected,
                "collected": collected,
                "pending": projected - collected
            },
            "generatedAt": now_iso()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.gradeSheet" => Some(handle_reports_grade_sheet(state, req)),
        "reports.attendanceDay" => Some(handle_reports_attendance_day(state, req)),
        "reports.financeSummary" => Some(handle_reports_finance_summary(state, req)),
        _ => None,
    }
}
