use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn count_rows(conn: &Connection, req: &Request, sql: &str) -> Result<i64, serde_json::Value> {
    conn.query_row(sql, [], |r| r.get(0))
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// Overall grade for every (student, subject) sheet that has at least one item.
/// Sheets grading to zero or NaN drop out of the school mean downstream.
fn sheet_overalls(conn: &Connection, req: &Request) -> Result<Vec<f64>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, subject_id, id, name, score, total, weight
             FROM grade_items
             ORDER BY student_id, subject_id, sort_order",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let rows = stmt
        .query_map([], |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            Ok((
                student_id,
                subject_id,
                calc::GradeItem {
                    id: r.get(2)?,
                    name: r.get(3)?,
                    score: r.get(4)?,
                    total: r.get(5)?,
                    weight: r.get(6)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    let mut sheets: HashMap<(String, String), Vec<calc::GradeItem>> = HashMap::new();
    for (student_id, subject_id, item) in rows {
        sheets.entry((student_id, subject_id)).or_default().push(item);
    }
    Ok(sheets.values().map(|items| calc::overall_grade(items)).collect())
}

fn upcoming_events(conn: &Connection, req: &Request) -> Result<Vec<serde_json::Value>, serde_json::Value> {
    // Nearest dates first; entry order is irrelevant.
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let mut stmt = conn
        .prepare(
            "SELECT id, date, title, description
             FROM calendar_events
             WHERE date >= ?
             ORDER BY date, rowid
             LIMIT 3",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    stmt.query_map([&today], |r| {
        let id: String = r.get(0)?;
        let date: String = r.get(1)?;
        let title: String = r.get(2)?;
        let description: String = r.get(3)?;
        Ok(json!({ "id": id, "date": date, "title": title, "description": description }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn section_distribution(conn: &Connection, req: &Request) -> Result<Vec<serde_json::Value>, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(NULLIF(section, ''), 'Unassigned') AS name, COUNT(*) AS value
             FROM students
             GROUP BY name
             ORDER BY name",
        )
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    stmt.query_map([], |r| {
        let name: String = r.get(0)?;
        let value: i64 = r.get(1)?;
        Ok(json!({ "name": name, "value": value }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_analytics_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_count = match count_rows(conn, req, "SELECT COUNT(*) FROM students") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_count = match count_rows(conn, req, "SELECT COUNT(*) FROM subjects") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let overalls = match sheet_overalls(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let events = match upcoming_events(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sections = match section_distribution(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    ok(
        &req.id,
        json!({
            "studentCount": student_count,
            "subjectCount": subject_count,
            "schoolAverageGrade": calc::school_average(&overalls),
            "sectionDistribution": sections,
            "upcomingEvents": events
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.dashboard" => Some(handle_analytics_dashboard(state, req)),
        _ => None,
    }
}
