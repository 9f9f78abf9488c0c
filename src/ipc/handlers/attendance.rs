use crate::calc::{self, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

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

#[derive(Debug, Clone)]
struct BasicStudent {
    id: String,
    name: String,
    section: Option<String>,
    sort_order: i64,
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

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
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

fn list_enrolled_students(
    conn: &Connection,
    subject_id: &str,
) -> Result<Vec<BasicStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.section, s.sort_order
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.subject_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([subject_id], |r| {
        Ok(BasicStudent {
            id: r.get(0)?,
            name: r.get(1)?,
            section: r.get(2)?,
            sort_order: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    match NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        Ok(_) => Ok(t.to_string()),
        Err(_) => Err(HandlerErr {
            code: "bad_params",
            message: "date must be YYYY-MM-DD".to_string(),
            details: None,
        }),
    }
}

/// `null` clears the record, a string must be one of present/absent/late.
fn parse_optional_status(
    v: Option<&serde_json::Value>,
) -> Result<Option<AttendanceStatus>, HandlerErr> {
    let Some(v) = v else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be string or null".to_string(),
            details: None,
        });
    };
    match AttendanceStatus::parse(s) {
        Some(status) => Ok(Some(status)),
        None => Err(HandlerErr {
            code: "bad_params",
            message: "status must be one of: present, absent, late".to_string(),
            details: Some(json!({ "status": s })),
        }),
    }
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }
    let students = list_enrolled_students(conn, &subject_id)?;

    let mut by_student: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, status
             FROM attendance_records
             WHERE subject_id = ? AND date = ?",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map((&subject_id, &date), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    for (student_id, status) in rows {
        by_student.insert(student_id, status);
    }

    let rows_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "name": s.name,
                "section": s.section,
                "sortOrder": s.sort_order,
                "status": by_student.get(&s.id)
            })
        })
        .collect();

    Ok(json!({
        "subjectId": subject_id,
        "date": date,
        "students": rows_json
    }))
}

fn attendance_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let student_id = get_required_str(params, "studentId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let status = parse_optional_status(params.get("status"))?;

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }
    let enrolled = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE subject_id = ? AND student_id = ?",
            (&subject_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if enrolled.is_none() {
        return Err(HandlerErr {
            code: "not_enrolled",
            message: "student is not enrolled in this subject".to_string(),
            details: None,
        });
    }

    match status {
        Some(status) => {
            conn.execute(
                "INSERT INTO attendance_records(subject_id, student_id, date, status)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(subject_id, student_id, date) DO UPDATE SET
                   status = excluded.status",
                (&subject_id, &student_id, &date, status.as_str()),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance_records" })),
            })?;
        }
        None => {
            conn.execute(
                "DELETE FROM attendance_records
                 WHERE subject_id = ? AND student_id = ? AND date = ?",
                (&subject_id, &student_id, &date),
            )
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance_records" })),
            })?;
        }
    }

    Ok(json!({ "ok": true }))
}

fn attendance_bulk_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let status = match parse_optional_status(params.get("status"))? {
        Some(s) => s,
        None => {
            return Err(HandlerErr {
                code: "bad_params",
                message: "missing status".to_string(),
                details: None,
            })
        }
    };
    let Some(arr) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing/invalid studentIds".to_string(),
            details: None,
        });
    };
    let mut student_ids: Vec<String> = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "studentIds must be strings".to_string(),
                details: None,
            });
        };
        student_ids.push(s.to_string());
    }

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut stamped = 0usize;
    let mut skipped = 0usize;
    for student_id in &student_ids {
        let enrolled = tx
            .query_row(
                "SELECT 1 FROM enrollments WHERE subject_id = ? AND student_id = ?",
                (&subject_id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?;
        if enrolled.is_none() {
            skipped += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO attendance_records(subject_id, student_id, date, status)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(subject_id, student_id, date) DO UPDATE SET
               status = excluded.status",
            (&subject_id, student_id, &date, status.as_str()),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_records" })),
        })?;
        stamped += 1;
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true, "stamped": stamped, "skipped": skipped }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let section = params
        .get("section")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "All");

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }
    let students = list_enrolled_students(conn, &subject_id)?;

    let mut by_student: HashMap<String, Vec<AttendanceStatus>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, status
             FROM attendance_records
             WHERE subject_id = ?",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map([&subject_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    for (student_id, raw) in rows {
        // Rows hold lowercase values; anything else is ignored.
        if let Some(status) = AttendanceStatus::parse(&raw) {
            by_student.entry(student_id).or_default().push(status);
        }
    }

    let rows_json: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| match &section {
            Some(filter) => s.section.as_deref() == Some(filter.as_str()),
            None => true,
        })
        .map(|s| {
            let tally = calc::attendance_tally(
                by_student.get(&s.id).into_iter().flatten().copied(),
            );
            json!({
                "studentId": s.id,
                "name": s.name,
                "section": s.section,
                "present": tally.present,
                "absent": tally.absent,
                "late": tally.late,
                "total": tally.total,
                "presentPercent": tally.present_percent
            })
        })
        .collect();

    Ok(json!({
        "subjectId": subject_id,
        "students": rows_json
    }))
}

fn handle_attendance_day_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_day_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_set_status(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_bulk_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_bulk_set_status(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_summary(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(handle_attendance_day_open(state, req)),
        "attendance.setStatus" => Some(handle_attendance_set_status(state, req)),
        "attendance.bulkSetStatus" => Some(handle_attendance_bulk_set_status(state, req)),
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
