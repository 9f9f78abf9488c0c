use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

fn require_pair(conn: &Connection, subject_id: &str, student_id: &str) -> Result<(), HandlerErr> {
    let subject: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if subject.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    let student: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if student.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(())
}

fn load_items(
    conn: &Connection,
    subject_id: &str,
    student_id: &str,
) -> Result<Vec<calc::GradeItem>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, score, total, weight
             FROM grade_items
             WHERE subject_id = ? AND student_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map((subject_id, student_id), |r| {
        Ok(calc::GradeItem {
            id: r.get(0)?,
            name: r.get(1)?,
            score: r.get(2)?,
            total: r.get(3)?,
            weight: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn items_json(items: &[calc::GradeItem]) -> serde_json::Value {
    serde_json::to_value(items).unwrap_or_else(|_| json!([]))
}

fn grades_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let student_id = get_required_str(params, "studentId")?;
    require_pair(conn, &subject_id, &student_id)?;

    let items = load_items(conn, &subject_id, &student_id)?;
    // overallGrade serializes to null when the aggregation went non-finite.
    let overall = calc::overall_grade(&items);
    Ok(json!({
        "subjectId": subject_id,
        "studentId": student_id,
        "items": items_json(&items),
        "overallGrade": overall
    }))
}

struct ItemInput {
    id: Option<String>,
    name: String,
    score: f64,
    total: f64,
    weight: f64,
}

/// Shape checks only. Ranges are deliberately left alone: negative weights,
/// zero totals and over-max scores are stored as entered and surface through
/// the aggregation.
fn parse_item(params: &serde_json::Value) -> Result<ItemInput, HandlerErr> {
    let Some(item) = params.get("item").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing/invalid item"));
    };

    let id = match item.get("id") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                return Err(HandlerErr::new("bad_params", "item.id must be a string"));
            }
        },
    };

    let name = item
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", "item.name must be a string"))?;
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "item.name must not be empty"));
    }

    let mut numbers = [0.0_f64; 3];
    for (slot, key) in numbers.iter_mut().zip(["score", "total", "weight"]) {
        *slot = item
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr::new("bad_params", format!("item.{} must be a number", key)))?;
    }

    Ok(ItemInput {
        id,
        name,
        score: numbers[0],
        total: numbers[1],
        weight: numbers[2],
    })
}

fn grades_item_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let student_id = get_required_str(params, "studentId")?;
    require_pair(conn, &subject_id, &student_id)?;
    let input = parse_item(params)?;

    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE subject_id = ? AND student_id = ?",
            (&subject_id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if enrolled.is_none() {
        return Err(HandlerErr::new(
            "not_enrolled",
            "student is not enrolled in this subject",
        ));
    }

    let item_id = match input.id {
        Some(existing) => {
            let changed = conn
                .execute(
                    "UPDATE grade_items
                     SET name = ?, score = ?, total = ?, weight = ?,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                     WHERE id = ? AND subject_id = ? AND student_id = ?",
                    (
                        &input.name,
                        input.score,
                        input.total,
                        input.weight,
                        &existing,
                        &subject_id,
                        &student_id,
                    ),
                )
                .map_err(|e| HandlerErr {
                    code: "db_update_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "grade_items" })),
                })?;
            if changed == 0 {
                return Err(HandlerErr::new("not_found", "grade item not found"));
            }
            existing
        }
        None => {
            let next_sort: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(sort_order), -1) + 1
                     FROM grade_items
                     WHERE subject_id = ? AND student_id = ?",
                    (&subject_id, &student_id),
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            let new_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO grade_items(id, subject_id, student_id, name, score, total, weight, sort_order, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
                (
                    &new_id,
                    &subject_id,
                    &student_id,
                    &input.name,
                    input.score,
                    input.total,
                    input.weight,
                    next_sort,
                ),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "grade_items" })),
            })?;
            new_id
        }
    };

    let items = load_items(conn, &subject_id, &student_id)?;
    Ok(json!({
        "itemId": item_id,
        "overallGrade": calc::overall_grade(&items)
    }))
}

fn grades_item_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let student_id = get_required_str(params, "studentId")?;
    let item_id = get_required_str(params, "itemId")?;
    require_pair(conn, &subject_id, &student_id)?;

    let changed = conn
        .execute(
            "DELETE FROM grade_items WHERE id = ? AND subject_id = ? AND student_id = ?",
            (&item_id, &subject_id, &student_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grade_items" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "grade item not found"));
    }

    let items = load_items(conn, &subject_id, &student_id)?;
    Ok(json!({
        "ok": true,
        "overallGrade": calc::overall_grade(&items)
    }))
}

fn grades_sheet(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let section = params
        .get("section")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "All");

    let subject_name: Option<String> = conn
        .query_row("SELECT name FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(subject_name) = subject_name else {
        return Err(HandlerErr::new("not_found", "subject not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.section
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.subject_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(db_err)?;
    let roster: Vec<(String, String, Option<String>)> = stmt
        .query_map([&subject_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut students = Vec::new();
    for (student_id, name, student_section) in roster {
        if let Some(filter) = &section {
            if student_section.as_deref() != Some(filter.as_str()) {
                continue;
            }
        }
        let items = load_items(conn, &subject_id, &student_id)?;
        let overall = calc::overall_grade(&items);
        students.push(json!({
            "studentId": student_id,
            "name": name,
            "section": student_section,
            "items": items_json(&items),
            "overallGrade": overall
        }));
    }

    Ok(json!({
        "subjectId": subject_id,
        "subjectName": subject_name,
        "students": students
    }))
}

fn handle_grades_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_grades_item_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_item_upsert(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_grades_item_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_item_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_grades_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_sheet(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.open" => Some(handle_grades_open(state, req)),
        "grades.itemUpsert" => Some(handle_grades_item_upsert(state, req)),
        "grades.itemDelete" => Some(handle_grades_item_delete(state, req)),
        "grades.sheet" => Some(handle_grades_sheet(state, req)),
        _ => None,
    }
}
