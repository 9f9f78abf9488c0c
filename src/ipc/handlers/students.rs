use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let search = req
        .params
        .get("search")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let section = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "All");

    let mut stmt = match conn.prepare(
        "SELECT id, name, section, guardian_name, email, phone, sort_order
         FROM students
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    type StudentRow = (
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        i64,
    );
    let rows: Result<Vec<StudentRow>, _> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, name, sec, guardian, email, _, _)| {
            if let Some(filter_section) = &section {
                if sec.as_deref() != Some(filter_section.as_str()) {
                    return false;
                }
            }
            let Some(needle) = &search else {
                return true;
            };
            // Same fields the roster search box matches on; phone is shown
            // in the row but never searched.
            let haystacks = [
                Some(name.as_str()),
                sec.as_deref(),
                guardian.as_deref(),
                email.as_deref(),
            ];
            haystacks
                .into_iter()
                .flatten()
                .any(|h| h.to_lowercase().contains(needle.as_str()))
        })
        .map(|(id, name, sec, guardian, email, phone, sort_order)| {
            json!({
                "id": id,
                "name": name,
                "section": sec,
                "guardianName": guardian,
                "email": email,
                "phone": phone,
                "sortOrder": sort_order
            })
        })
        .collect();

    ok(&req.id, json!({ "students": students }))
}

fn opt_trimmed(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let section = opt_trimmed(&req.params, "section");
    let guardian_name = opt_trimmed(&req.params, "guardianName");
    let email = opt_trimmed(&req.params, "email");
    let phone = opt_trimmed(&req.params, "phone");

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, section, guardian_name, email, phone, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &name,
            &section,
            &guardian_name,
            &email,
            &phone,
            next_sort,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    for (key, column) in [
        ("section", "section"),
        ("guardianName", "guardian_name"),
        ("email", "email"),
        ("phone", "phone"),
    ] {
        let Some(v) = patch.get(key) else {
            continue;
        };
        if v.is_null() {
            set_parts.push(format!("{} = ?", column));
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            let t = s.trim().to_string();
            set_parts.push(format!("{} = ?", column));
            if t.is_empty() {
                bind_values.push(Value::Null);
            } else {
                bind_values.push(Value::Text(t));
            }
        } else {
            return err(
                &req.id,
                "bad_params",
                format!("patch.{} must be a string or null", key),
                None,
            );
        }
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());

    let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(student_id));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for table in [
        "attendance_records",
        "grade_items",
        "enrollments",
        "student_notes",
        "payments",
    ] {
        let sql = format!("DELETE FROM {} WHERE student_id = ?", table);
        if let Err(e) = tx.execute(&sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_bulk_assign_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let Some(arr) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing/invalid studentIds", None);
    };
    let mut student_ids: Vec<String> = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "studentIds must be strings", None);
        };
        student_ids.push(s.to_string());
    }

    let subject_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subject_exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut enrolled = 0usize;
    let mut skipped = 0usize;
    for student_id in &student_ids {
        let known: Option<i64> = match tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        if known.is_none() {
            skipped += 1;
            continue;
        }
        match tx.execute(
            "INSERT OR IGNORE INTO enrollments(subject_id, student_id) VALUES(?, ?)",
            (&subject_id, student_id),
        ) {
            Ok(n) => enrolled += n,
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "enrollments" })),
                );
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "ok": true, "enrolled": enrolled, "skipped": skipped }),
    )
}

fn handle_students_sections(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sections": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT section FROM students
         WHERE section IS NOT NULL AND section != ''
         ORDER BY section",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.bulkAssignSubject" => Some(handle_students_bulk_assign_subject(state, req)),
        "students.sections" => Some(handle_students_sections(state, req)),
        _ => None,
    }
}
