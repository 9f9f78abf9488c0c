use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    // Include enrollment counts so the UI can show a useful dashboard.
    // Use a correlated subquery to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           sub.id,
           sub.name,
           sub.sort_order,
           (SELECT COUNT(*) FROM enrollments e WHERE e.subject_id = sub.id) AS student_count
         FROM subjects sub
         ORDER BY sub.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let sort_order: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "sortOrder": sort_order,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM subjects",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, sort_order) VALUES(?, ?, ?)",
        (&subject_id, &name, next_sort),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };
    let Some(name_value) = patch.get("name") else {
        return err(&req.id, "bad_params", "patch must include name", None);
    };
    let Some(name) = name_value.as_str() else {
        return err(&req.id, "bad_params", "patch.name must be a string", None);
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let changed = match conn.execute(
        "UPDATE subjects SET name = ? WHERE id = ?",
        (&name, &subject_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "subject not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for table in ["attendance_records", "grade_items", "enrollments"] {
        let sql = format!("DELETE FROM {} WHERE subject_id = ?", table);
        if let Err(e) = tx.execute(&sql, [&subject_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.section
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.subject_id = ?
         ORDER BY s.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&subject_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let section: Option<String> = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "section": section }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_set_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Full replace. Grade items and attendance for removed students stay on
    // disk keyed by the pair; they simply stop showing on the sheet.
    if let Err(e) = tx.execute("DELETE FROM enrollments WHERE subject_id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

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
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO enrollments(subject_id, student_id) VALUES(?, ?)",
            (&subject_id, student_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            );
        }
        enrolled += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "ok": true, "enrolled": enrolled, "skipped": skipped }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.roster" => Some(handle_subjects_roster(state, req)),
        "subjects.setRoster" => Some(handle_subjects_set_roster(state, req)),
        _ => None,
    }
}
