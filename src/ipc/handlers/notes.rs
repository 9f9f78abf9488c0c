use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_notes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Newest first, matching how the note feed renders.
    let mut stmt = match conn.prepare(
        "SELECT id, date, content
         FROM student_notes
         WHERE student_id = ?
         ORDER BY date DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&student_id], |r| {
            let id: String = r.get(0)?;
            let date: String = r.get(1)?;
            let content: String = r.get(2)?;
            Ok(json!({ "id": id, "date": date, "content": content }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(notes) => ok(&req.id, json!({ "studentId": student_id, "notes": notes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_notes_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let content = match req.params.get("content").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing content", None),
    };
    if content.is_empty() {
        return err(&req.id, "bad_params", "content must not be empty", None);
    }
    let date = match req.params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => {
            let t = raw.trim();
            if DateTime::parse_from_rfc3339(t).is_err() {
                return err(&req.id, "bad_params", "date must be RFC 3339", None);
            }
            t.to_string()
        }
        None => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
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

    let note_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO student_notes(id, student_id, date, content) VALUES(?, ?, ?, ?)",
        (&note_id, &student_id, &date, &content),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_notes" })),
        );
    }

    ok(&req.id, json!({ "noteId": note_id, "date": date }))
}

fn handle_notes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let note_id = match req.params.get("noteId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing noteId", None),
    };

    let changed = match conn.execute("DELETE FROM student_notes WHERE id = ?", [&note_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "student_notes" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "note not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notes.list" => Some(handle_notes_list(state, req)),
        "notes.add" => Some(handle_notes_add(state, req)),
        "notes.delete" => Some(handle_notes_delete(state, req)),
        _ => None,
    }
}
