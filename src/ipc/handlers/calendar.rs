use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use serde_json::json;
use uuid::Uuid;

/// "YYYY-MM" to (first day, last day) of that month.
fn month_bounds(month: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (y, m) = month.trim().split_once('-')?;
    let year: i32 = y.parse().ok()?;
    let month_num: u32 = m.parse().ok()?;
    let first = NaiveDate::from_ymd_opt(year, month_num, 1)?;
    let next_first = if month_num == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month_num + 1, 1)?
    };
    let last = next_first.pred_opt()?;
    Some((first, last))
}

fn handle_calendar_month_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let month = match req.params.get("month").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing month", None),
    };
    let Some((first, last)) = month_bounds(&month) else {
        return err(&req.id, "bad_params", "month must be YYYY-MM", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, date, title, description
         FROM calendar_events
         WHERE date >= ? AND date <= ?
         ORDER BY date, title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let first_str = first.format("%Y-%m-%d").to_string();
    let last_str = last.format("%Y-%m-%d").to_string();
    let rows = stmt
        .query_map((&first_str, &last_str), |r| {
            let id: String = r.get(0)?;
            let date: String = r.get(1)?;
            let title: String = r.get(2)?;
            let description: String = r.get(3)?;
            Ok(json!({
                "id": id,
                "date": date,
                "title": title,
                "description": description
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(
            &req.id,
            json!({
                "month": month,
                "daysInMonth": last.day(),
                "events": events
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_calendar_event_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(event) = req.params.get("event").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid event", None);
    };

    let date = match event.get("date").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing event.date", None),
    };
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return err(&req.id, "bad_params", "event.date must be YYYY-MM-DD", None);
    }
    let title = match event.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing event.title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "event.title must not be empty", None);
    }
    let description = event
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let event_id = match event.get("id") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => return err(&req.id, "bad_params", "event.id must be a string", None),
        },
    };

    match event_id {
        Some(existing) => {
            let changed = match conn.execute(
                "UPDATE calendar_events SET date = ?, title = ?, description = ? WHERE id = ?",
                (&date, &title, &description, &existing),
            ) {
                Ok(v) => v,
                Err(e) => {
                    return err(
                        &req.id,
                        "db_update_failed",
                        e.to_string(),
                        Some(json!({ "table": "calendar_events" })),
                    )
                }
            };
            if changed == 0 {
                return err(&req.id, "not_found", "event not found", None);
            }
            ok(&req.id, json!({ "eventId": existing }))
        }
        None => {
            let new_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO calendar_events(id, date, title, description) VALUES(?, ?, ?, ?)",
                (&new_id, &date, &title, &description),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "calendar_events" })),
                );
            }
            ok(&req.id, json!({ "eventId": new_id }))
        }
    }
}

fn handle_calendar_event_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let event_id = match req.params.get("eventId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing eventId", None),
    };

    let changed = match conn.execute("DELETE FROM calendar_events WHERE id = ?", [&event_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "calendar_events" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "event not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.monthOpen" => Some(handle_calendar_month_open(state, req)),
        "calendar.eventUpsert" => Some(handle_calendar_event_upsert(state, req)),
        "calendar.eventDelete" => Some(handle_calendar_event_delete(state, req)),
        _ => None,
    }
}
