use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_TUITION: f64 = 1500.0;

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

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Per-student tuition from the billing settings section, falling back to
/// the stock default when the section was never saved.
fn tuition_per_student(conn: &Connection) -> Result<f64, HandlerErr> {
    let section = db::settings_get_json(conn, "setup.billing")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(section
        .as_ref()
        .and_then(|v| v.get("tuitionPerStudent"))
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_TUITION))
}

fn log_finance_event(conn: &Connection, action: &str, details: String) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO finance_events(id, timestamp, action, details) VALUES(?, ?, ?, ?)",
        (&Uuid::new_v4().to_string(), &now_iso(), action, &details),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "finance_events" })),
    })?;
    Ok(())
}

fn load_student(
    conn: &Connection,
    student_id: &str,
) -> Result<(String, Option<String>), HandlerErr> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, section FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    row.ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

fn load_payments(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<(String, String, f64)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, date, amount
             FROM payments
             WHERE student_id = ?
             ORDER BY date, rowid",
        )
        .map_err(db_err)?;
    stmt.query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
}

fn parse_amount(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    let amount = params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a number", key)))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must be positive", key),
        ));
    }
    Ok(amount)
}

fn finance_overview(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let tuition = tuition_per_student(conn)?;

    let mut stmt = conn
        .prepare("SELECT id, name, section FROM students ORDER BY sort_order")
        .map_err(db_err)?;
    let students: Vec<(String, String, Option<String>)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut rows = Vec::with_capacity(students.len());
    let mut collected = 0.0_f64;
    for (student_id, name, section) in &students {
        let payments = load_payments(conn, student_id)?;
        let amounts: Vec<f64> = payments.iter().map(|(_, _, amount)| *amount).collect();
        let balance = calc::student_balance(tuition, &amounts);
        collected += balance.paid;
        rows.push(json!({
            "studentId": student_id,
            "name": name,
            "section": section,
            "totalDue": balance.total_due,
            "paid": balance.paid,
            "balance": balance.balance
        }));
    }

    let projected = tuition * students.len() as f64;

    let (incoming, outgoing): (f64, f64) = conn
        .query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN kind = 'incoming' THEN amount ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN kind = 'outgoing' THEN amount ELSE 0 END), 0)
             FROM manual_transactions",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(db_err)?;

    Ok(json!({
        "tuitionPerStudent": tuition,
        "summary": {
            "studentCount": students.len(),
            "projectedRevenue": projected,
            "collected": collected,
            "pending": projected - collected,
            "manualIncoming": incoming,
            "manualOutgoing": outgoing,
            "manualNet": incoming - outgoing
        },
        "students": rows
    }))
}

fn finance_payment_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let amount = parse_amount(params, "amount")?;
    let date = match params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => {
            let t = raw.trim();
            if chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d").is_err() {
                return Err(HandlerErr::new("bad_params", "date must be YYYY-MM-DD"));
            }
            t.to_string()
        }
        None => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    };

    load_student(conn, &student_id)?;

    let payment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(id, student_id, date, amount) VALUES(?, ?, ?, ?)",
        (&payment_id, &student_id, &date, amount),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    Ok(json!({ "paymentId": payment_id, "date": date }))
}

fn finance_payment_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let changed = conn
        .execute("DELETE FROM payments WHERE id = ?", [&payment_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "payments" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "payment not found"));
    }
    Ok(json!({ "ok": true }))
}

fn statement_json(
    conn: &Connection,
    student_id: &str,
    tuition: f64,
) -> Result<serde_json::Value, HandlerErr> {
    let (name, section) = load_student(conn, student_id)?;
    let payments = load_payments(conn, student_id)?;
    let amounts: Vec<f64> = payments.iter().map(|(_, _, amount)| *amount).collect();
    let balance = calc::student_balance(tuition, &amounts);

    let payments_json: Vec<serde_json::Value> = payments
        .iter()
        .map(|(id, date, amount)| json!({ "id": id, "date": date, "amount": amount }))
        .collect();

    Ok(json!({
        "student": { "id": student_id, "name": name, "section": section },
        "totalDue": balance.total_due,
        "paid": balance.paid,
        "balance": balance.balance,
        "payments": payments_json
    }))
}

fn finance_statement(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let tuition = tuition_per_student(conn)?;

    let statement = statement_json(conn, &student_id, tuition)?;
    let name = statement["student"]["name"].as_str().unwrap_or_default().to_string();
    log_finance_event(
        conn,
        "bill_printed",
        format!("Printed billing statement for {}.", name),
    )?;

    Ok(json!({
        "statement": statement,
        "generatedAt": now_iso()
    }))
}

fn finance_statement_bulk(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(arr) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing/invalid studentIds"));
    };
    let mut student_ids: Vec<String> = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::new("bad_params", "studentIds must be strings"));
        };
        student_ids.push(s.to_string());
    }
    if student_ids.is_empty() {
        return Err(HandlerErr::new("bad_params", "studentIds must not be empty"));
    }

    let tuition = tuition_per_student(conn)?;
    let mut statements = Vec::with_capacity(student_ids.len());
    for student_id in &student_ids {
        statements.push(statement_json(conn, student_id, tuition)?);
    }

    log_finance_event(
        conn,
        "bulk_bills_printed",
        format!("Printed billing statements for {} students.", statements.len()),
    )?;

    Ok(json!({
        "statements": statements,
        "generatedAt": now_iso()
    }))
}

fn finance_transaction_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let description = get_required_str(params, "description")?.trim().to_string();
    if description.is_empty() {
        return Err(HandlerErr::new("bad_params", "description must not be empty"));
    }
    let amount = parse_amount(params, "amount")?;
    let kind = get_required_str(params, "kind")?;
    if kind != "incoming" && kind != "outgoing" {
        return Err(HandlerErr {
            code: "bad_params",
            message: "kind must be incoming or outgoing".to_string(),
            details: Some(json!({ "kind": kind })),
        });
    }

    let transaction_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO manual_transactions(id, timestamp, description, amount, kind)
         VALUES(?, ?, ?, ?, ?)",
        (&transaction_id, &now_iso(), &description, amount, &kind),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "manual_transactions" })),
    })?;

    Ok(json!({ "transactionId": transaction_id }))
}

fn finance_transaction_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let transaction_id = get_required_str(params, "transactionId")?;
    let changed = conn
        .execute(
            "DELETE FROM manual_transactions WHERE id = ?",
            [&transaction_id],
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "manual_transactions" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "transaction not found"));
    }
    Ok(json!({ "ok": true }))
}

fn finance_transactions(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, timestamp, description, amount, kind
             FROM manual_transactions
             ORDER BY timestamp DESC, rowid DESC",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let timestamp: String = r.get(1)?;
            let description: String = r.get(2)?;
            let amount: f64 = r.get(3)?;
            let kind: String = r.get(4)?;
            Ok(json!({
                "id": id,
                "timestamp": timestamp,
                "description": description,
                "amount": amount,
                "kind": kind
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "transactions": rows }))
}

fn finance_history(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, timestamp, action, details
             FROM finance_events
             ORDER BY timestamp DESC, rowid DESC",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let timestamp: String = r.get(1)?;
            let action: String = r.get(2)?;
            let details: String = r.get(3)?;
            Ok(json!({
                "id": id,
                "timestamp": timestamp,
                "action": action,
                "details": details
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "events": rows }))
}

fn handle_finance_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_overview(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_payment_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_payment_add(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_payment_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_payment_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_statement(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_statement(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_statement_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_statement_bulk(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_transaction_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_transaction_add(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_transaction_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_transaction_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_transactions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_transactions(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_finance_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match finance_history(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "finance.overview" => Some(handle_finance_overview(state, req)),
        "finance.paymentAdd" => Some(handle_finance_payment_add(state, req)),
        "finance.paymentDelete" => Some(handle_finance_payment_delete(state, req)),
        "finance.statement" => Some(handle_finance_statement(state, req)),
        "finance.statementBulk" => Some(handle_finance_statement_bulk(state, req)),
        "finance.transactionAdd" => Some(handle_finance_transaction_add(state, req)),
        "finance.transactionDelete" => Some(handle_finance_transaction_delete(state, req)),
        "finance.transactions" => Some(handle_finance_transactions(state, req)),
        "finance.history" => Some(handle_finance_history(state, req)),
        _ => None,
    }
}
