use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_eduprod");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn eduprod");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "name": name, "section": "Rose" }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

#[test]
fn overview_payments_and_statement_log() {
    let workspace = temp_dir("edupro-finance-overview");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ana = create_student(&mut stdin, &mut reader, "2", "Ana Cruz");
    let ben = create_student(&mut stdin, &mut reader, "3", "Ben Uy");

    let empty = request_ok(&mut stdin, &mut reader, "4", "finance.overview", json!({}));
    assert_eq!(
        empty.get("tuitionPerStudent").and_then(|v| v.as_f64()),
        Some(1500.0)
    );
    assert_eq!(
        empty.pointer("/summary/projectedRevenue").and_then(|v| v.as_f64()),
        Some(3000.0)
    );
    assert_eq!(
        empty.pointer("/summary/collected").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(
        empty.pointer("/summary/pending").and_then(|v| v.as_f64()),
        Some(3000.0)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "finance.paymentAdd",
        json!({ "studentId": ana, "amount": 500, "date": "2025-01-15" }),
    );

    let after = request_ok(&mut stdin, &mut reader, "6", "finance.overview", json!({}));
    assert_eq!(
        after.pointer("/summary/collected").and_then(|v| v.as_f64()),
        Some(500.0)
    );
    assert_eq!(
        after.pointer("/summary/pending").and_then(|v| v.as_f64()),
        Some(2500.0)
    );
    assert_eq!(
        after.pointer("/students/0/paid").and_then(|v| v.as_f64()),
        Some(500.0)
    );
    assert_eq!(
        after.pointer("/students/0/balance").and_then(|v| v.as_f64()),
        Some(1000.0)
    );

    let statement = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "finance.statement",
        json!({ "studentId": ana }),
    );
    assert_eq!(
        statement
            .pointer("/statement/totalDue")
            .and_then(|v| v.as_f64()),
        Some(1500.0)
    );
    assert_eq!(
        statement.pointer("/statement/paid").and_then(|v| v.as_f64()),
        Some(500.0)
    );
    assert_eq!(
        statement
            .pointer("/statement/payments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
    assert!(statement.get("generatedAt").and_then(|v| v.as_str()).is_some());

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "finance.statementBulk",
        json!({ "studentIds": [ana, ben] }),
    );
    assert_eq!(
        bulk.get("statements").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    // Printing leaves an audit trail, newest first.
    let history = request_ok(&mut stdin, &mut reader, "9", "finance.history", json!({}));
    let events = history
        .get("events")
        .and_then(|v| v.as_array())
        .expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0]["action"].as_str(),
        Some("bulk_bills_printed")
    );
    assert_eq!(
        events[0]["details"].as_str(),
        Some("Printed billing statements for 2 students.")
    );
    assert_eq!(events[1]["action"].as_str(), Some("bill_printed"));
    assert_eq!(
        events[1]["details"].as_str(),
        Some("Printed billing statement for Ana Cruz.")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn manual_transactions_roundtrip() {
    let workspace = temp_dir("edupro-finance-manual");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let incoming = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "finance.transactionAdd",
        json!({ "description": "PTA donation", "amount": 1000, "kind": "incoming" }),
    );
    let incoming_id = incoming
        .get("transactionId")
        .and_then(|v| v.as_str())
        .expect("transactionId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "finance.transactionAdd",
        json!({ "description": "Chalk restock", "amount": 250, "kind": "outgoing" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "finance.transactions", json!({}));
    let rows = listed
        .get("transactions")
        .and_then(|v| v.as_array())
        .expect("transactions");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["description"].as_str(), Some("Chalk restock"));
    assert_eq!(rows[1]["description"].as_str(), Some("PTA donation"));

    let overview = request_ok(&mut stdin, &mut reader, "5", "finance.overview", json!({}));
    assert_eq!(
        overview
            .pointer("/summary/manualIncoming")
            .and_then(|v| v.as_f64()),
        Some(1000.0)
    );
    assert_eq!(
        overview
            .pointer("/summary/manualOutgoing")
            .and_then(|v| v.as_f64()),
        Some(250.0)
    );
    assert_eq!(
        overview.pointer("/summary/manualNet").and_then(|v| v.as_f64()),
        Some(750.0)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "finance.transactionDelete",
        json!({ "transactionId": incoming_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "finance.transactions", json!({}));
    assert_eq!(
        listed
            .get("transactions")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let bad_kind = request(
        &mut stdin,
        &mut reader,
        "8",
        "finance.transactionAdd",
        json!({ "description": "Odd", "amount": 10, "kind": "sideways" }),
    );
    assert_eq!(
        bad_kind.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
    assert_eq!(
        bad_kind.pointer("/error/details/kind").and_then(|v| v.as_str()),
        Some("sideways")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn payment_validation_and_missing_rows() {
    let workspace = temp_dir("edupro-finance-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ana = create_student(&mut stdin, &mut reader, "2", "Ana Cruz");

    let negative = request(
        &mut stdin,
        &mut reader,
        "3",
        "finance.paymentAdd",
        json!({ "studentId": ana, "amount": -5 }),
    );
    assert_eq!(
        negative.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "4",
        "finance.paymentAdd",
        json!({ "studentId": ana, "amount": 100, "date": "01/15/2025" }),
    );
    assert_eq!(
        bad_date.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let ghost = request(
        &mut stdin,
        &mut reader,
        "5",
        "finance.paymentAdd",
        json!({ "studentId": "ghost", "amount": 100 }),
    );
    assert_eq!(
        ghost.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let missing_payment = request(
        &mut stdin,
        &mut reader,
        "6",
        "finance.paymentDelete",
        json!({ "paymentId": "nope" }),
    );
    assert_eq!(
        missing_payment
            .pointer("/error/code")
            .and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
