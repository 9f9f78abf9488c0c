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

struct Seeded {
    subject_id: String,
    ada: String,
    ben: String,
}

/// Ada sits in Rose, Ben has no section, both are on the roster.
fn seed_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let ada = request_ok(
        stdin,
        reader,
        "s1",
        "students.create",
        json!({ "name": "Ada Lim", "section": "Rose" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let ben = request_ok(
        stdin,
        reader,
        "s2",
        "students.create",
        json!({ "name": "Ben Uy" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let subject_id = request_ok(
        stdin,
        reader,
        "s3",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s4",
        "subjects.setRoster",
        json!({ "subjectId": subject_id, "studentIds": [ada, ben] }),
    );
    Seeded {
        subject_id,
        ada,
        ben,
    }
}

#[test]
fn grade_sheet_rows_follow_the_export_layout() {
    let workspace = temp_dir("edupro-report-grades");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    for (id, name, score, total, weight) in [
        ("2", "Quiz 1", 8, 10, 0.4),
        ("3", "Exam", 45, 50, 0.6),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "grades.itemUpsert",
            json!({
                "subjectId": seeded.subject_id,
                "studentId": seeded.ada,
                "item": { "name": name, "score": score, "total": total, "weight": weight }
            }),
        );
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.gradeSheet",
        json!({ "subjectId": seeded.subject_id }),
    );
    assert_eq!(report["subjectName"].as_str(), Some("Mathematics"));
    assert_eq!(
        report["headers"],
        json!([
            "Student Name",
            "Section",
            "Overall Grade (%)",
            "Grade Item",
            "Score",
            "Total",
            "Weight (%)"
        ])
    );
    let rows = report["rows"].as_array().expect("rows");
    // One row per item, plus a placeholder row for Ben's empty sheet.
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], json!(["Ada Lim", "Rose", "86.0", "Quiz 1", "8", "10", "40"]));
    assert_eq!(rows[1], json!(["Ada Lim", "Rose", "86.0", "Exam", "45", "50", "60"]));
    assert_eq!(rows[2], json!(["Ben Uy", "", "0.0", "No items", "", "", ""]));
    assert!(report["generatedAt"].as_str().unwrap_or("").contains('T'));

    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.gradeSheet",
        json!({ "subjectId": seeded.subject_id, "section": "Rose" }),
    );
    assert_eq!(filtered["rows"].as_array().map(|r| r.len()), Some(2));

    // "All" is the picker's everything choice, not a section name.
    let unfiltered = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.gradeSheet",
        json!({ "subjectId": seeded.subject_id, "section": "All" }),
    );
    assert_eq!(unfiltered["rows"].as_array().map(|r| r.len()), Some(3));

    let missing = request(
        &mut stdin,
        &mut reader,
        "7",
        "reports.gradeSheet",
        json!({ "subjectId": "no-such" }),
    );
    assert_eq!(missing["ok"].as_bool(), Some(false));
    assert_eq!(
        missing.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_day_grid_marks_missing_records() {
    let workspace = temp_dir("edupro-report-attendance");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.setStatus",
        json!({
            "subjectId": seeded.subject_id,
            "studentId": seeded.ada,
            "date": "2025-08-18",
            "status": "present"
        }),
    );
    // A record on another day must not leak into the grid.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2b",
        "attendance.setStatus",
        json!({
            "subjectId": seeded.subject_id,
            "studentId": seeded.ben,
            "date": "2025-08-19",
            "status": "late"
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.attendanceDay",
        json!({ "subjectId": seeded.subject_id, "date": "2025-08-18" }),
    );
    assert_eq!(report["subjectName"].as_str(), Some("Mathematics"));
    assert_eq!(report["date"].as_str(), Some("2025-08-18"));
    assert_eq!(
        report["headers"],
        json!(["Student Name", "Section", "Status"])
    );
    let rows = report["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], json!(["Ada Lim", "Rose", "Present"]));
    assert_eq!(rows[1], json!(["Ben Uy", "", "Not Recorded"]));

    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.attendanceDay",
        json!({
            "subjectId": seeded.subject_id,
            "date": "2025-08-18",
            "section": "Rose"
        }),
    );
    assert_eq!(filtered["rows"].as_array().map(|r| r.len()), Some(1));

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "5",
        "reports.attendanceDay",
        json!({ "subjectId": seeded.subject_id, "date": "Aug 18, 2025" }),
    );
    assert_eq!(bad_date["ok"].as_bool(), Some(false));
    assert_eq!(
        bad_date.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn finance_summary_formats_amounts_and_logs_the_print() {
    let workspace = temp_dir("edupro-report-finance");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "finance.paymentAdd",
        json!({ "studentId": seeded.ada, "amount": 500, "date": "2025-01-15" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.financeSummary",
        json!({}),
    );
    assert_eq!(
        report["headers"],
        json!(["Student Name", "Section", "Total Due", "Paid", "Balance"])
    );
    let rows = report["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        json!(["Ada Lim", "Rose", "1500.00", "500.00", "1000.00"])
    );
    assert_eq!(
        rows[1],
        json!(["Ben Uy", "N/A", "1500.00", "0.00", "1500.00"])
    );
    let summary = &report["summary"];
    assert_eq!(summary["projectedRevenue"].as_f64(), Some(3000.0));
    assert_eq!(summary["collected"].as_f64(), Some(500.0));
    assert_eq!(summary["pending"].as_f64(), Some(2500.0));

    let history = request_ok(&mut stdin, &mut reader, "4", "finance.history", json!({}));
    let events = history["events"].as_array().expect("events");
    assert_eq!(
        events[0]["action"].as_str(),
        Some("finance_report_printed")
    );
    assert_eq!(
        events[0]["details"].as_str(),
        Some("Printed detailed financial statement.")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
