use chrono::{Days, Utc};
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
    section: Option<&str>,
) -> String {
    let params = match section {
        Some(s) => json!({ "name": name, "section": s }),
        None => json!({ "name": name }),
    };
    let created = request_ok(stdin, reader, id, "students.create", params);
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

#[test]
fn school_average_counts_only_graded_sheets() {
    let workspace = temp_dir("edupro-analytics-average");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let ana = create_student(&mut stdin, &mut reader, "2", "Ana Cruz", Some("Rose"));
    let ben = create_student(&mut stdin, &mut reader, "3", "Ben Uy", None);
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.setRoster",
        json!({ "subjectId": subject_id, "studentIds": [ana, ben] }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.itemUpsert",
        json!({
            "subjectId": subject_id,
            "studentId": ana,
            "item": { "name": "Quiz 1", "score": 8, "total": 10, "weight": 1 }
        }),
    );
    // Ben has no earned points yet; a zero sheet reads as ungraded.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.itemUpsert",
        json!({
            "subjectId": subject_id,
            "studentId": ben,
            "item": { "name": "Quiz 1", "score": 0, "total": 10, "weight": 1 }
        }),
    );

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.dashboard",
        json!({}),
    );
    assert_eq!(dash.get("studentCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(dash.get("subjectCount").and_then(|v| v.as_u64()), Some(1));
    let avg = dash
        .get("schoolAverageGrade")
        .and_then(|v| v.as_f64())
        .expect("schoolAverageGrade");
    assert!((avg - 80.0).abs() < 1e-9, "got {}", avg);

    let sections = dash
        .get("sectionDistribution")
        .and_then(|v| v.as_array())
        .expect("sectionDistribution");
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0]["name"].as_str(), Some("Rose"));
    assert_eq!(sections[0]["value"].as_u64(), Some(1));
    assert_eq!(sections[1]["name"].as_str(), Some("Unassigned"));
    assert_eq!(sections[1]["value"].as_u64(), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dashboard_lists_the_next_three_events() {
    let workspace = temp_dir("edupro-analytics-events");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let today = Utc::now().date_naive();
    let fmt = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();
    let entries = [
        (fmt(today - Days::new(1)), "Went By"),
        (fmt(today), "Today Assembly"),
        (fmt(today + Days::new(2)), "Quiz Bee"),
        (fmt(today + Days::new(3)), "Field Trip"),
        (fmt(today + Days::new(4)), "Too Far Out"),
    ];
    for (i, (date, title)) in entries.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "calendar.eventUpsert",
            json!({ "event": { "date": date, "title": title } }),
        );
    }

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.dashboard",
        json!({}),
    );
    let events = dash
        .get("upcomingEvents")
        .and_then(|v| v.as_array())
        .expect("upcomingEvents");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["title"].as_str(), Some("Today Assembly"));
    assert_eq!(events[1]["title"].as_str(), Some("Quiz Bee"));
    assert_eq!(events[2]["title"].as_str(), Some("Field Trip"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_workspace_dashboards_to_zeros() {
    let workspace = temp_dir("edupro-analytics-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.dashboard",
        json!({}),
    );
    assert_eq!(dash.get("studentCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(dash.get("subjectCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(
        dash.get("schoolAverageGrade").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(
        dash.get("sectionDistribution")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    assert_eq!(
        dash.get("upcomingEvents")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
