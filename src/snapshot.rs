//! Import of the browser app's persisted state blob (`eduProAppData`).

use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calc;
use crate::db;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub students: Vec<SnapshotStudent>,
    pub subjects: Vec<SnapshotSubject>,
    pub attendance: Vec<SnapshotDay>,
    pub grades: Vec<SnapshotSheet>,
    pub events: Vec<SnapshotEvent>,
    pub notes: Vec<SnapshotNote>,
    pub user_profile: Option<SnapshotProfile>,
    pub finance_history: Vec<SnapshotFinanceEvent>,
    pub manual_transactions: Vec<SnapshotTransaction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotStudent {
    pub id: String,
    pub name: String,
    pub section: Option<String>,
    pub contact: Option<SnapshotContact>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotContact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub guardian_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotSubject {
    pub id: String,
    pub name: String,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotDay {
    pub date: String,
    pub subject_id: String,
    pub records: Vec<SnapshotAttendanceRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotAttendanceRecord {
    pub student_id: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotSheet {
    pub student_id: String,
    pub subject_id: String,
    pub items: Vec<SnapshotItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotItem {
    pub id: String,
    pub name: String,
    pub score: Option<f64>,
    pub total: Option<f64>,
    pub weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotEvent {
    pub id: String,
    pub date: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotNote {
    pub id: String,
    pub student_id: String,
    pub date: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotProfile {
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotFinanceEvent {
    pub id: String,
    pub timestamp: String,
    pub action: String,
    pub details: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotTransaction {
    pub id: String,
    pub timestamp: String,
    pub description: String,
    pub amount: Option<f64>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub students: usize,
    pub subjects: usize,
    pub enrollments: usize,
    pub attendance_records: usize,
    pub grade_items: usize,
    pub events: usize,
    pub notes: usize,
    pub finance_events: usize,
    pub manual_transactions: usize,
    pub skipped: SkippedCounts,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCounts {
    pub enrollments: usize,
    pub attendance_records: usize,
    pub grade_sheets: usize,
    pub notes: usize,
    pub manual_transactions: usize,
}

fn id_or_new(id: &str) -> String {
    if id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        id.to_string()
    }
}

fn opt_trimmed(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Replaces all domain data with the snapshot's contents in one transaction.
/// Settings are kept except for the profile section, which the blob carries.
pub fn apply(conn: &Connection, snap: &Snapshot) -> anyhow::Result<ImportCounts> {
    let tx = conn
        .unchecked_transaction()
        .context("begin snapshot import")?;
    let mut counts = ImportCounts::default();

    // Children first, parents last.
    for table in [
        "attendance_records",
        "grade_items",
        "enrollments",
        "student_notes",
        "payments",
        "calendar_events",
        "manual_transactions",
        "finance_events",
        "subjects",
        "students",
    ] {
        tx.execute(&format!("DELETE FROM {}", table), [])
            .with_context(|| format!("clear {}", table))?;
    }

    let mut student_ids = std::collections::HashSet::new();
    for (idx, s) in snap.students.iter().enumerate() {
        let id = id_or_new(&s.id);
        let contact = s.contact.as_ref();
        tx.execute(
            "INSERT INTO students(id, name, section, guardian_name, email, phone, sort_order, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))",
            (
                &id,
                &s.name,
                opt_trimmed(&s.section),
                contact.and_then(|c| opt_trimmed(&c.guardian_name)),
                contact.and_then(|c| opt_trimmed(&c.email)),
                contact.and_then(|c| opt_trimmed(&c.phone)),
                idx as i64,
            ),
        )
        .context("insert student")?;
        student_ids.insert(id);
        counts.students += 1;
    }

    let mut subject_ids = std::collections::HashSet::new();
    for (idx, s) in snap.subjects.iter().enumerate() {
        let id = id_or_new(&s.id);
        tx.execute(
            "INSERT INTO subjects(id, name, sort_order) VALUES(?, ?, ?)",
            (&id, &s.name, idx as i64),
        )
        .context("insert subject")?;
        for student_id in &s.student_ids {
            if !student_ids.contains(student_id.as_str()) {
                counts.skipped.enrollments += 1;
                continue;
            }
            let n = tx
                .execute(
                    "INSERT OR IGNORE INTO enrollments(subject_id, student_id) VALUES(?, ?)",
                    (&id, student_id),
                )
                .context("insert enrollment")?;
            counts.enrollments += n;
        }
        subject_ids.insert(id);
        counts.subjects += 1;
    }

    for day in &snap.attendance {
        let subject_known = subject_ids.contains(day.subject_id.as_str());
        for record in &day.records {
            let Some(status) = calc::AttendanceStatus::parse(&record.status) else {
                counts.skipped.attendance_records += 1;
                continue;
            };
            if !subject_known || !student_ids.contains(record.student_id.as_str()) {
                counts.skipped.attendance_records += 1;
                continue;
            }
            // First record wins for a duplicated (subject, student, date) triple,
            // like the front-end's find() did.
            let n = tx
                .execute(
                    "INSERT OR IGNORE INTO attendance_records(subject_id, student_id, date, status)
                     VALUES(?, ?, ?, ?)",
                    (&day.subject_id, &record.student_id, &day.date, status.as_str()),
                )
                .context("insert attendance record")?;
            counts.attendance_records += n;
        }
    }

    for sheet in &snap.grades {
        if !student_ids.contains(sheet.student_id.as_str())
            || !subject_ids.contains(sheet.subject_id.as_str())
        {
            counts.skipped.grade_sheets += 1;
            continue;
        }
        for (idx, item) in sheet.items.iter().enumerate() {
            // Degenerate values (zero totals, zero weights) are kept as stored.
            tx.execute(
                "INSERT INTO grade_items(id, subject_id, student_id, name, score, total, weight, sort_order, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))",
                (
                    &id_or_new(&item.id),
                    &sheet.subject_id,
                    &sheet.student_id,
                    &item.name,
                    item.score.unwrap_or(0.0),
                    item.total.unwrap_or(0.0),
                    item.weight.unwrap_or(0.0),
                    idx as i64,
                ),
            )
            .context("insert grade item")?;
            counts.grade_items += 1;
        }
    }

    for event in &snap.events {
        tx.execute(
            "INSERT INTO calendar_events(id, date, title, description) VALUES(?, ?, ?, ?)",
            (
                &id_or_new(&event.id),
                &event.date,
                &event.title,
                &event.description,
            ),
        )
        .context("insert calendar event")?;
        counts.events += 1;
    }

    for note in &snap.notes {
        if !student_ids.contains(note.student_id.as_str()) {
            counts.skipped.notes += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO student_notes(id, student_id, date, content) VALUES(?, ?, ?, ?)",
            (
                &id_or_new(&note.id),
                &note.student_id,
                &note.date,
                &note.content,
            ),
        )
        .context("insert note")?;
        counts.notes += 1;
    }

    for event in &snap.finance_history {
        tx.execute(
            "INSERT INTO finance_events(id, timestamp, action, details) VALUES(?, ?, ?, ?)",
            (
                &id_or_new(&event.id),
                &event.timestamp,
                &event.action,
                &event.details,
            ),
        )
        .context("insert finance event")?;
        counts.finance_events += 1;
    }

    for t in &snap.manual_transactions {
        let amount = t.amount.filter(|a| a.is_finite());
        if (t.kind != "incoming" && t.kind != "outgoing") || amount.is_none() {
            counts.skipped.manual_transactions += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO manual_transactions(id, timestamp, description, amount, kind)
             VALUES(?, ?, ?, ?, ?)",
            (
                &id_or_new(&t.id),
                &t.timestamp,
                &t.description,
                amount.unwrap_or(0.0),
                &t.kind,
            ),
        )
        .context("insert manual transaction")?;
        counts.manual_transactions += 1;
    }

    if let Some(profile) = snap.user_profile.as_ref() {
        let value = serde_json::json!({
            "name": opt_trimmed(&profile.name).unwrap_or_else(|| "Teacher".to_string()),
            "photoUrl": profile.photo_url,
        });
        db::settings_set_json(&tx, "setup.profile", &value).context("store profile")?;
    }

    tx.commit().context("commit snapshot import")?;
    Ok(counts)
}
