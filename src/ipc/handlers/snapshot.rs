use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_snapshot_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing path", None);
    };
    let path = PathBuf::from(path);

    let raw = match std::fs::read_to_string(&path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_snapshot",
                format!("cannot read snapshot: {}", e),
                None,
            )
        }
    };
    let snap: snapshot::Snapshot = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_snapshot",
                format!("cannot parse snapshot: {}", e),
                None,
            )
        }
    };

    let counts = match snapshot::apply(conn, &snap) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_import_failed", format!("{e:?}"), None),
    };
    info!(
        path = %path.display(),
        students = counts.students,
        subjects = counts.subjects,
        "snapshot imported"
    );

    match serde_json::to_value(&counts) {
        Ok(imported) => ok(&req.id, json!({ "imported": imported })),
        Err(e) => err(&req.id, "db_import_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshot.import" => Some(handle_snapshot_import(state, req)),
        _ => None,
    }
}
