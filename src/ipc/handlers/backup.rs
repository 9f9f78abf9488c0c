use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    info!(out = %out.display(), entries = export.entry_count, "workspace bundle exported");
    ok(
        &req.id,
        json!({
            "outPath": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256
        }),
    )
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }
    if let Err(e) = std::fs::create_dir_all(&workspace_path) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": workspace_path.to_string_lossy() })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_bundle",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            info!(workspace = %workspace_path.display(), "workspace bundle imported");
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
