use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn required_path(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_path(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:?}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match required_path(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Drop the live connection before swapping the database file out, then
    // reopen against the imported copy.
    state.db = None;
    let import_result = backup::import_workspace_bundle(&in_path, &workspace);
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
    match import_result {
        Ok(summary) => ok(
            &req.id,
            json!({ "bundleFormatDetected": summary.bundle_format_detected }),
        ),
        Err(e) => err(&req.id, "backup_import_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
