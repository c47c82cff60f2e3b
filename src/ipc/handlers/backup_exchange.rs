use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;

use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => {
            info!("exported workspace bundle to {}", out_path.to_string_lossy());
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "dbSha256": summary.db_sha256,
                    "outPath": out_path.to_string_lossy(),
                }),
            )
        }
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    // The live connection holds the database file; drop it for the swap and
    // reopen whatever ends up on disk afterwards.
    state.db = None;
    state.student_cache.clear();
    let import_result = backup::import_workspace_bundle(&in_path, &workspace);

    let reopened = match db::open_db(&workspace) {
        Ok(conn) => {
            state.db = Some(conn);
            true
        }
        Err(e) => {
            warn!("failed to reopen workspace after import: {e:?}");
            false
        }
    };

    match import_result {
        Ok(summary) => {
            if !reopened {
                return err(
                    &req.id,
                    "db_open_failed",
                    "bundle imported but the workspace could not be reopened",
                    None,
                );
            }
            info!("imported workspace bundle from {}", in_path.to_string_lossy());
            ok(
                &req.id,
                json!({ "bundleFormatDetected": summary.bundle_format_detected }),
            )
        }
        Err(e) => err(&req.id, "backup_import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
