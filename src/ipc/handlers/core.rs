use crate::config::{Settings, ENDPOINT_ENV};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, RecapCache, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "endpointConfigured": state.source.is_some(),
            "exportInFlight": state.export_in_flight.is_some(),
        }),
    )
}

fn load_settings(conn: &rusqlite::Connection) -> Settings {
    match db::settings_get_json(conn, db::SETTINGS_KEY) {
        Ok(Some(v)) => match serde_json::from_value::<Settings>(v) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("stored settings unreadable, using defaults: {}", e);
                Settings::default()
            }
        },
        Ok(None) => Settings::default(),
        Err(e) => {
            tracing::warn!("failed to read settings, using defaults: {:#}", e);
            Settings::default()
        }
    }
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            // Exports left running belong to a previous process.
            match db::export_fail_stale(&conn, &now_rfc3339()) {
                Ok(n) if n > 0 => tracing::warn!(count = n, "marked interrupted exports as failed"),
                Ok(_) => {}
                Err(e) => tracing::warn!("failed to recover stale exports: {:#}", e),
            }
            state.settings = load_settings(&conn);
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.recap = RecapCache::default();
            state.rebuild_source();
            tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "settings": state.settings,
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn settings_view(state: &AppState) -> serde_json::Value {
    json!({
        "settings": state.settings,
        "effectiveEndpoint": state.settings.effective_endpoint(),
        "endpointFromEnv": std::env::var(ENDPOINT_ENV)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false),
    })
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, settings_view(state))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let next = match state.settings.apply_patch(&req.params) {
        Ok(s) => s,
        Err(e) => {
            return HandlerErr::bad_params(format!("{}: {}", e.field, e.message))
                .with_details(json!({ "field": e.field }))
                .response(&req.id)
        }
    };
    if let Some(conn) = state.db.as_ref() {
        let value = match serde_json::to_value(&next) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        };
        if let Err(e) = db::settings_set_json(conn, db::SETTINGS_KEY, &value) {
            return err(&req.id, "db_query_failed", format!("{e:#}"), None);
        }
    }
    let endpoint_changed = next.endpoint != state.settings.endpoint
        || next.http_timeout_ms != state.settings.http_timeout_ms;
    state.settings = next;
    if endpoint_changed {
        state.recap = RecapCache::default();
        state.rebuild_source();
    }
    ok(&req.id, settings_view(state))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
