use crate::calc::{aggregate, recap_csv, subject_columns};
use crate::client::gather_subject_datasets;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{now_rfc3339, required_str, source, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sheets::{AttendanceRow, ATTENDANCE_SHEET};
use serde_json::json;

/// Re-fetches everything and replaces the cached recap. School data and
/// attendance are optional: a failure there keeps the previous values.
/// The sheet list and every subject sheet are required; if any of them
/// fails the whole previous recap stays, attendance and school included,
/// and the error is remembered.
pub fn refresh_recap(state: &mut AppState, silent: bool) -> Result<serde_json::Value, HandlerErr> {
    let src = source(state)?;

    let school = match src.school_data() {
        Ok(school) => school,
        Err(e) => {
            tracing::warn!("school data unavailable: {:#}", e);
            None
        }
    };
    let attendance = match src.fetch_sheet(ATTENDANCE_SHEET) {
        Ok(table) => Some(AttendanceRow::all(&table)),
        Err(e) => {
            tracing::warn!("attendance unavailable: {:#}", e);
            None
        }
    };

    let fetched = src
        .list_sheets()
        .and_then(|sheets| gather_subject_datasets(src.as_ref(), &sheets).map(|d| (sheets, d)));
    let (sheets, datasets) = match fetched {
        Ok(v) => v,
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::warn!("recap refresh failed: {}", message);
            state.recap.last_error = Some(message.clone());
            return Err(HandlerErr::new("fetch_failed", message));
        }
    };

    let summaries = aggregate(&datasets);
    let subjects = subject_columns(sheets.iter().map(|s| s.mapel.as_str()));
    let updated_at = now_rfc3339();
    if silent {
        tracing::debug!(students = summaries.len(), "recap refreshed");
    } else {
        tracing::info!(
            students = summaries.len(),
            subjects = subjects.len(),
            "recap refreshed"
        );
    }

    let recap = &mut state.recap;
    if let Some(school) = school {
        recap.school = Some(school);
    }
    if let Some(attendance) = attendance {
        recap.attendance = attendance;
    }
    recap.summaries = summaries;
    recap.subjects = subjects;
    recap.sheets = sheets;
    recap.last_updated = Some(updated_at);
    recap.last_error = None;

    Ok(json!({
        "count": recap.summaries.len(),
        "subjects": recap.subjects,
        "lastUpdated": recap.last_updated,
    }))
}

/// Periodic refresh driven by the main loop. Failures are only logged;
/// they are visible to the UI through `recap.list`'s `lastError`.
pub fn auto_refresh_tick(state: &mut AppState) {
    if !state.settings.auto_refresh || state.source.is_none() {
        return;
    }
    if let Err(e) = refresh_recap(state, true) {
        tracing::debug!(code = e.code, "auto refresh failed: {}", e.message);
    }
}

fn handle_recap_refresh(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let silent = req
        .params
        .get("silent")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    refresh_recap(state, silent)
}

fn handle_recap_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let recap = &state.recap;
    Ok(json!({
        "summaries": recap.summaries,
        "subjects": recap.subjects,
        "attendance": recap.attendance,
        "empty": recap.summaries.is_empty(),
        "lastUpdated": recap.last_updated,
        "lastError": recap.last_error,
        "autoRefresh": state.settings.auto_refresh,
    }))
}

fn handle_recap_auto_refresh(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(enabled) = req.params.get("enabled").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing enabled"));
    };
    state.settings.auto_refresh = enabled;
    if let Some(conn) = state.db.as_ref() {
        let value = serde_json::to_value(&state.settings)
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
        db::settings_set_json(conn, db::SETTINGS_KEY, &value)
            .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    }
    Ok(json!({
        "autoRefresh": enabled,
        "intervalMs": state.settings.refresh_interval_ms,
    }))
}

fn handle_recap_export_csv(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let out_path = std::path::PathBuf::from(required_str(req, "outPath")?);
    let csv = recap_csv(&state.recap.summaries, &state.recap.subjects);
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    }
    std::fs::write(&out_path, csv.as_bytes())
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rows": state.recap.summaries.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "recap.refresh" => handle_recap_refresh(state, req),
        "recap.list" => handle_recap_list(state, req),
        "recap.autoRefresh" => handle_recap_auto_refresh(state, req),
        "recap.exportCsv" => handle_recap_export_csv(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
