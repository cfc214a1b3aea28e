use crate::ipc::error::ok;
use crate::ipc::helpers::{required_str, required_text, source, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sheets::{
    score_columns, BulkUpdate, LearningObjective, NewStudent, RawRow, SchoolData, SheetKind,
};
use serde_json::json;

const SHEET_BULK_UPDATE_MAX: usize = 2000;

fn handle_sheets_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let src = source(state)?;
    let sheets = src.list_sheets().map_err(HandlerErr::fetch)?;
    Ok(json!({ "sheets": sheets }))
}

fn handle_sheet_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let sheet = required_str(req, "sheet")?;
    let src = source(state)?;
    let table = src.fetch_sheet(&sheet).map_err(HandlerErr::fetch)?;
    let kind = SheetKind::from_sheet_name(&sheet);

    // `index` is the row's position among all data rows, so that hidden
    // template rows never shift the write-back target.
    let rows: Vec<serde_json::Value> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, r)| kind.keeps_row(r))
        .map(|(i, r)| json!({ "index": i, "cells": r }))
        .collect();
    let columns = match kind {
        SheetKind::Scores => Some(score_columns(&table.header)),
        _ => None,
    };
    Ok(json!({
        "sheet": sheet,
        "kind": kind.as_str(),
        "header": table.header,
        "rows": rows,
        "columns": columns,
    }))
}

fn entry_error(i: usize, index: Option<u64>, code: &str, message: String) -> serde_json::Value {
    json!({
        "entry": i,
        "index": index,
        "code": code,
        "message": message,
    })
}

fn parse_update(
    kind: SheetKind,
    i: usize,
    entry: &serde_json::Value,
) -> Result<BulkUpdate, serde_json::Value> {
    let Some(obj) = entry.as_object() else {
        return Err(entry_error(
            i,
            None,
            "bad_params",
            format!("update at entry {} must be an object", i),
        ));
    };
    let index = match obj.get("index").and_then(|v| v.as_u64()) {
        Some(v) => v,
        None => {
            return Err(entry_error(
                i,
                None,
                "bad_params",
                format!("update at entry {} missing/invalid index", i),
            ))
        }
    };
    if let Some(values) = obj.get("values") {
        let Some(arr) = values.as_array() else {
            return Err(entry_error(
                i,
                Some(index),
                "bad_params",
                "values must be an array".to_string(),
            ));
        };
        let mut out = Vec::with_capacity(arr.len());
        for v in arr {
            match v {
                serde_json::Value::String(s) => out.push(s.clone()),
                serde_json::Value::Number(n) => out.push(n.to_string()),
                serde_json::Value::Null => out.push(String::new()),
                _ => {
                    return Err(entry_error(
                        i,
                        Some(index),
                        "bad_params",
                        "values must be strings or numbers".to_string(),
                    ))
                }
            }
        }
        return Ok(BulkUpdate::new(kind, index as usize, out));
    }
    if let Some(cells) = obj.get("cells").and_then(|v| v.as_object()) {
        let row: RawRow = cells
            .iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k.clone(), s.clone())),
                serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
                _ => None,
            })
            .collect();
        return Ok(BulkUpdate::from_row(kind, index as usize, &row));
    }
    Err(entry_error(
        i,
        Some(index),
        "bad_params",
        format!("update at entry {} needs values[] or cells{{}}", i),
    ))
}

fn handle_sheet_update_bulk(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let sheet = required_str(req, "sheet")?;
    let Some(entries) = req.params.get("updates").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing updates[]"));
    };
    if entries.len() > SHEET_BULK_UPDATE_MAX {
        let rejected = entries.len();
        return Ok(json!({
            "updated": 0,
            "rejected": rejected,
            "limitExceeded": true,
            "errors": [{
                "entry": -1,
                "index": null,
                "code": "too_many_updates",
                "message": format!(
                    "bulk payload exceeds max updates: {} > {}",
                    rejected, SHEET_BULK_UPDATE_MAX
                )
            }]
        }));
    }
    let src = source(state)?;
    let kind = SheetKind::from_sheet_name(&sheet);

    let mut updates = Vec::new();
    let mut errors = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        match parse_update(kind, i, entry) {
            Ok(u) => updates.push(u),
            Err(e) => errors.push(e),
        }
    }

    if !updates.is_empty() {
        let body = json!({
            "action": "update_bulk",
            "sheetName": sheet,
            "updates": updates,
        });
        src.post(&body).map_err(HandlerErr::fetch)?;
        tracing::info!(sheet = %sheet, rows = updates.len(), "sheet rows written");
    }

    let mut result = json!({ "updated": updates.len() });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    Ok(result)
}

fn handle_tp_lookup(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let tp = required_text(req, "tp")?;
    let mapel = required_text(req, "mapel")?;
    let src = source(state)?;
    let detail = src.lookup_tp(&tp, &mapel).map_err(HandlerErr::fetch)?;
    Ok(json!({ "tp": tp, "mapel": mapel, "detail": detail }))
}

fn handle_tp_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let raw = req.params.get("data").cloned().unwrap_or(json!({}));
    let objective: LearningObjective = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::bad_params(format!("invalid data: {}", e)))?;
    let missing = objective.missing_required();
    if !missing.is_empty() {
        return Err(HandlerErr::bad_params("all learning objective fields are required")
            .with_details(json!({ "missing": missing })));
    }
    let src = source(state)?;
    src.post(&json!({ "action": "add_tp", "data": objective }))
        .map_err(HandlerErr::fetch)?;
    Ok(json!({ "added": objective }))
}

fn handle_mapel_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let mapel = required_text(req, "mapel")?.to_uppercase();
    let src = source(state)?;
    src.post(&json!({ "action": "add_mapel", "mapel": mapel }))
        .map_err(HandlerErr::fetch)?;
    Ok(json!({ "mapel": mapel }))
}

fn handle_students_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let raw = req.params.get("data").cloned().unwrap_or(json!({}));
    let student: NewStudent = serde_json::from_value(raw)
        .map(|s: NewStudent| s.trimmed())
        .map_err(|e| HandlerErr::bad_params(format!("invalid data: {}", e)))?;
    let mut missing = Vec::new();
    if student.nama.is_empty() {
        missing.push("nama");
    }
    if student.kelas.is_empty() {
        missing.push("kelas");
    }
    if !missing.is_empty() {
        return Err(HandlerErr::bad_params("student name and class are required")
            .with_details(json!({ "missing": missing })));
    }
    let src = source(state)?;
    src.post(&json!({ "action": "add_siswa", "data": student }))
        .map_err(HandlerErr::fetch)?;
    Ok(json!({ "added": student }))
}

fn handle_school_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let src = source(state)?;
    let school = src.school_data().map_err(HandlerErr::fetch)?;
    if school.is_some() {
        state.recap.school = school.clone();
    }
    Ok(json!({ "school": school }))
}

fn handle_school_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let raw = req.params.get("school").cloned().unwrap_or(json!({}));
    let school: SchoolData = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::bad_params(format!("invalid school: {}", e)))?;
    let missing = school.missing_required();
    if !missing.is_empty() {
        return Err(HandlerErr::bad_params("required school fields are empty")
            .with_details(json!({ "missing": missing })));
    }
    let src = source(state)?;
    let mut body = serde_json::to_value(&school)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    body["action"] = json!("schoolData");
    src.post(&body).map_err(HandlerErr::fetch)?;
    state.recap.school = Some(school.clone());
    Ok(json!({ "school": school }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sheets.list" => handle_sheets_list(state, req),
        "sheet.open" => handle_sheet_open(state, req),
        "sheet.updateBulk" => handle_sheet_update_bulk(state, req),
        "tp.lookup" => handle_tp_lookup(state, req),
        "tp.add" => handle_tp_add(state, req),
        "mapel.add" => handle_mapel_add(state, req),
        "students.add" => handle_students_add(state, req),
        "school.get" => handle_school_get(state, req),
        "school.update" => handle_school_update(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
