use crate::bundle::{verify_bundle, write_report_bundle, BundleFile};
use crate::calc::StudentSummary;
use crate::client::{fetch_report_tables, gather_report_aux, ReportTables};
use crate::config::Settings;
use crate::db::{self, ExportStatus};
use crate::ipc::error::{event, ok};
use crate::ipc::handlers::recap::refresh_recap;
use crate::ipc::helpers::{db_conn, now_rfc3339, required_name, required_str, source, HandlerErr};
use crate::ipc::types::{AppState, ExportOutcome, LoopEvent, Request};
use crate::layout::{layout, report_file_name, AttendanceCounts, SchoolInfo, Signer};
use crate::render::render_pdf;
use crate::sheets::{AttendanceRow, SchoolData};
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};

const HISTORY_DEFAULT_LIMIT: usize = 50;
const HISTORY_MAX_LIMIT: usize = 500;

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn or_fallback(value: Option<&str>, fallback: &str) -> String {
    value
        .and_then(non_blank)
        .unwrap_or_else(|| fallback.to_string())
}

/// School block for the report: endpoint values first, settings fallbacks
/// where the endpoint is silent.
pub fn school_info(school: Option<&SchoolData>, settings: &Settings) -> SchoolInfo {
    let fb = &settings.fallback_school;
    let address_parts = [
        or_fallback(school.map(|s| s.alamat_sekolah.as_str()), &fb.address),
        school.and_then(|s| non_blank(&s.kab_kota)).unwrap_or_default(),
    ];
    let address = address_parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    let place = school
        .and_then(|s| non_blank(&s.desa_kelurahan).or_else(|| non_blank(&s.kab_kota)))
        .unwrap_or_else(|| fb.place.trim().to_string());
    let signer = |name: Option<&str>, id: Option<&str>, sig: Option<&str>| Signer {
        name: name.and_then(non_blank),
        id_number: id.and_then(non_blank),
        signature: sig.and_then(non_blank),
    };
    SchoolInfo {
        name: or_fallback(school.map(|s| s.nama_sekolah.as_str()), &fb.name),
        address,
        year: or_fallback(school.map(|s| s.tahun_pelajaran.as_str()), &fb.year),
        report_date: or_fallback(school.map(|s| s.tanggal_rapor.as_str()), &fb.report_date),
        place,
        semester: settings.semester.clone(),
        phase: settings.phase.clone(),
        headmaster: signer(
            school.map(|s| s.nama_kepsek.as_str()),
            school.map(|s| s.nip_kepsek.as_str()),
            school.map(|s| s.ttd_kepsek.as_str()),
        ),
        homeroom: signer(
            school.map(|s| s.nama_guru.as_str()),
            school.map(|s| s.nip_guru.as_str()),
            school.map(|s| s.ttd_guru.as_str()),
        ),
    }
}

fn attendance_for(rows: &[AttendanceRow], student_name: &str) -> AttendanceCounts {
    rows.iter()
        .find(|r| r.name == student_name)
        .map(|r| AttendanceCounts {
            sick: r.sick,
            permitted: r.permitted,
            unexcused: r.unexcused,
        })
        .unwrap_or_default()
}

/// Everything one report needs from the loop thread's state, owned so it
/// can move to a worker.
#[derive(Clone)]
struct ReportInput {
    summary: StudentSummary,
    subjects: Vec<String>,
    attendance: AttendanceCounts,
    school: SchoolInfo,
}

impl ReportInput {
    fn build(&self, tables: &ReportTables) -> anyhow::Result<Vec<u8>> {
        let mut aux = tables.aux_for(&self.summary.name);
        aux.attendance = self.attendance;
        aux.school = self.school.clone();
        let pages = layout(&self.summary, &self.subjects, &aux);
        render_pdf(&pages)
    }
}

fn ensure_recap(state: &mut AppState) -> Result<(), HandlerErr> {
    if state.recap.summaries.is_empty() {
        refresh_recap(state, true)?;
    }
    Ok(())
}

fn report_input(state: &AppState, student_name: &str) -> Result<ReportInput, HandlerErr> {
    let Some(summary) = state
        .recap
        .summaries
        .iter()
        .find(|s| s.name == student_name)
    else {
        return Err(HandlerErr::new("not_found", "student not in recap")
            .with_details(json!({ "studentName": student_name })));
    };
    Ok(ReportInput {
        summary: summary.clone(),
        subjects: state.recap.subjects.clone(),
        attendance: attendance_for(&state.recap.attendance, student_name),
        school: school_info(state.recap.school.as_ref(), &state.settings),
    })
}

fn reports_dir(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    if let Some(dir) = req.params.get("outDir").and_then(|v| v.as_str()) {
        return Ok(PathBuf::from(dir));
    }
    let configured = PathBuf::from(&state.settings.reports_dir);
    if configured.is_absolute() {
        return Ok(configured);
    }
    let Some(ws) = state.workspace.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    Ok(ws.join(configured))
}

fn write_report(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))
}

fn handle_reports_layout(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_name = required_name(req, "studentName")?;
    let src = source(state)?;
    ensure_recap(state)?;
    let input = report_input(state, &student_name)?;
    let mut aux = gather_report_aux(src.as_ref(), &state.recap.sheets, &student_name);
    aux.attendance = input.attendance;
    aux.school = input.school;
    let pages = layout(&input.summary, &input.subjects, &aux);
    Ok(json!({
        "fileName": report_file_name(&student_name),
        "pageCount": pages.len(),
        "pages": pages,
    }))
}

fn handle_reports_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_name = required_name(req, "studentName")?;
    db_conn(state)?;
    let src = source(state)?;
    if let Some(job) = state.export_in_flight.as_ref() {
        return Err(HandlerErr::new("busy", "a report is already being generated")
            .with_details(json!({ "jobId": job })));
    }
    ensure_recap(state)?;
    let input = report_input(state, &student_name)?;
    let file_name = report_file_name(&student_name);
    let file_path = reports_dir(state, req)?.join(&file_name);

    let job_id = uuid::Uuid::new_v4().to_string();
    db::export_insert(
        db_conn(state)?,
        &job_id,
        &student_name,
        &file_path.to_string_lossy(),
        &now_rfc3339(),
    )
    .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    state.export_in_flight = Some(job_id.clone());

    let sheets = state.recap.sheets.clone();
    let events = state.events.clone();
    let outcome_path = file_path.clone();
    let worker_job = job_id.clone();
    std::thread::spawn(move || {
        let result = fetch_and_write(src.as_ref(), &sheets, &input, &outcome_path)
            .map_err(|e| format!("failed to generate report for {}: {:#}", input.summary.name, e));
        let outcome = ExportOutcome {
            job_id: worker_job,
            student_name: input.summary.name.clone(),
            file_path: outcome_path,
            result,
        };
        if events.send(LoopEvent::ExportFinished(outcome)).is_err() {
            tracing::warn!("export finished after the main loop stopped");
        }
    });
    tracing::info!(job = %job_id, student = %student_name, "report generation started");

    Ok(json!({
        "jobId": job_id,
        "fileName": file_name,
        "filePath": file_path.to_string_lossy(),
    }))
}

fn fetch_and_write(
    src: &dyn crate::client::SheetSource,
    sheets: &[crate::sheets::SheetInfo],
    input: &ReportInput,
    path: &Path,
) -> anyhow::Result<usize> {
    let tables = fetch_report_tables(src, sheets);
    let bytes = input.build(&tables)?;
    write_report(path, &bytes)?;
    Ok(bytes.len())
}

/// Records a worker's result and returns the event line for the UI.
pub fn complete_export(state: &mut AppState, outcome: ExportOutcome) -> serde_json::Value {
    if state.export_in_flight.as_deref() == Some(outcome.job_id.as_str()) {
        state.export_in_flight = None;
    }
    let (status, error) = match &outcome.result {
        Ok(_) => (ExportStatus::Done, None),
        Err(msg) => (ExportStatus::Failed, Some(msg.as_str())),
    };
    match &outcome.result {
        Ok(bytes) => tracing::info!(job = %outcome.job_id, bytes, "report written"),
        Err(msg) => tracing::error!(job = %outcome.job_id, "{}", msg),
    }
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = db::export_finish(conn, &outcome.job_id, status, error, &now_rfc3339()) {
            tracing::warn!("failed to record export result: {:#}", e);
        }
    }
    event(
        "reports.exportFinished",
        json!({
            "jobId": outcome.job_id,
            "studentName": outcome.student_name,
            "filePath": outcome.file_path.to_string_lossy(),
            "ok": outcome.result.is_ok(),
            "bytes": outcome.result.as_ref().ok(),
            "error": outcome.result.as_ref().err(),
        }),
    )
}

fn handle_reports_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let job_id = required_str(req, "jobId")?;
    let conn = db_conn(state)?;
    let record = db::export_get(conn, &job_id)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "export job not found")
                .with_details(json!({ "jobId": job_id }))
        })?;
    Ok(json!({
        "job": record,
        "inFlight": state.export_in_flight.as_deref() == Some(job_id.as_str()),
    }))
}

fn handle_reports_history(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| (v as usize).clamp(1, HISTORY_MAX_LIMIT))
        .unwrap_or(HISTORY_DEFAULT_LIMIT);
    let conn = db_conn(state)?;
    let exports = db::export_history(conn, limit)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    Ok(json!({
        "exports": exports,
        "generating": state.export_in_flight.is_some(),
    }))
}

/// Every student in the recap, rendered on the loop thread into one zip.
/// A student whose report fails is listed and skipped.
fn handle_reports_export_bundle(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let src = source(state)?;
    ensure_recap(state)?;

    let tables = fetch_report_tables(src.as_ref(), &state.recap.sheets);
    let mut files = Vec::new();
    let mut failed = Vec::new();
    for summary in &state.recap.summaries {
        let input = report_input(state, &summary.name)?;
        match input.build(&tables) {
            Ok(pdf) => files.push(BundleFile {
                student_name: summary.name.clone(),
                file_name: report_file_name(&summary.name),
                pdf,
            }),
            Err(e) => {
                let message = format!("failed to generate report for {}: {:#}", summary.name, e);
                tracing::warn!("{}", message);
                failed.push(json!({ "studentName": summary.name, "message": message }));
            }
        }
    }

    write_report_bundle(&out_path, &files)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    // Hashes are checked against the written archive before reporting.
    let manifest = verify_bundle(&out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    tracing::info!(files = manifest.files.len(), path = %out_path.to_string_lossy(), "report bundle written");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "format": manifest.format,
        "files": manifest.files,
        "failed": failed,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.layout" => handle_reports_layout(state, req),
        "reports.export" => handle_reports_export(state, req),
        "reports.status" => handle_reports_status(state, req),
        "reports.history" => handle_reports_history(state, req),
        "reports.exportBundle" => handle_reports_export_bundle(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
