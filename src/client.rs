//! Access to the spreadsheet endpoint.
//!
//! `SheetSource` is the seam between the engines and the network. The
//! HTTP implementation speaks the endpoint's GET/POST conventions; tests
//! substitute an in-memory source.

use crate::calc::SubjectDataset;
use crate::layout::{ReportAux, StudentIdentity, SubjectDescriptor};
use crate::sheets::{
    CocurricularRow, ExtracurricularRow, SchoolData, ScoreSheetRow, SheetInfo, SheetTable,
    StudentRecord, COCURRICULAR_SHEET, EXTRACURRICULAR_SHEET, LEARNING_OBJECTIVES_SHEET,
    ROSTER_SHEET,
};
use anyhow::{anyhow, Context};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub trait SheetSource: Send + Sync {
    fn list_sheets(&self) -> anyhow::Result<Vec<SheetInfo>>;
    fn fetch_sheet(&self, name: &str) -> anyhow::Result<SheetTable>;
    /// Raw learning-objective detail as the endpoint returns it.
    fn lookup_tp(&self, tp: &str, mapel: &str) -> anyhow::Result<Value>;
    /// `None` when the endpoint has no school record yet.
    fn school_data(&self) -> anyhow::Result<Option<SchoolData>>;
    /// Sends an action body; the reply is returned when it parses as JSON,
    /// `Value::Null` otherwise.
    fn post(&self, body: &Value) -> anyhow::Result<Value>;
}

pub struct HttpSource {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(endpoint: &str, timeout_ms: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(timeout_ms)))
            .build();
        Self {
            endpoint: endpoint.trim().to_string(),
            agent: config.into(),
        }
    }

    fn get_json(&self, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let mut req = self.agent.get(&self.endpoint);
        for (k, v) in query {
            req = req.query(*k, *v);
        }
        let resp = req
            .call()
            .with_context(|| format!("GET {} {:?}", self.endpoint, query))?;
        let body = resp
            .into_body()
            .read_to_string()
            .context("failed to read endpoint response")?;
        serde_json::from_str(&body).context("endpoint returned invalid JSON")
    }
}

/// A POST reply counts as failed only when it parses and names an error.
fn check_post_reply(body: &str) -> anyhow::Result<Value> {
    let Ok(reply) = serde_json::from_str::<Value>(body) else {
        return Ok(Value::Null);
    };
    if let Some(e) = reply.get("error").filter(|e| !e.is_null()) {
        let msg = e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string());
        return Err(anyhow!("endpoint rejected the request: {}", msg));
    }
    Ok(reply)
}

fn school_from_reply(reply: &Value) -> Option<SchoolData> {
    if !reply.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    let first = reply.get("data")?.as_array()?.first()?;
    serde_json::from_value(first.clone()).ok()
}

impl SheetSource for HttpSource {
    fn list_sheets(&self) -> anyhow::Result<Vec<SheetInfo>> {
        let v = self.get_json(&[("action", "listSheets")])?;
        if let Some(msg) = v.get("error").and_then(|e| e.as_str()) {
            return Err(anyhow!("endpoint error: {}", msg));
        }
        serde_json::from_value(v).context("sheet list must be an array of sheet entries")
    }

    fn fetch_sheet(&self, name: &str) -> anyhow::Result<SheetTable> {
        let v = self.get_json(&[("sheet", name)])?;
        SheetTable::from_json(&v).with_context(|| format!("sheet {}", name))
    }

    fn lookup_tp(&self, tp: &str, mapel: &str) -> anyhow::Result<Value> {
        self.get_json(&[
            ("sheet", LEARNING_OBJECTIVES_SHEET),
            ("tp", tp),
            ("mapel", mapel),
        ])
    }

    fn school_data(&self) -> anyhow::Result<Option<SchoolData>> {
        let v = self.get_json(&[("action", "schoolData")])?;
        Ok(school_from_reply(&v))
    }

    fn post(&self, body: &Value) -> anyhow::Result<Value> {
        let resp = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "text/plain;charset=utf-8")
            .send(body.to_string())
            .with_context(|| format!("POST {}", self.endpoint))?;
        let text = resp.into_body().read_to_string().unwrap_or_default();
        check_post_reply(&text)
    }
}

/// Fetches every subject sheet concurrently. Any single failure fails the
/// whole gather; nothing partial is returned.
pub fn gather_subject_datasets(
    source: &dyn SheetSource,
    sheets: &[SheetInfo],
) -> anyhow::Result<Vec<SubjectDataset>> {
    sheets
        .par_iter()
        .map(|info| {
            let table = source
                .fetch_sheet(&info.sheet_name)
                .with_context(|| format!("failed to fetch subject {}", info.mapel))?;
            let rows = table.rows.iter().filter_map(ScoreSheetRow::from_raw).collect();
            Ok(SubjectDataset::new(info.mapel.clone(), rows))
        })
        .collect()
}

fn optional_sheet(source: &dyn SheetSource, name: &str) -> Option<SheetTable> {
    match source.fetch_sheet(name) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(sheet = name, "auxiliary fetch failed: {:#}", e);
            None
        }
    }
}

/// Sheets a report draws on besides the score merge, fetched once so
/// that many students can be laid out from the same snapshot. A sheet
/// that failed to load is `None` and its items fall back to placeholders.
#[derive(Debug, Clone, Default)]
pub struct ReportTables {
    pub subjects: Vec<(String, Option<SheetTable>)>,
    pub roster: Option<SheetTable>,
    pub cocurricular: Option<SheetTable>,
    pub extracurricular: Option<SheetTable>,
}

pub fn fetch_report_tables(source: &dyn SheetSource, sheets: &[SheetInfo]) -> ReportTables {
    let subjects = sheets
        .par_iter()
        .map(|info| (info.mapel.clone(), optional_sheet(source, &info.sheet_name)))
        .collect();
    ReportTables {
        subjects,
        roster: optional_sheet(source, ROSTER_SHEET),
        cocurricular: optional_sheet(source, COCURRICULAR_SHEET),
        extracurricular: optional_sheet(source, EXTRACURRICULAR_SHEET),
    }
}

impl ReportTables {
    /// Attendance and school fields are left for the caller to fill.
    pub fn aux_for(&self, student_name: &str) -> ReportAux {
        let mut descriptors = BTreeMap::new();
        for (subject, table) in &self.subjects {
            let Some(table) = table else { continue };
            let found = table
                .rows
                .iter()
                .filter_map(ScoreSheetRow::from_raw)
                .find(|r| r.student_name == student_name);
            if let Some(r) = found {
                descriptors.insert(
                    subject.clone(),
                    SubjectDescriptor {
                        min: r.desc_min,
                        max: r.desc_max,
                    },
                );
            }
        }

        let identity = self
            .roster
            .as_ref()
            .and_then(|t| StudentRecord::find(t, student_name))
            .map(|r| StudentIdentity {
                nis: r.nis,
                nisn: r.nisn,
                parent_name: r.parent_name,
            })
            .unwrap_or_default();
        let cocurricular = self
            .cocurricular
            .as_ref()
            .and_then(|t| CocurricularRow::find(t, student_name))
            .and_then(|r| r.description);
        let extracurricular = self
            .extracurricular
            .as_ref()
            .and_then(|t| ExtracurricularRow::find(t, student_name))
            .map(|r| r.activities)
            .unwrap_or_default();

        ReportAux {
            identity,
            descriptors,
            cocurricular,
            extracurricular,
            ..ReportAux::default()
        }
    }
}

/// Single-student shorthand for `fetch_report_tables` + `aux_for`.
pub fn gather_report_aux(
    source: &dyn SheetSource,
    sheets: &[SheetInfo],
    student_name: &str,
) -> ReportAux {
    fetch_report_tables(source, sheets).aux_for(student_name)
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory endpoint: sheets as raw JSON, plus a log of posted bodies.
    #[derive(Default)]
    pub struct MemorySource {
        pub sheets: Vec<SheetInfo>,
        pub tables: BTreeMap<String, Value>,
        pub school: Option<SchoolData>,
        pub posted: Mutex<Vec<Value>>,
    }

    impl MemorySource {
        pub fn with_table(mut self, name: &str, rows: Value) -> Self {
            self.tables.insert(name.to_string(), rows);
            self
        }

        pub fn with_subject(mut self, sheet: &str, mapel: &str, rows: Value) -> Self {
            self.sheets.push(SheetInfo {
                sheet_name: sheet.to_string(),
                mapel: mapel.to_string(),
                semester: "1".to_string(),
                kelas: "5".to_string(),
            });
            self.with_table(sheet, rows)
        }
    }

    impl SheetSource for MemorySource {
        fn list_sheets(&self) -> anyhow::Result<Vec<SheetInfo>> {
            Ok(self.sheets.clone())
        }

        fn fetch_sheet(&self, name: &str) -> anyhow::Result<SheetTable> {
            let v = self
                .tables
                .get(name)
                .ok_or_else(|| anyhow!("no sheet named {}", name))?;
            SheetTable::from_json(v)
        }

        fn lookup_tp(&self, tp: &str, mapel: &str) -> anyhow::Result<Value> {
            Ok(serde_json::json!({ "tp": tp, "mapel": mapel }))
        }

        fn school_data(&self) -> anyhow::Result<Option<SchoolData>> {
            Ok(self.school.clone())
        }

        fn post(&self, body: &Value) -> anyhow::Result<Value> {
            if let Ok(mut log) = self.posted.lock() {
                log.push(body.clone());
            }
            Ok(serde_json::json!({ "success": true }))
        }
    }
}
