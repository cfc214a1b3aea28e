use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::calc::StudentSummary;
use crate::client::{HttpSource, SheetSource};
use crate::config::Settings;
use crate::sheets::{AttendanceRow, SchoolData, SheetInfo};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The last successful merge plus what the reports need from the same
/// refresh.
#[derive(Debug, Clone, Default)]
pub struct RecapCache {
    pub summaries: Vec<StudentSummary>,
    pub subjects: Vec<String>,
    pub sheets: Vec<SheetInfo>,
    pub attendance: Vec<AttendanceRow>,
    pub school: Option<SchoolData>,
    pub last_updated: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub job_id: String,
    pub student_name: String,
    pub file_path: PathBuf,
    /// Bytes written, or the failure message.
    pub result: Result<usize, String>,
}

/// Everything the main loop waits on.
#[derive(Debug)]
pub enum LoopEvent {
    Line(String),
    InputClosed,
    ExportFinished(ExportOutcome),
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub settings: Settings,
    pub source: Option<Arc<dyn SheetSource>>,
    pub recap: RecapCache,
    /// Job id of the report generation in flight, if any.
    pub export_in_flight: Option<String>,
    pub events: Sender<LoopEvent>,
}

impl AppState {
    pub fn new(events: Sender<LoopEvent>) -> Self {
        let mut state = Self {
            workspace: None,
            db: None,
            settings: Settings::default(),
            source: None,
            recap: RecapCache::default(),
            export_in_flight: None,
            events,
        };
        state.rebuild_source();
        state
    }

    /// Points the endpoint client at the currently effective URL.
    pub fn rebuild_source(&mut self) {
        self.source = self.settings.effective_endpoint().map(|url| {
            tracing::info!(endpoint = %url, "using spreadsheet endpoint");
            Arc::new(HttpSource::new(&url, self.settings.http_timeout_ms)) as Arc<dyn SheetSource>
        });
    }
}
