use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

pub const DB_FILE: &str = "rapor.sqlite3";
pub const SETTINGS_KEY: &str = "app.settings";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_exports(
            id TEXT PRIMARY KEY,
            student_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_exports_started ON report_exports(started_at)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Running,
    Done,
    Failed,
}

impl ExportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportStatus::Running => "running",
            ExportStatus::Done => "done",
            ExportStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub id: String,
    pub student_name: String,
    pub file_path: String,
    pub status: String,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

fn export_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExportRecord> {
    Ok(ExportRecord {
        id: r.get(0)?,
        student_name: r.get(1)?,
        file_path: r.get(2)?,
        status: r.get(3)?,
        error: r.get(4)?,
        started_at: r.get(5)?,
        finished_at: r.get(6)?,
    })
}

pub fn export_insert(
    conn: &Connection,
    id: &str,
    student_name: &str,
    file_path: &str,
    started_at: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO report_exports(id, student_name, file_path, status, started_at)
         VALUES(?, ?, ?, ?, ?)",
        params![id, student_name, file_path, ExportStatus::Running.as_str(), started_at],
    )?;
    Ok(())
}

pub fn export_finish(
    conn: &Connection,
    id: &str,
    status: ExportStatus,
    error: Option<&str>,
    finished_at: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE report_exports SET status = ?, error = ?, finished_at = ? WHERE id = ?",
        params![status.as_str(), error, finished_at, id],
    )?;
    Ok(())
}

pub fn export_get(conn: &Connection, id: &str) -> anyhow::Result<Option<ExportRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, student_name, file_path, status, error, started_at, finished_at
             FROM report_exports WHERE id = ?",
            [id],
            export_from_row,
        )
        .optional()?)
}

/// Most recent first.
pub fn export_history(conn: &Connection, limit: usize) -> anyhow::Result<Vec<ExportRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_name, file_path, status, error, started_at, finished_at
         FROM report_exports ORDER BY started_at DESC, rowid DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], export_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Exports still marked running belong to a previous process that never
/// reported back.
pub fn export_fail_stale(conn: &Connection, finished_at: &str) -> anyhow::Result<usize> {
    let n = conn.execute(
        "UPDATE report_exports SET status = ?, error = ?, finished_at = ? WHERE status = ?",
        params![
            ExportStatus::Failed.as_str(),
            "interrupted before completion",
            finished_at,
            ExportStatus::Running.as_str()
        ],
    )?;
    Ok(n)
}
