use std::sync::Arc;

use rusqlite::Connection;
use serde_json::json;

use crate::client::SheetSource;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    /// Endpoint failures keep the whole error chain in the message.
    pub fn fetch(e: anyhow::Error) -> Self {
        Self::new("fetch_failed", format!("{:#}", e))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// A required string that must also be non-blank after trimming.
pub fn required_text(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let v = required_str(req, key)?;
    let t = v.trim();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key))
            .with_details(json!({ "field": key })));
    }
    Ok(t.to_string())
}

/// A required string kept exactly as sent. Names join records verbatim,
/// so surrounding spaces are part of the key; only a blank value is refused.
pub fn required_name(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let v = required_str(req, key)?;
    if v.trim().is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key))
            .with_details(json!({ "field": key })));
    }
    Ok(v)
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn source(state: &AppState) -> Result<Arc<dyn SheetSource>, HandlerErr> {
    state.source.clone().ok_or_else(|| {
        HandlerErr::new(
            "no_endpoint",
            "no spreadsheet endpoint configured; set settings.endpoint or RAPORD_ENDPOINT",
        )
    })
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
