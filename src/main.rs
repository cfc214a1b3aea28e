mod bundle;
mod calc;
mod client;
mod config;
mod db;
mod ipc;
mod layout;
mod render;
mod sheets;

use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::level_filters::LevelFilter;

const LOG_ENV: &str = "RAPORD_LOG";

fn init_logging() {
    // stdout carries the protocol, so logs go to stderr.
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_max_level(level)
        .init();
}

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

/// Waits out a report still being generated so its file and history row
/// are complete before the process exits.
fn drain_exports(
    rx: &mpsc::Receiver<ipc::LoopEvent>,
    state: &mut ipc::AppState,
    stdout: &mut io::Stdout,
) {
    while let Some(job) = state.export_in_flight.clone() {
        tracing::info!(job = %job, "input closed; waiting for report generation to finish");
        match rx.recv() {
            Ok(ipc::LoopEvent::ExportFinished(outcome)) => {
                let line = ipc::complete_export(state, outcome);
                write_line(stdout, &line);
            }
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(job = %job, "export worker vanished before reporting back");
                return;
            }
        }
    }
}

fn main() {
    init_logging();

    let (tx, rx) = mpsc::channel::<ipc::LoopEvent>();
    let mut state = ipc::AppState::new(tx.clone());

    let reader_tx = tx;
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if reader_tx.send(ipc::LoopEvent::Line(line)).is_err() {
                return;
            }
        }
        let _ = reader_tx.send(ipc::LoopEvent::InputClosed);
    });

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rapord started");
    let mut stdout = io::stdout();
    let mut interval_ms = state.settings.refresh_interval_ms;
    let mut next_refresh = Instant::now() + Duration::from_millis(interval_ms);

    loop {
        let wait = next_refresh.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(ipc::LoopEvent::Line(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let req: ipc::Request = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("rejected malformed request: {}", e);
                        write_line(&mut stdout, &ipc::err("", "bad_json", e.to_string(), None));
                        continue;
                    }
                };
                let resp = ipc::handle_request(&mut state, req);
                write_line(&mut stdout, &resp);
                if state.settings.refresh_interval_ms != interval_ms {
                    interval_ms = state.settings.refresh_interval_ms;
                    next_refresh = Instant::now() + Duration::from_millis(interval_ms);
                }
            }
            Ok(ipc::LoopEvent::ExportFinished(outcome)) => {
                let line = ipc::complete_export(&mut state, outcome);
                write_line(&mut stdout, &line);
            }
            Ok(ipc::LoopEvent::InputClosed) => {
                drain_exports(&rx, &mut state, &mut stdout);
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                ipc::auto_refresh_tick(&mut state);
                interval_ms = state.settings.refresh_interval_ms;
                next_refresh = Instant::now() + Duration::from_millis(interval_ms);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("rapord stopped");
}
