#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    /// Event lines seen while waiting for responses.
    pub events: Vec<Value>,
}

pub fn spawn_sidecar(endpoint: Option<&str>) -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_rapord");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("RAPORD_ENDPOINT");
    if let Some(url) = endpoint {
        cmd.env("RAPORD_ENDPOINT", url);
    }
    let mut child = cmd.spawn().expect("spawn rapord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        events: Vec::new(),
    }
}

impl Sidecar {
    fn read_value(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read line");
        assert!(!line.trim().is_empty(), "sidecar closed stdout");
        serde_json::from_str(line.trim()).expect("parse line json")
    }

    pub fn send_raw(&mut self, text: &str) -> Value {
        writeln!(self.stdin, "{}", text).expect("write raw");
        self.stdin.flush().expect("flush raw");
        loop {
            let v = self.read_value();
            if v.get("event").is_some() {
                self.events.push(v);
                continue;
            }
            return v;
        }
    }

    pub fn request(&mut self, id: &str, method: &str, params: Value) -> Value {
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        loop {
            let v = self.read_value();
            if v.get("event").is_some() {
                self.events.push(v);
                continue;
            }
            assert_eq!(v.get("id").and_then(|x| x.as_str()), Some(id));
            return v;
        }
    }

    /// Request that must succeed; returns `result`.
    pub fn call_ok(&mut self, id: &str, method: &str, params: Value) -> Value {
        let v = self.request(id, method, params);
        assert_eq!(v["ok"], json!(true), "{} failed: {}", method, v);
        v["result"].clone()
    }

    /// Request that must fail; returns the error code.
    pub fn call_err(&mut self, id: &str, method: &str, params: Value) -> String {
        let v = self.request(id, method, params);
        assert_eq!(v["ok"], json!(false), "{} unexpectedly succeeded: {}", method, v);
        v["error"]["code"].as_str().unwrap_or("").to_string()
    }

    pub fn wait_event(&mut self, name: &str) -> Value {
        if let Some(pos) = self.events.iter().position(|e| e["event"] == json!(name)) {
            return self.events.remove(pos);
        }
        loop {
            let v = self.read_value();
            if v["event"] == json!(name) {
                return v;
            }
            if v.get("event").is_some() {
                self.events.push(v);
            }
        }
    }

    /// Closes stdin, then collects every line written until the process
    /// exits. Returns those lines (events seen earlier included) and the
    /// exit status.
    pub fn close_input(self) -> (Vec<Value>, std::process::ExitStatus) {
        let Sidecar {
            mut child,
            stdin,
            mut reader,
            mut events,
        } = self;
        drop(stdin);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).expect("read line");
            if n == 0 {
                break;
            }
            if !line.trim().is_empty() {
                events.push(serde_json::from_str(line.trim()).expect("parse line json"));
            }
        }
        let status = child.wait().expect("wait for rapord");
        (events, status)
    }

    pub fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

#[derive(Default)]
pub struct FakeState {
    pub sheets: Value,
    pub tables: HashMap<String, Value>,
    pub school: Value,
    pub failing: HashSet<String>,
    pub posts: Vec<Value>,
    pub post_reply: Option<String>,
    /// Applied to every GET before answering.
    pub get_delay_ms: u64,
}

/// Minimal spreadsheet endpoint on a local port. Each connection serves
/// one request and closes.
pub struct FakeEndpoint {
    pub url: String,
    pub state: Arc<Mutex<FakeState>>,
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    Err(_) => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

fn parse_query(target: &str) -> HashMap<String, String> {
    let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let (k, v) = p.split_once('=').unwrap_or((p, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect()
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let resp = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(resp.as_bytes());
    let _ = stream.flush();
}

fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    Some((method, target, body))
}

fn serve(mut stream: TcpStream, state: &Arc<Mutex<FakeState>>) {
    let Some((method, target, body)) = read_request(&mut stream) else {
        return;
    };
    let mut st = state.lock().expect("fake state");
    if method == "POST" {
        let parsed = serde_json::from_str(&body).unwrap_or(Value::String(body));
        st.posts.push(parsed);
        let reply = st
            .post_reply
            .clone()
            .unwrap_or_else(|| r#"{"success":true}"#.to_string());
        drop(st);
        respond(&mut stream, "200 OK", &reply);
        return;
    }
    let delay = st.get_delay_ms;
    if delay > 0 {
        drop(st);
        std::thread::sleep(std::time::Duration::from_millis(delay));
        st = state.lock().expect("fake state");
    }
    let q = parse_query(&target);
    let key = match (q.get("action"), q.get("sheet")) {
        (Some(a), _) => a.clone(),
        (None, Some(s)) => s.clone(),
        _ => String::new(),
    };
    if st.failing.contains(&key) {
        drop(st);
        respond(&mut stream, "500 Internal Server Error", r#"{"error":"boom"}"#);
        return;
    }
    let body = match key.as_str() {
        "listSheets" => Some(st.sheets.clone()),
        "schoolData" => Some(st.school.clone()),
        "DataTP" if q.contains_key("tp") => Some(json!({
            "tp": q.get("tp"),
            "mapel": q.get("mapel"),
            "rincian": "Rincian dari server"
        })),
        other => st.tables.get(other).cloned(),
    };
    drop(st);
    match body {
        Some(v) => respond(&mut stream, "200 OK", &v.to_string()),
        None => respond(&mut stream, "404 Not Found", r#"{"error":"no such sheet"}"#),
    }
}

impl FakeEndpoint {
    pub fn start(initial: FakeState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake endpoint");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(Mutex::new(initial));
        let shared = state.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let st = shared.clone();
                std::thread::spawn(move || serve(stream, &st));
            }
        });
        Self {
            url: format!("http://127.0.0.1:{}/exec", port),
            state,
        }
    }

    pub fn posts(&self) -> Vec<Value> {
        self.state.lock().expect("fake state").posts.clone()
    }

    pub fn set_get_delay(&self, ms: u64) {
        self.state.lock().expect("fake state").get_delay_ms = ms;
    }

    pub fn set_failing(&self, key: &str, failing: bool) {
        let mut st = self.state.lock().expect("fake state");
        if failing {
            st.failing.insert(key.to_string());
        } else {
            st.failing.remove(key);
        }
    }
}

pub fn score_sheet(rows: &[(&str, &str, &str)]) -> Value {
    let mut out = vec![json!({
        "Data1": "No", "Data2": "NIS", "Data3": "Kelas", "Data4": "Nama",
        "Data5": "TP1", "Data6": "-", "Data24": "Nilai Akhir",
        "Data26": "Deskripsi Min", "Data27": "Deskripsi Max"
    })];
    for (class, name, score) in rows {
        out.push(json!({
            "Data3": class,
            "Data4": name,
            "Data24": score,
            "Data26": format!("{} perlu bimbingan", name),
            "Data27": format!("{} sangat baik", name),
        }));
    }
    Value::Array(out)
}

/// Two subjects; Ana and Budi tie on 15, Cita has one blank score.
/// MTK_5 carries a blank template row between Budi and Cita.
pub fn school_fixture() -> FakeState {
    let mut tables = HashMap::new();
    tables.insert(
        "MTK_5".to_string(),
        score_sheet(&[("5A", "Ana", "8"), ("5A", "Budi", "7"), ("", "", ""), ("5A", "Cita", "9")]),
    );
    tables.insert(
        "IPA_5".to_string(),
        score_sheet(&[("5A", "Ana", "7"), ("5A", "Budi", "8"), ("5A", "Cita", "")]),
    );
    tables.insert(
        "DataKehadiran".to_string(),
        json!([
            { "Data1": "Nama", "Data5": "Alpha", "Data6": "Izin", "Data7": "Sakit" },
            { "Data1": "Ana", "Data5": "1", "Data6": "2", "Data7": "3" }
        ]),
    );
    tables.insert(
        "DataSiswa".to_string(),
        json!([
            { "Data1": "Nama", "Data2": "Kelas", "Data3": "NIS", "Data4": "NISN", "Data5": "Orang Tua" },
            { "Data1": "Ana", "Data2": "5A", "Data3": "1001", "Data4": "0099", "Data5": "Sri" }
        ]),
    );
    tables.insert(
        "DataEkstrakurikuler".to_string(),
        json!([
            { "Data1": "Nama" },
            { "Data1": "Ana", "Data2": "Pramuka", "Data3": "Sangat aktif" }
        ]),
    );
    tables.insert(
        "DataKokurikuler".to_string(),
        json!([
            { "Data1": "Nama", "Data10": "Deskripsi" },
            { "Data1": "Ana", "Data10": "Aktif dalam proyek kebersihan." }
        ]),
    );
    FakeState {
        sheets: json!([
            { "sheetName": "MTK_5", "mapel": "Matematika", "semester": "1", "kelas": "5" },
            { "sheetName": "IPA_5", "mapel": "IPA", "semester": "1", "kelas": "5" }
        ]),
        tables,
        school: json!({
            "success": true,
            "data": [{
                "namaSekolah": "SD Negeri 7",
                "alamatSekolah": "Jl. Pendidikan 3",
                "kabKota": "Bireuen",
                "tahunPelajaran": "2025/2026",
                "tanggalRapor": "20 Juni 2026",
                "namaKepsek": "Drs. Hasan",
                "nipKepsek": "1970",
                "namaGuru": "Rina",
                "nipGuru": "1988"
            }]
        }),
        ..FakeState::default()
    }
}
