//! Typed views over the spreadsheet endpoint's row format.
//!
//! Every sheet comes back as a JSON array whose first element maps the
//! opaque column keys (`Data1`..`Data31`) to header labels and whose
//! remaining elements are data rows keyed the same way. Column-position
//! knowledge lives here only; the rest of the crate works with the named
//! structs below.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub type RawRow = BTreeMap<String, String>;

pub const ROSTER_SHEET: &str = "DataSiswa";
pub const ATTENDANCE_SHEET: &str = "DataKehadiran";
pub const COCURRICULAR_SHEET: &str = "DataKokurikuler";
pub const EXTRACURRICULAR_SHEET: &str = "DataEkstrakurikuler";
pub const LEARNING_OBJECTIVES_SHEET: &str = "DataTP";
pub const SUBJECTS_SHEET: &str = "DataMapel";

/// Spreadsheet row number of the first data row (title row + header row
/// sit above it, and the sheet is 1-based).
pub const FIRST_DATA_ROW: usize = 3;

pub const SCORE_SHEET_COLUMNS: usize = 31;

pub fn data_key(n: usize) -> String {
    format!("Data{}", n)
}

pub fn data_keys(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(data_key).collect()
}

fn cell<'a>(row: &'a RawRow, n: usize) -> &'a str {
    row.get(&data_key(n)).map(|s| s.as_str()).unwrap_or("")
}

fn non_blank(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn scalar_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => Some(String::new()),
        _ => None,
    }
}

fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(d)?;
    Ok(scalar_to_string(&v).unwrap_or_default())
}

fn row_from_json(v: &serde_json::Value) -> Option<RawRow> {
    let obj = v.as_object()?;
    let mut row = RawRow::new();
    for (k, v) in obj {
        if let Some(s) = scalar_to_string(v) {
            row.insert(k.clone(), s);
        }
    }
    Some(row)
}

/// One fetched sheet: the header label row plus data rows in sheet order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetTable {
    pub header: RawRow,
    pub rows: Vec<RawRow>,
}

impl SheetTable {
    pub fn from_json(value: &serde_json::Value) -> anyhow::Result<Self> {
        let Some(arr) = value.as_array() else {
            if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
                return Err(anyhow!("endpoint error: {}", msg));
            }
            return Err(anyhow!("sheet response must be an array"));
        };
        let mut it = arr.iter();
        let header = match it.next() {
            Some(v) => row_from_json(v).context("sheet header must be an object")?,
            None => return Ok(Self::default()),
        };
        let rows = it.filter_map(row_from_json).collect();
        Ok(Self { header, rows })
    }

    pub fn find_by<'a>(&'a self, column: usize, value: &str) -> Option<&'a RawRow> {
        self.rows.iter().find(|r| cell(r, column) == value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetInfo {
    #[serde(rename = "sheetName", default, deserialize_with = "lenient_string")]
    pub sheet_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub mapel: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub semester: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kelas: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolData {
    #[serde(deserialize_with = "lenient_string")]
    pub nama_sekolah: String,
    #[serde(deserialize_with = "lenient_string")]
    pub npsn: String,
    #[serde(deserialize_with = "lenient_string")]
    pub alamat_sekolah: String,
    #[serde(deserialize_with = "lenient_string")]
    pub kode_pos: String,
    #[serde(deserialize_with = "lenient_string")]
    pub desa_kelurahan: String,
    #[serde(deserialize_with = "lenient_string")]
    pub kab_kota: String,
    #[serde(deserialize_with = "lenient_string")]
    pub provinsi: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tahun_pelajaran: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tanggal_rapor: String,
    #[serde(deserialize_with = "lenient_string")]
    pub nama_kepsek: String,
    #[serde(deserialize_with = "lenient_string")]
    pub nip_kepsek: String,
    #[serde(deserialize_with = "lenient_string")]
    pub ttd_kepsek: String,
    #[serde(deserialize_with = "lenient_string")]
    pub nama_guru: String,
    #[serde(deserialize_with = "lenient_string")]
    pub nip_guru: String,
    #[serde(deserialize_with = "lenient_string")]
    pub ttd_guru: String,
}

impl SchoolData {
    /// Fields the school form refuses to save without.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (key, value) in [
            ("namaSekolah", &self.nama_sekolah),
            ("namaKepsek", &self.nama_kepsek),
            ("nipKepsek", &self.nip_kepsek),
            ("namaGuru", &self.nama_guru),
            ("nipGuru", &self.nip_guru),
        ] {
            if value.trim().is_empty() {
                missing.push(key);
            }
        }
        missing
    }
}

/// Parses a score cell. The whole cell must be a number; `0` is a real
/// score. Blank or non-numeric text is "no score", never zero.
pub fn parse_score(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    let normalized = if t.contains(',') && !t.contains('.') {
        t.replace(',', ".")
    } else {
        t.to_string()
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// One student's row in a subject sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSheetRow {
    pub student_name: String,
    pub class_name: String,
    pub final_score: Option<f64>,
    pub desc_min: String,
    pub desc_max: String,
}

impl ScoreSheetRow {
    pub fn new(student_name: &str, class_name: &str, final_score: Option<f64>) -> Self {
        Self {
            student_name: student_name.to_string(),
            class_name: class_name.to_string(),
            final_score,
            desc_min: String::new(),
            desc_max: String::new(),
        }
    }

    /// `None` when the row has no student name.
    pub fn from_raw(row: &RawRow) -> Option<Self> {
        let name = cell(row, 4);
        if name.trim().is_empty() {
            return None;
        }
        Some(Self {
            student_name: name.to_string(),
            class_name: cell(row, 3).to_string(),
            final_score: parse_score(cell(row, 24)),
            desc_min: cell(row, 26).to_string(),
            desc_max: cell(row, 27).to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub name: String,
    pub class_name: String,
    pub nis: Option<String>,
    pub nisn: Option<String>,
    pub parent_name: Option<String>,
}

impl StudentRecord {
    pub fn from_raw(row: &RawRow) -> Self {
        Self {
            name: cell(row, 1).to_string(),
            class_name: cell(row, 2).to_string(),
            nis: non_blank(cell(row, 3)),
            nisn: non_blank(cell(row, 4)),
            parent_name: non_blank(cell(row, 5)),
        }
    }

    pub fn find(table: &SheetTable, student_name: &str) -> Option<Self> {
        table.find_by(1, student_name).map(Self::from_raw)
    }
}

/// Day counts are whole numbers; anything else reads as zero.
pub fn parse_day_count(text: &str) -> u32 {
    text.trim().parse::<u32>().unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub name: String,
    pub sick: u32,
    pub permitted: u32,
    pub unexcused: u32,
}

impl AttendanceRow {
    pub fn from_raw(row: &RawRow) -> Self {
        Self {
            name: cell(row, 1).to_string(),
            unexcused: parse_day_count(cell(row, 5)),
            permitted: parse_day_count(cell(row, 6)),
            sick: parse_day_count(cell(row, 7)),
        }
    }

    pub fn all(table: &SheetTable) -> Vec<Self> {
        table.rows.iter().map(Self::from_raw).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CocurricularRow {
    pub name: String,
    pub description: Option<String>,
}

impl CocurricularRow {
    pub fn find(table: &SheetTable, student_name: &str) -> Option<Self> {
        table.find_by(1, student_name).map(|row| Self {
            name: cell(row, 1).to_string(),
            description: non_blank(cell(row, 10)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtracurricularRow {
    pub name: String,
    pub activities: Vec<(String, String)>,
}

impl ExtracurricularRow {
    pub fn find(table: &SheetTable, student_name: &str) -> Option<Self> {
        table.find_by(1, student_name).map(Self::from_raw)
    }

    /// Two activity/description pairs (Data2/3, Data4/5) plus a bare
    /// third activity in Data6.
    pub fn from_raw(row: &RawRow) -> Self {
        let dash = |s: &str| {
            if s.is_empty() {
                "-".to_string()
            } else {
                s.to_string()
            }
        };
        let mut activities = Vec::new();
        for (a, d) in [(2, 3), (4, 5)] {
            let (activity, desc) = (cell(row, a), cell(row, d));
            if !activity.is_empty() || !desc.is_empty() {
                activities.push((dash(activity), dash(desc)));
            }
        }
        let third = cell(row, 6);
        if !third.is_empty() {
            activities.push((third.to_string(), "-".to_string()));
        }
        Self {
            name: cell(row, 1).to_string(),
            activities,
        }
    }
}

/// A learning objective ("TP") as submitted by the add form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningObjective {
    pub mapel: String,
    pub tp: String,
    pub rincian: String,
    pub bab: String,
    pub semester: String,
    pub kelas: String,
}

impl LearningObjective {
    pub fn missing_required(&self) -> Vec<&'static str> {
        [
            ("mapel", &self.mapel),
            ("tp", &self.tp),
            ("rincian", &self.rincian),
            ("bab", &self.bab),
            ("semester", &self.semester),
            ("kelas", &self.kelas),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewStudent {
    pub nama: String,
    pub kelas: String,
    pub nis: String,
    pub nisn: String,
    pub nama_ortu: String,
}

impl NewStudent {
    pub fn trimmed(&self) -> Self {
        Self {
            nama: self.nama.trim().to_string(),
            kelas: self.kelas.trim().to_string(),
            nis: self.nis.trim().to_string(),
            nisn: self.nisn.trim().to_string(),
            nama_ortu: self.nama_ortu.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    Scores,
    Attendance,
    LearningObjectives,
    Subjects,
    Cocurricular,
    Extracurricular,
    Roster,
}

impl SheetKind {
    pub fn from_sheet_name(name: &str) -> Self {
        match name {
            ATTENDANCE_SHEET => SheetKind::Attendance,
            LEARNING_OBJECTIVES_SHEET => SheetKind::LearningObjectives,
            SUBJECTS_SHEET => SheetKind::Subjects,
            COCURRICULAR_SHEET => SheetKind::Cocurricular,
            EXTRACURRICULAR_SHEET => SheetKind::Extracurricular,
            ROSTER_SHEET => SheetKind::Roster,
            _ => SheetKind::Scores,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SheetKind::Scores => "scores",
            SheetKind::Attendance => "attendance",
            SheetKind::LearningObjectives => "learningObjectives",
            SheetKind::Subjects => "subjects",
            SheetKind::Cocurricular => "cocurricular",
            SheetKind::Extracurricular => "extracurricular",
            SheetKind::Roster => "roster",
        }
    }

    /// Keys written back, in order, by a bulk update of this kind of sheet.
    /// The co-curricular description column holds a formula and is never
    /// written.
    pub fn writable_keys(self) -> Vec<String> {
        match self {
            SheetKind::Scores => data_keys(1..=SCORE_SHEET_COLUMNS),
            SheetKind::Attendance => data_keys(1..=8),
            SheetKind::LearningObjectives => data_keys(1..=6),
            SheetKind::Subjects => data_keys(1..=1),
            SheetKind::Cocurricular => data_keys(1..=9),
            SheetKind::Extracurricular => data_keys(1..=6),
            SheetKind::Roster => data_keys(1..=5),
        }
    }

    /// Score sheets carry template rows without a student; editors never
    /// see them.
    pub fn keeps_row(self, row: &RawRow) -> bool {
        match self {
            SheetKind::Scores => !cell(row, 4).trim().is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreColumns {
    pub visible: Vec<String>,
    pub read_only: Vec<String>,
}

const SCORE_HIDDEN: [usize; 9] = [1, 2, 3, 26, 27, 28, 29, 30, 31];
const SCORE_READ_ONLY: [usize; 9] = [1, 2, 3, 4, 20, 21, 23, 24, 25];

fn score_column_is_conditional(n: usize) -> bool {
    (5..=19).contains(&n) || n == 22
}

/// Which score-sheet columns an editor shows. Assessment columns whose
/// header label is `-` are unused in this sheet and stay hidden.
pub fn score_columns(header: &RawRow) -> ScoreColumns {
    let mut visible = Vec::new();
    for n in 1..=SCORE_SHEET_COLUMNS {
        if SCORE_HIDDEN.contains(&n) {
            continue;
        }
        if score_column_is_conditional(n) && cell(header, n) == "-" {
            continue;
        }
        visible.push(data_key(n));
    }
    let read_only = SCORE_READ_ONLY.iter().map(|n| data_key(*n)).collect();
    ScoreColumns { visible, read_only }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdate {
    pub row_index: usize,
    pub values: Vec<String>,
}

impl BulkUpdate {
    /// `data_index` is the 0-based position among data rows as returned
    /// by the endpoint.
    pub fn new(kind: SheetKind, data_index: usize, mut values: Vec<String>) -> Self {
        values.resize(kind.writable_keys().len(), String::new());
        Self {
            row_index: data_index + FIRST_DATA_ROW,
            values,
        }
    }

    /// Builds an update from a keyed row, in the sheet kind's column order.
    pub fn from_row(kind: SheetKind, data_index: usize, row: &RawRow) -> Self {
        let values = kind
            .writable_keys()
            .iter()
            .map(|k| row.get(k).cloned().unwrap_or_default())
            .collect();
        Self::new(kind, data_index, values)
    }
}
