//! Lays one student's report out on fixed-size pages.
//!
//! Coordinates are millimetres on an A4 page, y growing downwards from the
//! top edge. Every block is placed whole: before a block is drawn the
//! remaining space on the page is compared with the block's height plus
//! the block's reserve, and a new page is started when it does not fit.
//! The output carries fully positioned draw operations so a renderer never
//! has to make a layout decision.

use crate::calc::StudentSummary;
use serde::Serialize;
use std::collections::BTreeMap;

pub const PAGE_WIDTH: f64 = 210.0;
pub const PAGE_HEIGHT: f64 = 297.0;
/// Cursor position on every page after the first.
pub const PAGE_TOP: f64 = 20.0;
/// Table rows never run into this strip at the bottom of the page.
pub const PAGE_BOTTOM_MARGIN: f64 = 15.0;

const HEADER_TOP: f64 = 12.0;
const HEADER_HEIGHT: f64 = 54.0;
const SECTION_GAP: f64 = 10.0;
const SECTION_TITLE_HEIGHT: f64 = 7.0;
/// Space kept free below the co-curricular, extracurricular and remark
/// sections so they are never stranded at the foot of a page.
const SECTION_RESERVE: f64 = 60.0;
const ATTENDANCE_GAP: f64 = 15.0;
/// Attendance plus the three signer lines; checked as one unit before
/// attendance is placed.
pub const SIGNATURE_RESERVE: f64 = 170.0;
pub const SIGNATURE_HEIGHT: f64 = 95.0;

const BODY_SIZE: f64 = 10.0;
const TABLE_SIZE: f64 = 9.0;
const TITLE_SIZE: f64 = 16.0;
const NIP_SIZE: f64 = 9.0;
const LINE_HEIGHT_FACTOR: f64 = 1.15;
const HEAD_FILL_GRAY: f64 = 200.0 / 255.0;
const RULE_WIDTH: f64 = 0.3;
const BORDER_WIDTH: f64 = 0.1;

const LEFT_COL: f64 = 20.0;
const RIGHT_COL: f64 = 130.0;
const SIGN_LEFT: f64 = 25.0;
const SIGN_CENTER: f64 = 100.0;
const SIGN_RIGHT: f64 = 150.0;
const SIGNATURE_IMAGE_W: f64 = 40.0;
const SIGNATURE_IMAGE_H: f64 = 20.0;
pub const BLANK_SIGNER: &str = "_______________";

const MM_PER_PT: f64 = 25.4 / 72.0;

/// Helvetica advance widths (1/1000 em) for printable ASCII, 0x20..=0x7E.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722,
    722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722,
    667, 944, 667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556,
    556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500,
    500, 334, 260, 334, 584,
];

/// Estimated printed width in mm. Bold is approximated from the regular
/// metrics.
pub fn text_width(text: &str, size_pt: f64, bold: bool) -> f64 {
    let units: u32 = text
        .chars()
        .map(|c| {
            let code = c as u32;
            if (0x20..=0x7E).contains(&code) {
                HELVETICA_WIDTHS[(code - 0x20) as usize] as u32
            } else {
                556
            }
        })
        .sum();
    let scale = if bold { 1.06 } else { 1.0 };
    units as f64 / 1000.0 * size_pt * MM_PER_PT * scale
}

pub fn line_height(size_pt: f64) -> f64 {
    size_pt * LINE_HEIGHT_FACTOR * MM_PER_PT
}

/// Greedy word wrap. Explicit newlines are kept, so a blank line in the
/// input stays a blank line. Words wider than the box are cut by chars.
pub fn wrap_text(text: &str, max_width: f64, size_pt: f64, bold: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if text_width(&candidate, size_pt, bold) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if text_width(word, size_pt, bold) <= max_width {
                current = word.to_string();
                continue;
            }
            for ch in word.chars() {
                let mut next = current.clone();
                next.push(ch);
                if !current.is_empty() && text_width(&next, size_pt, bold) > max_width {
                    lines.push(std::mem::take(&mut current));
                    current.push(ch);
                } else {
                    current = next;
                }
            }
        }
        lines.push(current);
    }
    lines
}

/// Collapses whitespace runs and drops spaces before punctuation.
pub fn clean_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    for ch in collapsed.chars() {
        if matches!(ch, '.' | ',' | ';' | ':' | '!' | '?') && out.ends_with(' ') {
            out.pop();
        }
        out.push(ch);
    }
    out
}

/// The two capability descriptors a subject sheet records for a student.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectDescriptor {
    pub min: String,
    pub max: String,
}

/// Maximum-level text first, then minimum-level, blank line between.
pub fn capability_text(desc: Option<&SubjectDescriptor>) -> String {
    let Some(desc) = desc else {
        return "-".to_string();
    };
    let max = clean_text(&desc.max);
    let min = clean_text(&desc.min);
    match (max.is_empty(), min.is_empty()) {
        (false, false) => format!("{}\n\n{}", max, min),
        (false, true) => max,
        (true, false) => min,
        (true, true) => "-".to_string(),
    }
}

/// `Rapor_<name>.pdf` with whitespace runs turned into `_`.
pub fn report_file_name(student_name: &str) -> String {
    let mut out = String::from("Rapor_");
    let mut in_space = false;
    for ch in student_name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        out.push(if ch == '/' || ch == '\\' { '_' } else { ch });
    }
    out.push_str(".pdf");
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceCounts {
    pub sick: u32,
    pub permitted: u32,
    pub unexcused: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signer {
    pub name: Option<String>,
    pub id_number: Option<String>,
    /// PNG data URL.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolInfo {
    pub name: String,
    pub address: String,
    pub year: String,
    pub report_date: String,
    pub place: String,
    pub semester: String,
    pub phase: String,
    pub headmaster: Signer,
    pub homeroom: Signer,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentIdentity {
    pub nis: Option<String>,
    pub nisn: Option<String>,
    pub parent_name: Option<String>,
}

/// Everything besides the score summary that a report needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportAux {
    pub identity: StudentIdentity,
    pub descriptors: BTreeMap<String, SubjectDescriptor>,
    pub cocurricular: Option<String>,
    pub extracurricular: Vec<(String, String)>,
    pub attendance: AttendanceCounts,
    pub school: SchoolInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockKind {
    Header,
    ScoresTable,
    Cocurricular,
    Extracurricular,
    TeacherRemark,
    Attendance,
    Signature,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DrawOp {
    /// `y` is the text baseline.
    Text {
        x: f64,
        y: f64,
        size: f64,
        bold: bool,
        text: String,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        width: f64,
    },
    Rect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        fill: Option<f64>,
        stroke: bool,
    },
    Image {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        src: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedBlock {
    pub kind: BlockKind,
    pub top: f64,
    pub height: f64,
    pub ops: Vec<DrawOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentPage {
    pub index: usize,
    pub blocks: Vec<PlacedBlock>,
}

fn text(x: f64, y: f64, size: f64, bold: bool, s: impl Into<String>) -> DrawOp {
    DrawOp::Text {
        x,
        y,
        size,
        bold,
        text: s.into(),
    }
}

fn centered(center_x: f64, y: f64, size: f64, bold: bool, s: &str) -> DrawOp {
    text(center_x - text_width(s, size, bold) / 2.0, y, size, bold, s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Center,
}

struct TableStyle {
    left: f64,
    widths: &'static [f64],
    align: &'static [Align],
    padding: f64,
}

const SCORES_STYLE: TableStyle = TableStyle {
    left: 15.0,
    widths: &[15.0, 50.0, 25.0, 90.0],
    align: &[Align::Center, Align::Left, Align::Center, Align::Left],
    padding: 3.0,
};
const SINGLE_COLUMN_STYLE: TableStyle = TableStyle {
    left: LEFT_COL,
    widths: &[140.0],
    align: &[Align::Left],
    padding: 5.0,
};
const EXTRACURRICULAR_STYLE: TableStyle = TableStyle {
    left: LEFT_COL,
    widths: &[70.0, 70.0],
    align: &[Align::Left, Align::Left],
    padding: 5.0,
};
const ATTENDANCE_STYLE: TableStyle = TableStyle {
    left: LEFT_COL,
    widths: &[70.0, 70.0],
    align: &[Align::Left, Align::Center],
    padding: 3.0,
};

impl TableStyle {
    fn wrapped(&self, row: &[String], bold: bool) -> Vec<Vec<String>> {
        row.iter()
            .zip(self.widths)
            .map(|(cell, w)| wrap_text(cell, w - 2.0 * self.padding, TABLE_SIZE, bold))
            .collect()
    }

    fn row_height(&self, row: &[String], bold: bool) -> f64 {
        let lines = self
            .wrapped(row, bold)
            .iter()
            .map(|l| l.len())
            .max()
            .unwrap_or(1)
            .max(1);
        lines as f64 * line_height(TABLE_SIZE) + 2.0 * self.padding
    }

    /// Draws one row with its top edge at `top`; returns the row height.
    fn draw_row(&self, ops: &mut Vec<DrawOp>, top: f64, row: &[String], head: bool) -> f64 {
        let h = self.row_height(row, head);
        let lh = line_height(TABLE_SIZE);
        let mut x = self.left;
        for (i, lines) in self.wrapped(row, head).iter().enumerate() {
            let w = self.widths[i];
            ops.push(DrawOp::Rect {
                x,
                y: top,
                w,
                h,
                fill: head.then_some(HEAD_FILL_GRAY),
                stroke: true,
            });
            let align = if head { Align::Center } else { self.align[i] };
            for (n, line) in lines.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let baseline = top + self.padding + lh * (n as f64) + lh * 0.8;
                let lx = match align {
                    Align::Left => x + self.padding,
                    Align::Center => x + (w - text_width(line, TABLE_SIZE, head)) / 2.0,
                };
                ops.push(text(lx, baseline, TABLE_SIZE, head, line.clone()));
            }
            x += w;
        }
        h
    }

    fn height(&self, head: &[String], rows: &[Vec<String>]) -> f64 {
        self.row_height(head, true) + rows.iter().map(|r| self.row_height(r, false)).sum::<f64>()
    }

    fn draw(&self, ops: &mut Vec<DrawOp>, top: f64, head: &[String], rows: &[Vec<String>]) -> f64 {
        let mut y = top + self.draw_row(ops, top, head, true);
        for r in rows {
            y += self.draw_row(ops, y, r, false);
        }
        y - top
    }
}

fn strings(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
}

struct Paginator {
    pages: Vec<DocumentPage>,
    current: Vec<PlacedBlock>,
    cursor: f64,
}

impl Paginator {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            cursor: HEADER_TOP,
        }
    }

    fn remaining(&self) -> f64 {
        PAGE_HEIGHT - self.cursor
    }

    fn break_page(&mut self) {
        let blocks = std::mem::take(&mut self.current);
        self.pages.push(DocumentPage {
            index: self.pages.len(),
            blocks,
        });
        self.cursor = PAGE_TOP;
    }

    /// Starts a new page unless `needed` fits. A blank page always takes
    /// the block, however tall.
    fn ensure_room(&mut self, needed: f64) {
        if self.remaining() < needed && !self.current.is_empty() {
            self.break_page();
        }
    }

    fn place(&mut self, kind: BlockKind, height: f64, ops: Vec<DrawOp>) {
        self.current.push(PlacedBlock {
            kind,
            top: self.cursor,
            height,
            ops,
        });
        self.cursor += height;
    }

    fn finish(mut self) -> Vec<DocumentPage> {
        if !self.current.is_empty() {
            self.break_page();
        }
        self.pages
    }
}

fn or_dash(s: &str) -> String {
    if s.trim().is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

fn header_ops(top: f64, summary: &StudentSummary, aux: &ReportAux) -> Vec<DrawOp> {
    let school = &aux.school;
    let id = &aux.identity;
    let mut ops = vec![centered(
        PAGE_WIDTH / 2.0,
        top + 8.0,
        TITLE_SIZE,
        true,
        "LAPORAN HASIL BELAJAR (RAPOR)",
    )];
    let rows = [
        (
            "Nama Peserta Didik",
            summary.name.to_uppercase(),
            "Kelas",
            or_dash(&summary.class_name),
        ),
        (
            "NISN/NIS",
            format!(
                "{} / {}",
                id.nisn.as_deref().unwrap_or("-"),
                id.nis.as_deref().unwrap_or("-")
            ),
            "Fase",
            or_dash(&school.phase),
        ),
        (
            "Nama Sekolah",
            or_dash(&school.name),
            "Semester",
            or_dash(&school.semester),
        ),
        (
            "Alamat Sekolah",
            or_dash(&school.address),
            "Tahun Pelajaran",
            or_dash(&school.year),
        ),
    ];
    for (i, (l_label, l_value, r_label, r_value)) in rows.into_iter().enumerate() {
        let y = top + 23.0 + 7.0 * i as f64;
        ops.push(text(LEFT_COL, y, BODY_SIZE, false, l_label));
        ops.push(text(LEFT_COL + 50.0, y, BODY_SIZE, false, format!(": {}", l_value)));
        ops.push(text(RIGHT_COL, y, BODY_SIZE, false, r_label));
        ops.push(text(RIGHT_COL + 30.0, y, BODY_SIZE, false, format!(": {}", r_value)));
    }
    ops
}

fn section_title(ops: &mut Vec<DrawOp>, top: f64, title: &str) {
    ops.push(text(LEFT_COL, top + 4.0, BODY_SIZE, true, title));
}

/// Lays out a titled single table as one block, honouring the reserve.
fn place_section(
    pager: &mut Paginator,
    kind: BlockKind,
    title: &str,
    style: &TableStyle,
    head: &[String],
    rows: &[Vec<String>],
    reserve: f64,
) {
    let height = SECTION_TITLE_HEIGHT + style.height(head, rows);
    pager.ensure_room(height + reserve);
    let top = pager.cursor;
    let mut ops = Vec::new();
    section_title(&mut ops, top, title);
    style.draw(&mut ops, top + SECTION_TITLE_HEIGHT, head, rows);
    pager.place(kind, height, ops);
}

/// The scores table; rows wrap inside their cells and whole rows move to
/// a continuation segment (with the head repeated) when the page fills.
fn place_scores_table(pager: &mut Paginator, rows: &[Vec<String>]) {
    let style = &SCORES_STYLE;
    let head = strings(&["No.", "Mata Pelajaran", "Nilai Akhir", "Capaian Kompetensi"]);
    let head_h = style.row_height(&head, true);
    let limit = PAGE_HEIGHT - PAGE_BOTTOM_MARGIN;
    let heights: Vec<f64> = rows.iter().map(|r| style.row_height(r, false)).collect();

    let mut next = 0usize;
    loop {
        let first_h = heights.get(next).copied().unwrap_or(0.0);
        if pager.cursor + head_h + first_h > limit {
            pager.ensure_room(PAGE_HEIGHT);
        }
        let top = pager.cursor;
        let mut ops = Vec::new();
        let mut y = top + style.draw_row(&mut ops, top, &head, true);
        let mut taken = 0usize;
        while next < rows.len() {
            let h = heights[next];
            if taken > 0 && y + h > limit {
                break;
            }
            y += style.draw_row(&mut ops, y, &rows[next], false);
            next += 1;
            taken += 1;
        }
        pager.place(BlockKind::ScoresTable, y - top, ops);
        if next >= rows.len() {
            break;
        }
        pager.break_page();
    }
}

fn signer_name(s: &Signer) -> String {
    s.name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(BLANK_SIGNER)
        .to_string()
}

fn signer_id(s: &Signer) -> String {
    format!(
        "NIP. {}",
        s.id_number
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(BLANK_SIGNER)
    )
}

fn signature_image(ops: &mut Vec<DrawOp>, x: f64, y: f64, s: &Signer) {
    if let Some(src) = s.signature.as_deref().filter(|v| !v.is_empty()) {
        ops.push(DrawOp::Image {
            x,
            y,
            w: SIGNATURE_IMAGE_W,
            h: SIGNATURE_IMAGE_H,
            src: src.to_string(),
        });
    }
}

/// Parent, homeroom teacher and headmaster lines. The headmaster sits
/// centred below the other two.
fn signature_ops(top: f64, aux: &ReportAux) -> Vec<DrawOp> {
    let school = &aux.school;
    let mut ops = Vec::new();

    ops.push(text(SIGN_LEFT, top + 10.0, BODY_SIZE, false, "Mengetahui :"));
    ops.push(text(SIGN_LEFT, top + 15.0, BODY_SIZE, false, "Orang Tua / Wali,"));
    let parent = aux
        .identity
        .parent_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(BLANK_SIGNER);
    ops.push(text(SIGN_LEFT, top + 40.0, BODY_SIZE, false, parent));

    let dated = if school.place.trim().is_empty() {
        school.report_date.clone()
    } else {
        format!("{}, {}", school.place, school.report_date)
    };
    ops.push(text(SIGN_RIGHT, top + 10.0, BODY_SIZE, false, dated));
    ops.push(text(SIGN_RIGHT, top + 15.0, BODY_SIZE, false, "Wali Kelas,"));
    signature_image(&mut ops, SIGN_RIGHT - 4.0, top + 17.0, &school.homeroom);
    let teacher = signer_name(&school.homeroom);
    ops.push(DrawOp::Line {
        x1: SIGN_RIGHT,
        y1: top + 41.0,
        x2: SIGN_RIGHT + text_width(&teacher, BODY_SIZE, true),
        y2: top + 41.0,
        width: RULE_WIDTH,
    });
    ops.push(text(SIGN_RIGHT, top + 40.0, BODY_SIZE, true, teacher));
    ops.push(text(
        SIGN_RIGHT,
        top + 45.0,
        NIP_SIZE,
        false,
        signer_id(&school.homeroom),
    ));

    let k = top + 55.0;
    ops.push(centered(SIGN_CENTER, k, BODY_SIZE, false, "Mengetahui,"));
    ops.push(centered(SIGN_CENTER, k + 5.0, BODY_SIZE, false, "Kepala Sekolah"));
    signature_image(
        &mut ops,
        SIGN_CENTER - SIGNATURE_IMAGE_W / 2.0,
        k + 7.0,
        &school.headmaster,
    );
    let head = signer_name(&school.headmaster);
    let head_w = text_width(&head, BODY_SIZE, true);
    ops.push(DrawOp::Line {
        x1: SIGN_CENTER - head_w / 2.0,
        y1: k + 31.0,
        x2: SIGN_CENTER + head_w / 2.0,
        y2: k + 31.0,
        width: RULE_WIDTH,
    });
    ops.push(centered(SIGN_CENTER, k + 30.0, BODY_SIZE, true, &head));
    ops.push(centered(
        SIGN_CENTER,
        k + 35.0,
        NIP_SIZE,
        false,
        &signer_id(&school.headmaster),
    ));
    ops
}

fn format_score(v: Option<Option<f64>>) -> String {
    match v {
        Some(Some(v)) => v.to_string(),
        _ => "-".to_string(),
    }
}

/// Lays out one student's report. `subjects` fixes the order of the
/// scores table.
pub fn layout(summary: &StudentSummary, subjects: &[String], aux: &ReportAux) -> Vec<DocumentPage> {
    let mut pager = Paginator::new();

    let top = pager.cursor;
    pager.place(BlockKind::Header, HEADER_HEIGHT, header_ops(top, summary, aux));

    let score_rows: Vec<Vec<String>> = subjects
        .iter()
        .enumerate()
        .map(|(i, subject)| {
            vec![
                (i + 1).to_string(),
                subject.clone(),
                format_score(summary.score_for(subject)),
                capability_text(aux.descriptors.get(subject)),
            ]
        })
        .collect();
    place_scores_table(&mut pager, &score_rows);
    pager.cursor += SECTION_GAP;

    let cocurricular = aux
        .cocurricular
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("-");
    place_section(
        &mut pager,
        BlockKind::Cocurricular,
        "Kokurikuler",
        &SINGLE_COLUMN_STYLE,
        &strings(&["Deskripsi Kokurikuler"]),
        &[vec![cocurricular.to_string()]],
        SECTION_RESERVE,
    );
    pager.cursor += SECTION_GAP;

    let mut extracurricular: Vec<Vec<String>> = aux
        .extracurricular
        .iter()
        .map(|(a, d)| vec![or_dash(a), or_dash(d)])
        .collect();
    if extracurricular.is_empty() {
        extracurricular.push(strings(&["-", "-"]));
    }
    place_section(
        &mut pager,
        BlockKind::Extracurricular,
        "Ekstrakurikuler",
        &EXTRACURRICULAR_STYLE,
        &strings(&["Ekstrakurikuler", "Keterangan"]),
        &extracurricular,
        SECTION_RESERVE,
    );
    pager.cursor += SECTION_GAP;

    place_section(
        &mut pager,
        BlockKind::TeacherRemark,
        "Catatan Guru",
        &SINGLE_COLUMN_STYLE,
        &strings(&["Catatan"]),
        &[vec![or_dash(&summary.remark)]],
        SECTION_RESERVE,
    );
    pager.cursor += SECTION_GAP;

    let a = aux.attendance;
    let attendance_rows = vec![
        vec!["Sakit".to_string(), format!("{} hari", a.sick)],
        vec!["Izin".to_string(), format!("{} hari", a.permitted)],
        vec!["Tanpa Keterangan".to_string(), format!("{} hari", a.unexcused)],
    ];
    let attendance_head = strings(&["Keterangan", "Jumlah Hari"]);
    let attendance_h =
        SECTION_TITLE_HEIGHT + ATTENDANCE_STYLE.height(&attendance_head, &attendance_rows);
    let keep_together = SIGNATURE_RESERVE.max(attendance_h + ATTENDANCE_GAP + SIGNATURE_HEIGHT);
    place_section(
        &mut pager,
        BlockKind::Attendance,
        "Ketidakhadiran",
        &ATTENDANCE_STYLE,
        &attendance_head,
        &attendance_rows,
        keep_together - attendance_h,
    );
    pager.cursor += ATTENDANCE_GAP;

    pager.ensure_room(SIGNATURE_HEIGHT);
    let top = pager.cursor;
    pager.place(BlockKind::Signature, SIGNATURE_HEIGHT, signature_ops(top, aux));

    pager.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{aggregate, SubjectDataset};
    use crate::sheets::ScoreSheetRow;

    fn summary_with(subjects: &[&str]) -> StudentSummary {
        let datasets: Vec<SubjectDataset> = subjects
            .iter()
            .map(|s| SubjectDataset::new(*s, vec![ScoreSheetRow::new("Ana Putri", "5A", Some(80.0))]))
            .collect();
        aggregate(&datasets).remove(0)
    }

    fn subjects(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Mapel {}", i + 1)).collect()
    }

    fn kinds(pages: &[DocumentPage]) -> Vec<BlockKind> {
        pages
            .iter()
            .flat_map(|p| p.blocks.iter().map(|b| b.kind))
            .collect()
    }

    fn assert_blocks_fit(pages: &[DocumentPage]) {
        for page in pages {
            for (i, b) in page.blocks.iter().enumerate() {
                if i > 0 {
                    assert!(
                        b.top + b.height <= PAGE_HEIGHT + 1e-9,
                        "{:?} on page {} runs off the page",
                        b.kind,
                        page.index
                    );
                }
            }
        }
    }

    #[test]
    fn short_report_fits_expected_block_order() {
        let subs = subjects(3);
        let refs: Vec<&str> = subs.iter().map(|s| s.as_str()).collect();
        let s = summary_with(&refs);
        let pages = layout(&s, &subs, &ReportAux::default());
        assert_eq!(
            kinds(&pages),
            vec![
                BlockKind::Header,
                BlockKind::ScoresTable,
                BlockKind::Cocurricular,
                BlockKind::Extracurricular,
                BlockKind::TeacherRemark,
                BlockKind::Attendance,
                BlockKind::Signature,
            ]
        );
        assert_blocks_fit(&pages);
        for (i, p) in pages.iter().enumerate() {
            assert_eq!(p.index, i);
        }
    }

    #[test]
    fn attendance_moves_with_signature_when_space_is_short() {
        let subs = subjects(9);
        let refs: Vec<&str> = subs.iter().map(|s| s.as_str()).collect();
        let s = summary_with(&refs);
        let pages = layout(&s, &subs, &ReportAux::default());
        assert_blocks_fit(&pages);

        let page_of = |kind: BlockKind| {
            pages
                .iter()
                .find(|p| p.blocks.iter().any(|b| b.kind == kind))
                .map(|p| p.index)
                .expect("block placed")
        };
        assert_eq!(page_of(BlockKind::Attendance), page_of(BlockKind::Signature));
        let att_page = &pages[page_of(BlockKind::Attendance)];
        let att = att_page
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::Attendance)
            .expect("attendance");
        assert!(PAGE_HEIGHT - att.top >= SIGNATURE_RESERVE);
    }

    #[test]
    fn blocks_that_do_not_fit_start_a_new_page_whole() {
        for n in 0..30 {
            let subs = subjects(n);
            let refs: Vec<&str> = subs.iter().map(|s| s.as_str()).collect();
            let s = if n == 0 {
                summary_with(&["x"])
            } else {
                summary_with(&refs)
            };
            let mut aux = ReportAux::default();
            aux.cocurricular = Some("Aktif dalam proyek. ".repeat(20 + n));
            let pages = layout(&s, &subs, &aux);
            assert_blocks_fit(&pages);
            let k = kinds(&pages);
            assert_eq!(k.iter().filter(|b| **b == BlockKind::Signature).count(), 1);
            assert_eq!(k.first(), Some(&BlockKind::Header));
            assert_eq!(k.last(), Some(&BlockKind::Signature));
        }
    }

    #[test]
    fn long_scores_table_continues_with_whole_rows() {
        let subs = subjects(14);
        let refs: Vec<&str> = subs.iter().map(|s| s.as_str()).collect();
        let s = summary_with(&refs);
        let mut aux = ReportAux::default();
        for sub in &subs {
            aux.descriptors.insert(
                sub.clone(),
                SubjectDescriptor {
                    min: "Perlu bimbingan dalam memahami konsep dasar pecahan dan desimal.".repeat(2),
                    max: "Menunjukkan penguasaan yang sangat baik dalam operasi hitung.".repeat(2),
                },
            );
        }
        let pages = layout(&s, &subs, &aux);
        assert_blocks_fit(&pages);
        let segments: Vec<&PlacedBlock> = pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .filter(|b| b.kind == BlockKind::ScoresTable)
            .collect();
        assert!(segments.len() >= 2, "expected a continuation segment");

        let subject_cells: usize = segments
            .iter()
            .flat_map(|b| b.ops.iter())
            .filter(|op| matches!(op, DrawOp::Text { text, .. } if text.starts_with("Mapel ")))
            .count();
        assert_eq!(subject_cells, subs.len());
        for seg in &segments {
            let heads = seg
                .ops
                .iter()
                .filter(|op| matches!(op, DrawOp::Text { text, .. } if text == "Mata Pelajaran"))
                .count();
            assert_eq!(heads, 1);
        }
    }

    #[test]
    fn oversized_block_on_blank_page_is_kept_whole() {
        let s = summary_with(&["x"]);
        let mut aux = ReportAux::default();
        aux.cocurricular = Some("kata ".repeat(3000));
        let pages = layout(&s, &["x".to_string()], &aux);
        let co = pages
            .iter()
            .find(|p| p.blocks.iter().any(|b| b.kind == BlockKind::Cocurricular))
            .expect("co-curricular page");
        assert_eq!(co.blocks[0].kind, BlockKind::Cocurricular);
        assert!(co.blocks[0].height > PAGE_HEIGHT);
        assert_eq!(kinds(&pages).last(), Some(&BlockKind::Signature));
    }

    #[test]
    fn placeholders_fill_missing_aux_data() {
        let s = summary_with(&["IPA"]);
        let pages = layout(&s, &["IPA".to_string(), "IPS".to_string()], &ReportAux::default());
        let texts: Vec<String> = pages
            .iter()
            .flat_map(|p| p.blocks.iter().flat_map(|b| b.ops.iter()))
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert!(texts.iter().any(|t| t == "0 hari"));
        assert!(texts.iter().any(|t| t == ": - / -"));
        assert!(texts.iter().any(|t| t == BLANK_SIGNER));
        assert!(texts.iter().any(|t| t == "NIP. _______________"));
        assert!(texts.iter().filter(|t| *t == "-").count() >= 4);
        let images = pages
            .iter()
            .flat_map(|p| p.blocks.iter().flat_map(|b| b.ops.iter()))
            .filter(|op| matches!(op, DrawOp::Image { .. }))
            .count();
        assert_eq!(images, 0);
    }

    #[test]
    fn signatures_are_drawn_when_present() {
        let s = summary_with(&["IPA"]);
        let mut aux = ReportAux::default();
        aux.school.homeroom = Signer {
            name: Some("Rina".into()),
            id_number: Some("1987".into()),
            signature: Some("data:image/png;base64,AAAA".into()),
        };
        aux.school.headmaster.signature = Some("data:image/png;base64,BBBB".into());
        let pages = layout(&s, &["IPA".to_string()], &aux);
        let sig = pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .find(|b| b.kind == BlockKind::Signature)
            .expect("signature");
        let images = sig.ops.iter().filter(|op| matches!(op, DrawOp::Image { .. })).count();
        assert_eq!(images, 2);
        assert!(sig
            .ops
            .iter()
            .any(|op| matches!(op, DrawOp::Text { text, bold: true, .. } if text == "Rina")));
    }

    #[test]
    fn capability_text_orders_max_before_min() {
        let d = SubjectDescriptor {
            min: "perlu  bantuan .".into(),
            max: "sangat   baik ,  teliti".into(),
        };
        assert_eq!(capability_text(Some(&d)), "sangat baik, teliti\n\nperlu bantuan.");
        let only_min = SubjectDescriptor {
            min: "cukup".into(),
            max: "  ".into(),
        };
        assert_eq!(capability_text(Some(&only_min)), "cukup");
        assert_eq!(capability_text(Some(&SubjectDescriptor::default())), "-");
        assert_eq!(capability_text(None), "-");
    }

    #[test]
    fn wrap_keeps_blank_lines_and_respects_width() {
        let lines = wrap_text("satu dua tiga\n\nempat", 1000.0, 9.0, false);
        assert_eq!(lines, vec!["satu dua tiga", "", "empat"]);
        let narrow = wrap_text("alpha beta gamma delta", 15.0, 9.0, false);
        assert!(narrow.len() > 1);
        for l in &narrow {
            assert!(text_width(l, 9.0, false) <= 15.0);
        }
        let long = wrap_text(&"m".repeat(80), 20.0, 9.0, false);
        assert!(long.len() > 1);
        assert_eq!(long.concat(), "m".repeat(80));
    }

    #[test]
    fn file_names_replace_whitespace_runs() {
        assert_eq!(report_file_name("Ana  Putri Sari"), "Rapor_Ana_Putri_Sari.pdf");
        assert_eq!(report_file_name("Budi\tS"), "Rapor_Budi_S.pdf");
    }
}
