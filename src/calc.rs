use crate::sheets::ScoreSheetRow;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Rounds half away from zero to 2 decimals, the precision totals and
/// averages are published with.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// All score rows of one subject sheet.
#[derive(Debug, Clone)]
pub struct SubjectDataset {
    pub subject: String,
    pub rows: Vec<ScoreSheetRow>,
}

impl SubjectDataset {
    pub fn new(subject: impl Into<String>, rows: Vec<ScoreSheetRow>) -> Self {
        Self {
            subject: subject.into(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub name: String,
    pub class_name: String,
    /// Only subjects where the student had a row. `None` means the row
    /// was there but carried no usable score.
    pub scores_by_subject: BTreeMap<String, Option<f64>>,
    pub total: f64,
    pub average: f64,
    pub rank: u32,
    pub remark: String,
}

impl StudentSummary {
    fn new(name: &str, class_name: &str) -> Self {
        Self {
            name: name.to_string(),
            class_name: class_name.to_string(),
            scores_by_subject: BTreeMap::new(),
            total: 0.0,
            average: 0.0,
            rank: 0,
            remark: String::new(),
        }
    }

    pub fn scored_count(&self) -> usize {
        self.scores_by_subject.values().filter(|v| v.is_some()).count()
    }

    /// `None` when the subject was never observed for this student,
    /// `Some(None)` when it was observed without a score.
    pub fn score_for(&self, subject: &str) -> Option<Option<f64>> {
        self.scores_by_subject.get(subject).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemarkTier {
    /// Rank 1: keep up the good work.
    Top,
    /// Ranks 2-5: good, but improve further.
    Upper,
    /// Ranks 6-10: focus and work harder.
    Middle,
    /// Ranks 11-15: increase your study effort.
    Lower,
    /// Rank 16 and below: review lessons at home more often.
    Rest,
}

impl RemarkTier {
    pub fn for_rank(rank: u32) -> Option<Self> {
        match rank {
            0 => None,
            1 => Some(RemarkTier::Top),
            2..=5 => Some(RemarkTier::Upper),
            6..=10 => Some(RemarkTier::Middle),
            11..=15 => Some(RemarkTier::Lower),
            _ => Some(RemarkTier::Rest),
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            RemarkTier::Top => "Pertahankan prestasi ananda!",
            RemarkTier::Upper => "Sudah baik, namun tingkatkan lagi prestasi ananda!",
            RemarkTier::Middle => "Fokus, rajin dan lebih semangat lagi!",
            RemarkTier::Lower => "Tingkatkan semangat ananda sewaktu belajar!",
            RemarkTier::Rest => "Lebih rajin lagi mengulang pelajaran di rumah ya!",
        }
    }
}

pub fn remark_for_rank(rank: u32) -> &'static str {
    RemarkTier::for_rank(rank).map(RemarkTier::text).unwrap_or("")
}

/// Merges subject datasets into one summary per student, ranked by total.
///
/// Students are joined on the exact name text: no trimming and no case
/// folding, so "Ana" and "ana" are two students.
pub fn aggregate(datasets: &[SubjectDataset]) -> Vec<StudentSummary> {
    let mut first_seen: Vec<String> = Vec::new();
    let mut by_name: HashMap<String, StudentSummary> = HashMap::new();

    for ds in datasets {
        for row in &ds.rows {
            if row.student_name.trim().is_empty() {
                continue;
            }
            let summary = by_name
                .entry(row.student_name.clone())
                .or_insert_with(|| {
                    first_seen.push(row.student_name.clone());
                    StudentSummary::new(&row.student_name, &row.class_name)
                });
            summary
                .scores_by_subject
                .insert(ds.subject.clone(), row.final_score);
        }
    }

    let mut summaries: Vec<StudentSummary> = first_seen
        .iter()
        .filter_map(|name| by_name.remove(name))
        .map(|mut s| {
            let total: f64 = s.scores_by_subject.values().filter_map(|v| *v).sum();
            let count = s.scored_count();
            let average = if count == 0 { 0.0 } else { total / count as f64 };
            s.total = round_2_decimals(total);
            s.average = round_2_decimals(average);
            s
        })
        .collect();

    // Vec::sort_by is stable: tied totals keep first-seen order.
    summaries.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(Ordering::Equal));
    assign_competition_ranks(&mut summaries);
    summaries
}

/// 1,2,2,4 ranking over a list already sorted by total descending.
fn assign_competition_ranks(sorted: &mut [StudentSummary]) {
    let mut prev: Option<(f64, u32)> = None;
    for (i, s) in sorted.iter_mut().enumerate() {
        let rank = match prev {
            Some((total, rank)) if total == s.total => rank,
            _ => (i + 1) as u32,
        };
        s.rank = rank;
        s.remark = remark_for_rank(rank).to_string();
        prev = Some((s.total, rank));
    }
}

/// Subject columns in sheet-list order, without duplicates.
pub fn subject_columns<'a, I>(subjects: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for s in subjects {
        if !out.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    }
    out
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// The recap table as CSV: one row per student in rank order.
pub fn recap_csv(summaries: &[StudentSummary], subjects: &[String]) -> String {
    let mut header: Vec<String> = vec!["No".into(), "Nama".into(), "Kelas".into()];
    header.extend(subjects.iter().cloned());
    header.extend(["Jumlah", "Rata-rata", "Ranking", "Catatan"].map(String::from));

    let mut out = String::new();
    out.push_str(
        &header
            .iter()
            .map(|h| csv_quote(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for (i, s) in summaries.iter().enumerate() {
        let mut cells: Vec<String> = vec![
            (i + 1).to_string(),
            csv_quote(&s.name),
            csv_quote(&s.class_name),
        ];
        for subject in subjects {
            cells.push(match s.score_for(subject) {
                Some(Some(v)) => v.to_string(),
                _ => "-".to_string(),
            });
        }
        cells.push(s.total.to_string());
        cells.push(s.average.to_string());
        cells.push(s.rank.to_string());
        cells.push(csv_quote(&s.remark));
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}
