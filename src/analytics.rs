use crate::db::MarkRow;
use serde::Serialize;

/// Half-up rounding to 1 decimal, with the same magnitude-scaled nudge as
/// `grading::round_half_up_2`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    let scaled = 10.0 * x;
    (scaled + 0.5 + scaled.abs() * 4.0 * f64::EPSILON).floor() / 10.0
}

pub fn percentage(scored: f64, max_marks: f64) -> f64 {
    if max_marks > 0.0 {
        100.0 * scored / max_marks
    } else {
        0.0
    }
}

pub fn letter_band(percent: f64) -> &'static str {
    if percent >= 90.0 {
        "A+"
    } else if percent >= 80.0 {
        "A"
    } else if percent >= 70.0 {
        "B"
    } else if percent >= 60.0 {
        "C"
    } else if percent >= 50.0 {
        "D"
    } else {
        "F"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkView {
    pub id: String,
    pub subject: String,
    pub exam_type: String,
    pub max_marks: f64,
    pub scored: f64,
    pub percent: f64,
    pub band: &'static str,
}

impl From<&MarkRow> for MarkView {
    fn from(m: &MarkRow) -> Self {
        let pct = percentage(m.scored, m.max_marks);
        Self {
            id: m.id.clone(),
            subject: m.subject.clone(),
            exam_type: m.exam_type.clone(),
            max_marks: m.max_marks,
            scored: m.scored,
            percent: round_off_1_decimal(pct),
            band: letter_band(pct),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksOverview {
    pub subject_count: usize,
    pub average_percent: f64,
    pub top_subject: Option<String>,
    pub marks: Vec<MarkView>,
}

/// Summary over one student's marks. Each mark counts once toward the
/// average; the top subject is the highest score ratio, earliest on ties.
pub fn overview(marks: &[MarkRow]) -> MarksOverview {
    let views: Vec<MarkView> = marks.iter().map(MarkView::from).collect();

    let average_percent = if marks.is_empty() {
        0.0
    } else {
        let sum: f64 = marks
            .iter()
            .map(|m| percentage(m.scored, m.max_marks))
            .sum();
        round_off_1_decimal(sum / marks.len() as f64)
    };

    let mut top: Option<(&MarkRow, f64)> = None;
    for m in marks {
        let pct = percentage(m.scored, m.max_marks);
        if top.map(|(_, best)| pct > best).unwrap_or(true) {
            top = Some((m, pct));
        }
    }

    MarksOverview {
        subject_count: marks.len(),
        average_percent,
        top_subject: top.map(|(m, _)| m.subject.clone()),
        marks: views,
    }
}
