use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::IngestionPolicy;

/// Letter grade symbols and their points, in display order.
pub const GRADE_SCALE: &[(&str, u8)] = &[
    ("O", 10),
    ("A+", 9),
    ("A", 8),
    ("B+", 7),
    ("B", 6),
    ("C", 5),
    ("U", 0),
    ("SA", 0),
    ("W", 0),
];

pub const MAX_GRADE_POINT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeError {
    #[error("unknown grade symbol {grade:?} for subject {index}")]
    UnknownGrade { grade: String, index: usize },
    #[error("invalid prior baseline: {0}")]
    InvalidBaseline(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    #[serde(default)]
    pub name: Option<String>,
    pub credits: u32,
    pub grade: String,
}

impl SubjectRecord {
    pub fn new(credits: u32, grade: impl Into<String>) -> Self {
        Self {
            name: None,
            credits,
            grade: grade.into(),
        }
    }
}

/// A grade-point average on the 0..=10 scale, already rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregationResult {
    pub value: f64,
}

impl AggregationResult {
    fn from_totals(points: f64, credits: f64) -> Self {
        let value = if credits > 0.0 {
            round_half_up_2(points / credits)
        } else {
            0.0
        };
        Self { value }
    }
}

pub fn grade_points(symbol: &str) -> Option<u8> {
    let symbol = symbol.trim();
    GRADE_SCALE
        .iter()
        .find(|(g, _)| *g == symbol)
        .map(|(_, p)| *p)
}

/// Round half up to 2 decimals.
///
/// Decimal ties such as `1.005` sit a few ulps below the tie in binary; the
/// nudge is scaled to the magnitude so only those representation errors round
/// up, not genuinely smaller inputs like `8.1249999999999`.
pub fn round_half_up_2(x: f64) -> f64 {
    let scaled = 100.0 * x;
    let nudge = scaled.abs() * 4.0 * f64::EPSILON;
    (scaled + 0.5 + nudge).floor() / 100.0
}

fn term_totals(
    subjects: &[SubjectRecord],
    policy: IngestionPolicy,
) -> Result<(f64, f64), GradeError> {
    let mut total_points: f64 = 0.0;
    let mut total_credits: f64 = 0.0;

    for (index, subject) in subjects.iter().enumerate() {
        let points = match grade_points(&subject.grade) {
            Some(p) => p,
            None if policy.is_strict() => {
                return Err(GradeError::UnknownGrade {
                    grade: subject.grade.clone(),
                    index,
                })
            }
            None => 0,
        };
        let credits = f64::from(subject.credits);
        total_points += credits * f64::from(points);
        total_credits += credits;
    }

    Ok((total_points, total_credits))
}

/// SGPA: credit-weighted mean of grade points for one term.
///
/// Zero total credits (including an empty list) yields 0.
pub fn compute_term_average(
    subjects: &[SubjectRecord],
    policy: IngestionPolicy,
) -> Result<AggregationResult, GradeError> {
    let (points, credits) = term_totals(subjects, policy)?;
    Ok(AggregationResult::from_totals(points, credits))
}

/// CGPA: merges a prior `(credits, average)` baseline with the current term.
pub fn compute_cumulative_average(
    subjects: &[SubjectRecord],
    prior_credits: f64,
    prior_average: f64,
    policy: IngestionPolicy,
) -> Result<AggregationResult, GradeError> {
    if !prior_credits.is_finite() || prior_credits < 0.0 {
        return Err(GradeError::InvalidBaseline(format!(
            "prior credits must be a non-negative number, got {}",
            prior_credits
        )));
    }
    if !prior_average.is_finite() || !(0.0..=MAX_GRADE_POINT).contains(&prior_average) {
        return Err(GradeError::InvalidBaseline(format!(
            "prior average must be in 0..=10, got {}",
            prior_average
        )));
    }

    let (points, credits) = term_totals(subjects, policy)?;
    Ok(AggregationResult::from_totals(
        prior_credits * prior_average + points,
        prior_credits + credits,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LENIENT: IngestionPolicy = IngestionPolicy::Lenient;

    fn term(subjects: &[SubjectRecord]) -> f64 {
        compute_term_average(subjects, LENIENT)
            .expect("lenient never fails")
            .value
    }

    #[test]
    fn empty_and_zero_credit_terms_are_zero() {
        assert_eq!(term(&[]), 0.0);
        assert_eq!(
            term(&[SubjectRecord::new(0, "O"), SubjectRecord::new(0, "A")]),
            0.0
        );
    }

    #[test]
    fn weighted_mean_examples() {
        assert_eq!(term(&[SubjectRecord::new(3, "O")]), 10.0);
        assert_eq!(
            term(&[SubjectRecord::new(3, "O"), SubjectRecord::new(3, "U")]),
            5.0
        );
        // (4*9 + 3*7 + 2*6) / 9 = 69/9 = 7.666..
        assert_eq!(
            term(&[
                SubjectRecord::new(4, "A+"),
                SubjectRecord::new(3, "B+"),
                SubjectRecord::new(2, "B"),
            ]),
            7.67
        );
    }

    #[test]
    fn unknown_grade_is_zero_points_when_lenient() {
        let subjects = [SubjectRecord::new(3, "O"), SubjectRecord::new(3, "A++")];
        assert_eq!(term(&subjects), 5.0);
    }

    #[test]
    fn unknown_grade_fails_when_strict() {
        let subjects = [SubjectRecord::new(3, "O"), SubjectRecord::new(3, "A++")];
        let e = compute_term_average(&subjects, IngestionPolicy::Strict).unwrap_err();
        assert_eq!(
            e,
            GradeError::UnknownGrade {
                grade: "A++".into(),
                index: 1
            }
        );
    }

    #[test]
    fn grade_symbols_are_trimmed_but_case_sensitive() {
        assert_eq!(grade_points(" A+ "), Some(9));
        assert_eq!(grade_points("o"), None);
        assert_eq!(grade_points("SA"), Some(0));
    }

    #[test]
    fn cumulative_with_no_prior_matches_term() {
        let subjects = [
            SubjectRecord::new(4, "A"),
            SubjectRecord::new(3, "C"),
            SubjectRecord::new(1, "O"),
        ];
        let cgpa = compute_cumulative_average(&subjects, 0.0, 0.0, LENIENT).unwrap();
        assert_eq!(cgpa.value, term(&subjects));
        let cgpa = compute_cumulative_average(&subjects, 0.0, 9.5, LENIENT).unwrap();
        assert_eq!(cgpa.value, term(&subjects));
    }

    #[test]
    fn cumulative_merges_prior_baseline() {
        let cgpa =
            compute_cumulative_average(&[SubjectRecord::new(4, "A")], 20.0, 8.0, LENIENT).unwrap();
        assert_eq!(cgpa.value, 8.0);

        // (20*7.5 + 4*10) / 24 = 190/24 = 7.9166..
        let cgpa =
            compute_cumulative_average(&[SubjectRecord::new(4, "O")], 20.0, 7.5, LENIENT).unwrap();
        assert_eq!(cgpa.value, 7.92);
    }

    #[test]
    fn cumulative_with_everything_empty_is_zero() {
        let cgpa = compute_cumulative_average(&[], 0.0, 0.0, LENIENT).unwrap();
        assert_eq!(cgpa.value, 0.0);
    }

    #[test]
    fn cumulative_rejects_bad_baseline() {
        assert!(matches!(
            compute_cumulative_average(&[], -1.0, 8.0, LENIENT),
            Err(GradeError::InvalidBaseline(_))
        ));
        assert!(matches!(
            compute_cumulative_average(&[], 10.0, 10.5, LENIENT),
            Err(GradeError::InvalidBaseline(_))
        ));
        assert!(matches!(
            compute_cumulative_average(&[], f64::NAN, 8.0, LENIENT),
            Err(GradeError::InvalidBaseline(_))
        ));
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_half_up_2(8.125), 8.13);
        assert_eq!(round_half_up_2(1.005), 1.01);
        assert_eq!(round_half_up_2(7.994), 7.99);
        assert_eq!(round_half_up_2(0.0), 0.0);
        assert_eq!(round_half_up_2(10.0), 10.0);
        assert_eq!(round_half_up_2(2.675), 2.68);
    }

    #[test]
    fn values_just_below_a_tie_round_down() {
        assert_eq!(round_half_up_2(8.1249999999999), 8.12);
        assert_eq!(round_half_up_2(1.00499999999), 1.0);
        let cgpa = compute_cumulative_average(&[], 10.0, 8.1249999999999, LENIENT).unwrap();
        assert_eq!(cgpa.value, 8.12);
    }

    fn subject_list() -> impl Strategy<Value = Vec<SubjectRecord>> {
        prop::collection::vec((0u32..7, 0usize..GRADE_SCALE.len()), 0..12).prop_map(|v| {
            v.into_iter()
                .map(|(credits, g)| SubjectRecord::new(credits, GRADE_SCALE[g].0))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn term_average_ignores_subject_order(
            (subjects, shuffled) in subject_list()
                .prop_flat_map(|s| (Just(s.clone()), Just(s).prop_shuffle()))
        ) {
            prop_assert_eq!(term(&subjects), term(&shuffled));
        }

        #[test]
        fn cumulative_average_ignores_subject_order(
            (subjects, shuffled) in subject_list()
                .prop_flat_map(|s| (Just(s.clone()), Just(s).prop_shuffle())),
            prior_credits in 0u32..200,
            prior_average in 0.0f64..=10.0,
        ) {
            let a = compute_cumulative_average(&subjects, f64::from(prior_credits), prior_average, LENIENT).unwrap();
            let b = compute_cumulative_average(&shuffled, f64::from(prior_credits), prior_average, LENIENT).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn term_average_stays_on_scale(subjects in subject_list()) {
            let v = term(&subjects);
            prop_assert!((0.0..=MAX_GRADE_POINT).contains(&v));
        }
    }
}
