use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// 1-decimal rounding used for reported averages.
pub fn round_off_1_decimal(x: f64) -> f64 {
    (10.0 * x).round() / 10.0
}

/// Normalizes a stored timestamp or date string to calendar-day granularity.
/// Accepts anything with a `YYYY-MM-DD` prefix; everything after the date part
/// (a `T09:30:00` tail, a timezone suffix) is ignored.
pub fn calendar_day(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Attendance percentage: recorded days intersected with the scheduled days,
/// over the scheduled count, rounded to the nearest integer. Both sides are
/// deduplicated by calendar day. An empty scheduled set is 0, never a
/// division error.
pub fn attendance_average(scheduled: &[NaiveDate], recorded: &[NaiveDate]) -> i64 {
    let scheduled: HashSet<NaiveDate> = scheduled.iter().copied().collect();
    if scheduled.is_empty() {
        return 0;
    }
    let recorded: HashSet<NaiveDate> = recorded.iter().copied().collect();
    let attended = scheduled.intersection(&recorded).count();
    (100.0 * attended as f64 / scheduled.len() as f64).round() as i64
}

/// Expands a course's scheduled weekdays (0 = Monday .. 6 = Sunday) across a
/// term's date range, inclusive on both ends.
pub fn scheduled_dates(weekdays: &[u32], start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| weekdays.contains(&d.weekday().num_days_from_monday()))
        .collect()
}

/// Dates on or before `as_of`. The reference moment is always an explicit
/// parameter; this module never reads the clock.
pub fn past_dates(dates: &[NaiveDate], as_of: NaiveDate) -> Vec<NaiveDate> {
    dates.iter().copied().filter(|d| *d <= as_of).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermStatus {
    Past,
    Current,
    Future,
}

impl TermStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermStatus::Past => "past",
            TermStatus::Current => "current",
            TermStatus::Future => "future",
        }
    }
}

pub fn term_status(start: NaiveDate, end: NaiveDate, as_of: NaiveDate) -> TermStatus {
    if end < as_of {
        TermStatus::Past
    } else if start > as_of {
        TermStatus::Future
    } else {
        TermStatus::Current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentKind {
    Checkpoint,
    Daily,
}

/// Builds the lookup table from a course's grade-weight rows. Keys are
/// lower-cased; matching is case-insensitive throughout.
pub fn weight_table(rows: &[(String, bool)]) -> HashMap<String, AssignmentKind> {
    let mut table = HashMap::new();
    for (assignment, checkpoint) in rows {
        let kind = if *checkpoint {
            AssignmentKind::Checkpoint
        } else {
            AssignmentKind::Daily
        };
        table.insert(assignment.trim().to_lowercase(), kind);
    }
    table
}

/// Splits scored assignments into checkpoint and daily score lists according
/// to the course's weight table. Assignments with no matching entry are
/// excluded entirely; they do not count toward the average even when scored.
pub fn split_scores(
    scores: &[(String, f64)],
    table: &HashMap<String, AssignmentKind>,
) -> (Vec<f64>, Vec<f64>) {
    let mut checkpoint = Vec::new();
    let mut daily = Vec::new();
    for (assignment, score) in scores {
        match table.get(&assignment.trim().to_lowercase()) {
            Some(AssignmentKind::Checkpoint) => checkpoint.push(*score),
            Some(AssignmentKind::Daily) => daily.push(*score),
            None => {}
        }
    }
    (checkpoint, daily)
}

/// External weighting policy for the overall-grade computation. Both weights
/// are in [0, 1] and sum to 1. The default split is checkpoint 0.6 /
/// daily 0.4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeWeights {
    pub checkpoint: f64,
    pub daily: f64,
}

impl Default for GradeWeights {
    fn default() -> Self {
        Self {
            checkpoint: 0.6,
            daily: 0.4,
        }
    }
}

impl GradeWeights {
    pub fn new(checkpoint: f64, daily: f64) -> Result<Self, CalcError> {
        if !(0.0..=1.0).contains(&checkpoint) || !(0.0..=1.0).contains(&daily) {
            return Err(CalcError::new(
                "bad_params",
                "weights must be between 0 and 1",
            ));
        }
        if (checkpoint + daily - 1.0).abs() > 1e-9 {
            return Err(CalcError::new("bad_params", "weights must sum to 1"));
        }
        Ok(Self { checkpoint, daily })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Weighted overall grade. Combines the checkpoint and daily category means
/// with the weighting policy. If only one category has entries the result
/// degrades to that category's simple mean; if both are empty it is 0.0,
/// never NaN.
pub fn weighted_grade_average(checkpoint: &[f64], daily: &[f64], weights: &GradeWeights) -> f64 {
    match (mean(checkpoint), mean(daily)) {
        (Some(c), Some(d)) => weights.checkpoint * c + weights.daily * d,
        (Some(c), None) => c,
        (None, Some(d)) => d,
        (None, None) => 0.0,
    }
}
