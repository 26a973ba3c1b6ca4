use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{GapFillError, Result};

/// Calendar sampling step of a prediction axis.
///
/// Parsed from pandas-style frequency strings: `"M"` is monthly, `"3M"`
/// quarterly, `"6M"` semiannual, `"10D"` every ten days, `"Y"` yearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Step {
    Days(u32),
    Months(u32),
    Years(u32),
}

impl Step {
    /// Advance `start` by `k` steps. `None` on calendar overflow.
    fn nth_tick(&self, start: NaiveDate, k: u32) -> Option<NaiveDate> {
        match *self {
            Step::Days(n) => start.checked_add_days(Days::new(u64::from(n) * u64::from(k))),
            Step::Months(n) => start.checked_add_months(Months::new(n.checked_mul(k)?)),
            Step::Years(n) => {
                start.checked_add_months(Months::new(n.checked_mul(12)?.checked_mul(k)?))
            }
        }
    }
}

impl FromStr for Step {
    type Err = GapFillError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| GapFillError::InvalidStep(s.to_string()))?;
        let (digits, unit) = trimmed.split_at(split);
        let mult: u32 = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| GapFillError::InvalidStep(s.to_string()))?
        };
        if mult == 0 {
            return Err(GapFillError::InvalidStep(s.to_string()));
        }
        let invalid = || GapFillError::InvalidStep(s.to_string());
        match unit.to_ascii_uppercase().as_str() {
            "D" => Ok(Step::Days(mult)),
            "W" => Ok(Step::Days(mult.checked_mul(7).ok_or_else(invalid)?)),
            "M" | "MS" => Ok(Step::Months(mult)),
            "Q" | "QS" => Ok(Step::Months(mult.checked_mul(3).ok_or_else(invalid)?)),
            "Y" | "YS" | "A" | "AS" => Ok(Step::Years(mult)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Step {
    type Error = GapFillError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.to_string()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Days(n) => write!(f, "{n}D"),
            Step::Months(n) => write!(f, "{n}M"),
            Step::Years(n) => write!(f, "{n}Y"),
        }
    }
}

/// Ordered, strictly increasing decimal-year timestamps that every pixel is
/// evaluated on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPredictionAxis")]
pub struct PredictionAxis {
    times: Vec<f64>,
    dates: Option<Vec<NaiveDate>>,
}

#[derive(Deserialize)]
struct RawPredictionAxis {
    times: Vec<f64>,
    #[serde(default)]
    dates: Option<Vec<NaiveDate>>,
}

impl TryFrom<RawPredictionAxis> for PredictionAxis {
    type Error = GapFillError;

    fn try_from(raw: RawPredictionAxis) -> Result<Self> {
        let mut axis = Self::from_values(raw.times)?;
        if let Some(dates) = raw.dates {
            if dates.len() != axis.len() {
                return Err(GapFillError::InvalidAxis(format!(
                    "{} dates for {} timestamps",
                    dates.len(),
                    axis.len()
                )));
            }
            axis.dates = Some(dates);
        }
        Ok(axis)
    }
}

impl PredictionAxis {
    /// Wrap a custom axis. Must be non-empty, finite and strictly increasing.
    pub fn from_values(times: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(GapFillError::InvalidAxis("axis is empty".into()));
        }
        if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
            return Err(GapFillError::InvalidAxis(format!("non-finite timestamp {bad}")));
        }
        if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
            return Err(GapFillError::InvalidAxis(format!(
                "timestamps not strictly increasing ({} then {})",
                w[0], w[1]
            )));
        }
        Ok(Self { times, dates: None })
    }

    pub fn values(&self) -> &[f64] {
        &self.times
    }

    /// Calendar dates of each tick, when the axis was built from dates.
    pub fn dates(&self) -> Option<&[NaiveDate]> {
        self.dates.as_deref()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first(&self) -> f64 {
        self.times[0]
    }

    pub fn last(&self) -> f64 {
        self.times[self.times.len() - 1]
    }
}

/// Build the prediction axis: ticks `start + k * step` up to and including `end`.
pub fn build(start: NaiveDate, end: NaiveDate, step: Step) -> Result<PredictionAxis> {
    if end < start {
        return Err(GapFillError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    let mut dates = Vec::new();
    let mut k = 0u32;
    // Each tick is offset from `start` so month-end clamping never accumulates.
    while let Some(tick) = step.nth_tick(start, k) {
        if tick > end {
            break;
        }
        dates.push(tick);
        k = match k.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }

    let times = dates.iter().map(|d| date_decimal_year(*d)).collect();
    Ok(PredictionAxis {
        times,
        dates: Some(dates),
    })
}

/// Build the prediction axis from ISO date strings and a frequency string.
pub fn create_prediction_timeseries(start: &str, end: &str, step: &str) -> Result<PredictionAxis> {
    build(parse_date(start)?, parse_date(end)?, step.parse()?)
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| GapFillError::InvalidDate(s.to_string()))
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn year_bounds(year: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
    Some((midnight(start), midnight(end)))
}

/// Fractional year: `year + elapsed / length_of_year`, leap years respected.
pub fn decimal_year(dt: NaiveDateTime) -> f64 {
    let year = dt.year();
    match year_bounds(year) {
        Some((start, end)) => {
            let elapsed = (dt - start).num_milliseconds() as f64;
            let total = (end - start).num_milliseconds() as f64;
            year as f64 + elapsed / total
        }
        None => f64::NAN,
    }
}

/// Decimal year of a date at midnight.
pub fn date_decimal_year(date: NaiveDate) -> f64 {
    decimal_year(midnight(date))
}

/// Inverse of [`decimal_year`], to millisecond precision.
pub fn date_from_decimal_year(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    let year = value.floor();
    if year < i32::MIN as f64 || year > i32::MAX as f64 {
        return None;
    }
    let (start, end) = year_bounds(year as i32)?;
    let total = (end - start).num_milliseconds() as f64;
    let offset = ((value - year) * total).round() as i64;
    start.checked_add_signed(Duration::milliseconds(offset))
}
