use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self::new(self.year - 1, 12)
        } else {
            Self::new(self.year, self.month - 1)
        }
    }

    pub fn minus_years(&self, years: i32) -> Self {
        Self::new(self.year - years, self.month)
    }

    /// Months since year 0; consecutive months differ by one.
    pub fn index(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    pub fn quarter(&self) -> u32 {
        (self.month - 1) / 3 + 1
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        let next = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        };
        next.and_then(|d| d.pred_opt())
    }

    pub fn days(&self) -> u32 {
        self.last_day().map(|d| d.day()).unwrap_or(30)
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(d: NaiveDate) -> Self {
        Self::new(d.year(), d.month())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Percentage change; `None` when there is no positive baseline.
pub fn pct_change(current: f64, previous: Option<f64>) -> Option<f64> {
    match previous {
        Some(p) if p > 0.0 => Some(round2((current - p) / p * 100.0)),
        _ => None,
    }
}

pub fn trend_direction(current: f64, previous: Option<f64>) -> &'static str {
    match pct_change(current, previous) {
        None => "NO_DATA",
        Some(p) if p > 5.0 => "INCREASING",
        Some(p) if p < -5.0 => "DECREASING",
        Some(_) => "STABLE",
    }
}

/// Continuous median (linear interpolation between the middle values).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Mean over the months of `series` that fall inside the `window` months ending at `ym`.
pub fn rolling_average(series: &BTreeMap<YearMonth, f64>, ym: YearMonth, window: i64) -> Option<f64> {
    let end = ym.index();
    let values: Vec<f64> = series
        .iter()
        .filter(|(k, _)| {
            let i = k.index();
            i <= end && i > end - window
        })
        .map(|(_, v)| *v)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(round2(values.iter().sum::<f64>() / values.len() as f64))
    }
}

pub fn safe_pct(part: f64, whole: f64) -> Option<f64> {
    (whole > 0.0).then(|| round2(part / whole * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_month_navigation() {
        let jan = YearMonth::new(2024, 1);
        assert_eq!(jan.prev(), YearMonth::new(2023, 12));
        assert_eq!(jan.minus_years(1), YearMonth::new(2023, 1));
        assert_eq!(jan.index() - jan.prev().index(), 1);
        assert_eq!(YearMonth::new(2024, 2).days(), 29);
        assert_eq!(YearMonth::new(2023, 2).days(), 28);
        assert_eq!(YearMonth::new(2023, 12).last_day(), NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(YearMonth::new(2023, 11).quarter(), 4);
        assert_eq!(jan.to_string(), "2024-01");
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(150.0, Some(100.0)), Some(50.0));
        assert_eq!(pct_change(50.0, Some(0.0)), None);
        assert_eq!(pct_change(50.0, None), None);
        assert_eq!(pct_change(1.0, Some(3.0)), Some(-66.67));
    }

    #[test]
    fn test_trend_direction() {
        assert_eq!(trend_direction(100.0, None), "NO_DATA");
        assert_eq!(trend_direction(106.0, Some(100.0)), "INCREASING");
        assert_eq!(trend_direction(94.0, Some(100.0)), "DECREASING");
        assert_eq!(trend_direction(105.0, Some(100.0)), "STABLE");
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_rolling_average_uses_present_months() {
        let mut series = BTreeMap::new();
        series.insert(YearMonth::new(2023, 11), 100.0);
        series.insert(YearMonth::new(2024, 1), 200.0);
        series.insert(YearMonth::new(2024, 2), 300.0);
        // window of 3 ending Feb 2024 covers Dec..Feb; Dec is missing
        assert_eq!(rolling_average(&series, YearMonth::new(2024, 2), 3), Some(250.0));
        assert_eq!(rolling_average(&series, YearMonth::new(2024, 2), 6), Some(200.0));
        assert_eq!(rolling_average(&series, YearMonth::new(2023, 1), 3), None);
    }
}
