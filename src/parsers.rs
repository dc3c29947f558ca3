use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

pub const CURRENCY_CODES: &[&str] = &["SGD", "USD", "EUR", "GBP", "MYR", "AUD"];

#[derive(Debug, Clone, PartialEq)]
pub struct AmountParse {
    pub value: Option<f64>,
    pub currency: String,
    pub ok: bool,
}

impl AmountParse {
    fn failed(currency: &str) -> Self {
        Self {
            value: None,
            currency: currency.to_string(),
            ok: false,
        }
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid number regex")
    })
}

/// Parse a messy amount such as `$40.10`, `333.95 SGD`, `SGD 1,204.00` or `(12.50)`.
pub fn parse_amount(raw: &str, default_currency: &str) -> AmountParse {
    let mut s = raw.trim().to_uppercase();
    if s.is_empty() {
        return AmountParse::failed(default_currency);
    }

    // the configured default is recognised even when it is not a known code
    let default_code = default_currency.trim().to_uppercase();
    let extra = (!default_code.is_empty() && !CURRENCY_CODES.contains(&default_code.as_str()))
        .then_some(default_code.as_str());

    let mut currency = default_currency.to_string();
    for code in CURRENCY_CODES.iter().copied().chain(extra) {
        if let Some(rest) = s.strip_prefix(code) {
            currency = code.to_string();
            s = rest.trim().to_string();
            break;
        }
        if let Some(rest) = s.strip_suffix(code) {
            currency = code.to_string();
            s = rest.trim().to_string();
            break;
        }
    }

    let mut s = s.replace("S$", "").replace(['$', ','], "");
    s.retain(|c| !c.is_whitespace());

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.to_string();
    }

    if !number_re().is_match(&s) {
        return AmountParse::failed(&currency);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => AmountParse {
            value: Some(if negative { -v } else { v }),
            currency,
            ok: true,
        },
        _ => AmountParse::failed(&currency),
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Explicit formats, tried in order before the fuzzy parser.
pub const DATE_FORMATS: &[&str] = &[
    "%d-%b-%Y",
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%d/%m/%y",
    "%d-%m-%Y",
    "%d-%m-%y",
    "%Y/%m/%d",
    "%d-%b-%y",
];

pub const FUZZY_FORMAT: &str = "fuzzy";

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_date_with_format(raw).map(|(d, _)| d)
}

/// Which format (or the fuzzy parser) produced a date for `raw`.
pub fn matched_format(raw: &str) -> Option<&'static str> {
    parse_date_with_format(raw).map(|(_, f)| f)
}

fn parse_date_with_format(raw: &str) -> Option<(NaiveDate, &'static str)> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Some(d) = parse_explicit(s, fmt) {
            return Some((d, fmt));
        }
    }
    parse_fuzzy(s).map(|d| (d, FUZZY_FORMAT))
}

fn parse_explicit(s: &str, fmt: &str) -> Option<NaiveDate> {
    let d = NaiveDate::parse_from_str(s, fmt).ok()?;
    if fmt.contains("%Y") {
        // %Y must be a four-digit year, not "24"
        (d.year() >= 1000).then_some(d)
    } else {
        let yy = d.year().rem_euclid(100) as u32;
        NaiveDate::from_ymd_opt(pivot_year(yy), d.month(), d.day())
    }
}

/// Two-digit years: 00-68 land in the 2000s, 69-99 in the 1900s.
fn pivot_year(yy: u32) -> i32 {
    if yy <= 68 {
        2000 + yy as i32
    } else {
        1900 + yy as i32
    }
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\st])\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?\s*(?:am|pm|z)?").expect("valid time regex")
    })
}

fn noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun|of|at)\b")
            .expect("valid weekday regex")
    })
}

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").expect("valid ordinal regex"))
}

fn month_from_name(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    if token.len() < 3 || !token.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let token = if token == "sept" { "sep" } else { token };
    MONTHS
        .iter()
        .position(|m| token.starts_with(m) && is_month_spelling(token, m))
        .map(|i| i as u32 + 1)
}

fn is_month_spelling(token: &str, short: &str) -> bool {
    const LONG: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    token == short || LONG.iter().any(|l| l.starts_with(short) && *l == token)
}

fn year_from_token(token: &str) -> Option<i32> {
    let n: u32 = token.parse().ok()?;
    match token.len() {
        1 | 2 => Some(pivot_year(n)),
        4 => Some(n as i32),
        _ => None,
    }
}

/// Day-first fallback for anything the explicit formats miss.
fn parse_fuzzy(s: &str) -> Option<NaiveDate> {
    let lower = s.to_lowercase();
    let lower = time_re().replace_all(&lower, " ");
    let lower = noise_re().replace_all(&lower, " ");
    let lower = ordinal_re().replace_all(&lower, "$1");

    let tokens: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || matches!(c, '/' | '-' | '.' | ','))
        .filter(|t| !t.is_empty())
        .collect();

    let mut month_name = None;
    let mut numbers: Vec<&str> = Vec::new();
    for &t in &tokens {
        if t.chars().all(|c| c.is_ascii_digit()) {
            numbers.push(t);
        } else if let Some(m) = month_from_name(t) {
            if month_name.replace(m).is_some() {
                return None;
            }
        } else {
            return None;
        }
    }

    if let Some(month) = month_name {
        if numbers.len() != 2 {
            return None;
        }
        let (day, year) = if numbers[0].len() == 4 {
            (numbers[1].parse().ok()?, year_from_token(numbers[0])?)
        } else {
            (numbers[0].parse().ok()?, year_from_token(numbers[1])?)
        };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    match numbers.as_slice() {
        [compact] if compact.len() == 8 => {
            let y = compact[..4].parse().ok()?;
            let m = compact[4..6].parse().ok()?;
            let d = compact[6..].parse().ok()?;
            NaiveDate::from_ymd_opt(y, m, d)
        }
        [first, second, third] => {
            if first.len() == 4 {
                let y: i32 = first.parse().ok()?;
                let (mut m, mut d): (u32, u32) = (second.parse().ok()?, third.parse().ok()?);
                if m > 12 && d <= 12 {
                    std::mem::swap(&mut m, &mut d);
                }
                NaiveDate::from_ymd_opt(y, m, d)
            } else {
                let y = year_from_token(third)?;
                let (mut d, mut m): (u32, u32) = (first.parse().ok()?, second.parse().ok()?);
                if m > 12 && d <= 12 {
                    std::mem::swap(&mut m, &mut d);
                }
                NaiveDate::from_ymd_opt(y, m, d)
            }
        }
        _ => None,
    }
}

/// Calendar attributes stored alongside every staged date.
#[derive(Debug, Clone, PartialEq)]
pub struct DateParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub quarter: u32,
    pub weekday_name: String,
    pub iso_weekday: u32,
}

impl From<NaiveDate> for DateParts {
    fn from(date: NaiveDate) -> Self {
        let month = date.month();
        Self {
            year: date.year(),
            month,
            day: date.day(),
            quarter: (month - 1) / 3 + 1,
            weekday_name: date.format("%A").to_string(),
            iso_weekday: date.weekday().number_from_monday(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_amount_plain_and_symbols() {
        assert_eq!(parse_amount("155.66", "SGD").value, Some(155.66));
        assert_eq!(parse_amount("$40.10", "SGD").value, Some(40.10));
        assert_eq!(parse_amount("S$1,204.00", "SGD").value, Some(1204.0));
        assert_eq!(parse_amount("  7 ", "SGD").value, Some(7.0));
    }

    #[test]
    fn test_amount_currency_codes() {
        let a = parse_amount("333.95 SGD", "SGD");
        assert_eq!(a.value, Some(333.95));
        assert_eq!(a.currency, "SGD");
        let b = parse_amount("usd 17.51", "SGD");
        assert_eq!(b.value, Some(17.51));
        assert_eq!(b.currency, "USD");
        assert_eq!(parse_amount("12", "MYR").currency, "MYR");
    }

    #[test]
    fn test_amount_default_currency_code() {
        let a = parse_amount("JPY 1,200", "JPY");
        assert!(a.ok);
        assert_eq!(a.value, Some(1200.0));
        assert_eq!(a.currency, "JPY");
        assert!(!parse_amount("JPY 1,200", "SGD").ok);
        assert_eq!(parse_amount("4 usd", "jpy").currency, "USD");
    }

    #[test]
    fn test_amount_parentheses_negative() {
        assert_eq!(parse_amount("(12.50)", "SGD").value, Some(-12.5));
        assert_eq!(parse_amount("-3", "SGD").value, Some(-3.0));
    }

    #[test]
    fn test_amount_failures() {
        for raw in ["", "   ", "abc", "12.3.4", "NaN", "inf", "1e999", "$", "--5"] {
            let a = parse_amount(raw, "SGD");
            assert!(!a.ok, "{raw:?} should not parse");
            assert_eq!(a.value, None);
            assert_eq!(a.currency, "SGD");
        }
    }

    #[test]
    fn test_date_explicit_formats() {
        assert_eq!(parse_date("01-Apr-2022"), Some(ymd(2022, 4, 1)));
        assert_eq!(parse_date("14/05/2024"), Some(ymd(2024, 5, 14)));
        assert_eq!(parse_date("2023-09-28"), Some(ymd(2023, 9, 28)));
        assert_eq!(parse_date("21/10/24"), Some(ymd(2024, 10, 21)));
        assert_eq!(parse_date("01-04-2022"), Some(ymd(2022, 4, 1)));
        assert_eq!(parse_date("01-04-22"), Some(ymd(2022, 4, 1)));
        assert_eq!(parse_date("2023/09/28"), Some(ymd(2023, 9, 28)));
        assert_eq!(parse_date("20-Sep-22"), Some(ymd(2022, 9, 20)));
    }

    #[test]
    fn test_matched_format_reports_strategy() {
        assert_eq!(matched_format("21/10/24"), Some("%d/%m/%y"));
        assert_eq!(matched_format("14/05/2024"), Some("%d/%m/%Y"));
        assert_eq!(matched_format("March 5, 2023"), Some(FUZZY_FORMAT));
        assert_eq!(matched_format("garbage"), None);
    }

    #[test]
    fn test_two_digit_year_pivot() {
        assert_eq!(parse_date("01/01/68"), Some(ymd(2068, 1, 1)));
        assert_eq!(parse_date("01/01/69"), Some(ymd(1969, 1, 1)));
    }

    #[test]
    fn test_date_fuzzy_fallback() {
        assert_eq!(parse_date("March 5, 2023"), Some(ymd(2023, 3, 5)));
        assert_eq!(parse_date("5 March 2023"), Some(ymd(2023, 3, 5)));
        assert_eq!(parse_date("Tue, 3rd Jan 2023"), Some(ymd(2023, 1, 3)));
        assert_eq!(parse_date("20230928"), Some(ymd(2023, 9, 28)));
        assert_eq!(parse_date("2023-09-28 14:30:00"), Some(ymd(2023, 9, 28)));
        assert_eq!(parse_date("28.09.2023"), Some(ymd(2023, 9, 28)));
        assert_eq!(parse_date("2023.9.28"), Some(ymd(2023, 9, 28)));
    }

    #[test]
    fn test_date_fuzzy_swaps_impossible_month() {
        assert_eq!(parse_date("12/25/2023"), Some(ymd(2023, 12, 25)));
    }

    #[test]
    fn test_date_failures() {
        for raw in ["", "not a date", "32/13/2023", "31/02/2023", "2023", "Jan 2023", "1/2"] {
            assert_eq!(parse_date(raw), None, "{raw:?} should not parse");
        }
    }

    #[test]
    fn test_date_parts() {
        let p = DateParts::from(ymd(2024, 5, 14));
        assert_eq!(p.quarter, 2);
        assert_eq!(p.weekday_name, "Tuesday");
        assert_eq!(p.iso_weekday, 2);
        assert_eq!(DateParts::from(ymd(2024, 12, 1)).quarter, 4);
        assert_eq!(DateParts::from(ymd(2024, 1, 7)).iso_weekday, 7);
    }
}
