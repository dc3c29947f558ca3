use std::path::Path;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::models::RawSpendingRow;
use crate::parsers::DATE_FORMATS;

const PERSONS: &[&str] = &["Alice Tan", "Benjamin Lim", "Chloe Ng", "Daniel Wong"];

/// Category with a typical amount range.
struct Category {
    name: &'static str,
    min: f64,
    max: f64,
    descriptions: &'static [&'static str],
}

const CATEGORIES: &[Category] = &[
    Category { name: "Food", min: 3.0, max: 35.0, descriptions: &["Lunch", "Dinner", "Kopi and toast", "Hawker meal"] },
    Category { name: "Groceries", min: 15.0, max: 180.0, descriptions: &["Weekly groceries", "Fruit and veg"] },
    Category { name: "Transport", min: 1.0, max: 40.0, descriptions: &["MRT fare", "Bus ride", "Taxi home"] },
    Category { name: "Shopping", min: 20.0, max: 650.0, descriptions: &["New shoes", "Clothes", "Gadget"] },
    Category { name: "Entertainment", min: 10.0, max: 120.0, descriptions: &["Movie night", "Concert", "Streaming"] },
    Category { name: "Utilities", min: 40.0, max: 250.0, descriptions: &["Electricity bill", "Mobile plan"] },
    Category { name: "Healthcare", min: 20.0, max: 300.0, descriptions: &["GP visit", "Pharmacy"] },
    Category { name: "Education", min: 15.0, max: 400.0, descriptions: &["Online course", "Textbook"] },
    Category { name: "Gifts", min: 10.0, max: 200.0, descriptions: &["Birthday gift", "Red packet"] },
];

const LOCATIONS: &[&str] = &[
    "VivoCity Mall",
    "Maxwell Food Court",
    "Tampines MRT Station",
    "Shopee",
    "Lazada",
    "Raffles Hospital",
    "Bugis Street Market",
    "Toa Payoh Bus Interchange",
    "Cafe Nero",
];

const PAYMENT_METHODS: &[&str] = &["Cash", "Visa Card", "Mastercard", "GrabPay", "Apple Pay", "EZ-Link", "Bank Transfer"];

const GARBAGE_AMOUNTS: &[&str] = &["N/A", "abc", "twelve", "--"];
const GARBAGE_DATES: &[&str] = &["unknown", "32/13/2024", "sometime", "??"];

/// Share of optional cells left blank, and of amounts/dates replaced with junk.
/// Person, date and amount are never blank so the source gate passes.
const BLANK_RATE: f64 = 0.03;
const GARBAGE_RATE: f64 = 0.02;

fn maybe_blank(rng: &mut StdRng, value: String) -> Option<String> {
    if rng.gen_bool(BLANK_RATE) {
        None
    } else {
        Some(value)
    }
}

fn messy_amount(rng: &mut StdRng, value: f64) -> String {
    match rng.gen_range(0..6) {
        0 => format!("${value:.2}"),
        1 => format!("{value:.2} SGD"),
        2 => {
            let whole = value.trunc() as i64;
            let cents = ((value - value.trunc()) * 100.0).round() as i64;
            let grouped = if whole >= 1000 {
                format!("{},{:03}", whole / 1000, whole % 1000)
            } else {
                whole.to_string()
            };
            format!("SGD {grouped}.{cents:02}")
        }
        3 => format!("{value:.1}"),
        4 => format!("S${value:.2}"),
        _ => format!("{value:.2}"),
    }
}

fn messy_date(rng: &mut StdRng, date: NaiveDate) -> String {
    if rng.gen_bool(0.1) {
        return date.format("%B %-d, %Y").to_string();
    }
    let format = DATE_FORMATS.choose(rng).copied().unwrap_or("%Y-%m-%d");
    date.format(format).to_string()
}

/// Deterministic messy spending rows spread over 2023 and 2024.
pub fn generate(rows: usize, seed: u64) -> Vec<RawSpendingRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default();
    (0..rows)
        .map(|_| {
            let category = &CATEGORIES[rng.gen_range(0..CATEGORIES.len())];
            let value = (rng.gen_range(category.min..category.max) * 100.0).round() / 100.0;
            let date = start + Duration::days(rng.gen_range(0..730));

            let amount = if rng.gen_bool(GARBAGE_RATE) {
                GARBAGE_AMOUNTS.choose(&mut rng).map(|s| s.to_string()).unwrap_or_default()
            } else {
                messy_amount(&mut rng, value)
            };
            let spending_date = if rng.gen_bool(GARBAGE_RATE) {
                GARBAGE_DATES.choose(&mut rng).map(|s| s.to_string()).unwrap_or_default()
            } else {
                messy_date(&mut rng, date)
            };
            let person = PERSONS.choose(&mut rng).copied().unwrap_or("Unknown");
            let location = LOCATIONS.choose(&mut rng).copied().unwrap_or("Unknown");
            let payment = PAYMENT_METHODS.choose(&mut rng).copied().unwrap_or("Cash");
            let description = category.descriptions.choose(&mut rng).copied().unwrap_or("");

            RawSpendingRow {
                person_name: Some(person.to_string()),
                spending_date: Some(spending_date),
                category: maybe_blank(&mut rng, category.name.to_string()),
                amount: Some(amount),
                location: maybe_blank(&mut rng, location.to_string()),
                description: maybe_blank(&mut rng, description.to_string()),
                payment_method: maybe_blank(&mut rng, payment.to_string()),
            }
        })
        .collect()
}

/// Write rows as CSV with the canonical source header.
pub fn write_csv(path: &Path, rows: &[RawSpendingRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SOURCE_COLUMNS;
    use crate::parsers::{parse_amount, parse_date};

    #[test]
    fn test_same_seed_same_rows() {
        assert_eq!(generate(50, 7), generate(50, 7));
        assert_ne!(generate(50, 7), generate(50, 8));
    }

    #[test]
    fn test_mostly_parseable() {
        let rows = generate(500, 42);
        assert_eq!(rows.len(), 500);
        let amounts = rows
            .iter()
            .filter_map(|r| r.amount.as_deref())
            .filter(|a| parse_amount(a, "SGD").ok)
            .count();
        let dates = rows
            .iter()
            .filter_map(|r| r.spending_date.as_deref())
            .filter(|d| parse_date(d).is_some())
            .count();
        assert!(amounts > 430, "{amounts} parseable amounts");
        assert!(dates > 430, "{dates} parseable dates");
        assert!(rows.iter().all(|r| r.person_name.is_some() && r.amount.is_some()));
        assert!(rows.iter().any(|r| r.location.is_none()));
    }

    #[test]
    fn test_write_csv_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        write_csv(&path, &generate(3, 1)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, SOURCE_COLUMNS.join(","));
        assert_eq!(text.lines().count(), 4);
    }
}
