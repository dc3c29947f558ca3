use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::models::{RawSpendingRow, SOURCE_COLUMNS};
use crate::parsers::{matched_format, parse_amount};
use crate::sources::{resolve_format, SourceReader};

const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: &'static str,
    pub nulls: usize,
    pub null_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseProfile {
    pub attempted: usize,
    pub parsed: usize,
}

impl ParseProfile {
    fn observe(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.parsed += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        pct(self.parsed, self.attempted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NumericStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Everything `check` learns about a source file without touching the database.
#[derive(Debug, Clone, Serialize)]
pub struct SourceProfile {
    pub file_name: String,
    pub format: &'static str,
    pub file_size: u64,
    pub columns: Vec<String>,
    pub missing_columns: Vec<&'static str>,
    pub total_rows: usize,
    pub chunks: usize,
    pub preview: Vec<RawSpendingRow>,
    pub column_nulls: Vec<ColumnProfile>,
    pub amounts: ParseProfile,
    pub dates: ParseProfile,
    pub date_formats: BTreeMap<&'static str, usize>,
    pub amount_stats: Option<NumericStats>,
    pub negative_amounts: usize,
    pub duplicate_rows: usize,
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 10000.0).round() / 100.0
    }
}

/// Stream `path` in chunks and profile every row.
pub fn check_source(path: &Path, chunk_size: usize) -> Result<SourceProfile> {
    if !path.exists() {
        return Err(EtlError::SourceNotFound(path.to_path_buf()));
    }
    let format = resolve_format(path, None)?;
    let mut reader = SourceReader::open(path, format)?;
    info!(file = %path.display(), format = format.key(), chunk_size, "checking source file");

    let mut profile = SourceProfile {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        format: format.key(),
        file_size: std::fs::metadata(path)?.len(),
        columns: reader.headers().to_vec(),
        missing_columns: reader.missing_columns(),
        total_rows: 0,
        chunks: 0,
        preview: Vec::new(),
        column_nulls: Vec::new(),
        amounts: ParseProfile::default(),
        dates: ParseProfile::default(),
        date_formats: BTreeMap::new(),
        amount_stats: None,
        negative_amounts: 0,
        duplicate_rows: 0,
    };

    let mut nulls = [0usize; 7];
    let mut seen = HashSet::new();
    let (mut sum, mut count, mut min, mut max) = (0.0, 0usize, f64::INFINITY, f64::NEG_INFINITY);

    loop {
        let chunk = reader.next_chunk(chunk_size)?;
        if chunk.is_empty() {
            break;
        }
        profile.chunks += 1;
        profile.total_rows += chunk.len();
        if profile.chunks % 10 == 0 {
            debug!(chunks = profile.chunks, rows = profile.total_rows, "progress");
        }

        for row in chunk {
            for (n, column) in nulls.iter_mut().zip(SOURCE_COLUMNS) {
                if row.field(column).is_none() {
                    *n += 1;
                }
            }
            if let Some(raw) = row.amount.as_deref() {
                let parsed = parse_amount(raw, "SGD");
                profile.amounts.observe(parsed.ok);
                if let Some(v) = parsed.value {
                    sum += v;
                    count += 1;
                    min = min.min(v);
                    max = max.max(v);
                    if v < 0.0 {
                        profile.negative_amounts += 1;
                    }
                }
            }
            if let Some(raw) = row.spending_date.as_deref() {
                let format = matched_format(raw);
                profile.dates.observe(format.is_some());
                if let Some(f) = format {
                    *profile.date_formats.entry(f).or_default() += 1;
                }
            }
            if !seen.insert(row.clone()) {
                profile.duplicate_rows += 1;
            }
            if profile.preview.len() < PREVIEW_ROWS {
                profile.preview.push(row);
            }
        }
    }

    profile.column_nulls = SOURCE_COLUMNS
        .iter()
        .zip(nulls)
        .map(|(name, n)| ColumnProfile {
            name,
            nulls: n,
            null_pct: pct(n, profile.total_rows),
        })
        .collect();
    if count > 0 {
        profile.amount_stats = Some(NumericStats {
            count,
            min,
            max,
            mean: (sum / count as f64 * 100.0).round() / 100.0,
        });
    }
    info!(rows = profile.total_rows, chunks = profile.chunks, "source file checked");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("spending.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "person_name,spending_date,category,amount,location,description,payment_method").unwrap();
        write!(f, "{body}").unwrap();
        path
    }

    #[test]
    fn test_missing_file() {
        let err = check_source(Path::new("/no/such/file.csv"), 10).unwrap_err();
        assert!(matches!(err, EtlError::SourceNotFound(_)));
    }

    #[test]
    fn test_profile_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = csv_file(
            &dir,
            "Alice,2024-01-05,Food,$10.00,Mall,Lunch,Cash\n\
             Alice,2024-01-05,Food,$10.00,Mall,Lunch,Cash\n\
             Bob,05/01/2024,Transport,-3,,Bus,EZ-Link\n\
             Carol,whenever,Food,abc,Mall,,Cash\n",
        );
        let p = check_source(&path, 2).unwrap();
        assert_eq!(p.total_rows, 4);
        assert_eq!(p.chunks, 2);
        assert!(p.missing_columns.is_empty());
        assert_eq!(p.preview.len(), 4);
        assert_eq!(p.duplicate_rows, 1);
        assert_eq!(p.negative_amounts, 1);
        assert_eq!(p.amounts.attempted, 4);
        assert_eq!(p.amounts.parsed, 3);
        assert_eq!(p.dates.parsed, 3);
        assert_eq!(p.dates.success_rate(), 75.0);
        let location = p.column_nulls.iter().find(|c| c.name == "location").unwrap();
        assert_eq!(location.nulls, 1);
        assert_eq!(location.null_pct, 25.0);
        let stats = p.amount_stats.unwrap();
        assert_eq!(stats.min, -3.0);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.mean, 5.67);
    }

    #[test]
    fn test_reports_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        std::fs::write(&path, "person_name,amount\nAlice,5\n").unwrap();
        let p = check_source(&path, 100).unwrap();
        assert_eq!(p.missing_columns.len(), 5);
        assert_eq!(p.column_nulls.iter().find(|c| c.name == "category").unwrap().nulls, 1);
        assert_eq!(p.dates.attempted, 0);
    }
}
