use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{EtlError, Result};
use crate::models::{RawSpendingRow, SOURCE_COLUMNS};

// ---------------------------------------------------------------------------
// Source formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceFormat {
    Csv,
    #[cfg(feature = "xlsx")]
    Xlsx,
}

const ALL_FORMATS: &[SourceFormat] = &[
    SourceFormat::Csv,
    #[cfg(feature = "xlsx")]
    SourceFormat::Xlsx,
];

impl SourceFormat {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            #[cfg(feature = "xlsx")]
            Self::Xlsx => "xlsx",
        }
    }

    fn extensions(&self) -> &[&str] {
        match self {
            Self::Csv => &["csv", "txt"],
            #[cfg(feature = "xlsx")]
            Self::Xlsx => &["xlsx", "xlsm", "xls"],
        }
    }

    pub fn detect(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        ALL_FORMATS
            .iter()
            .find(|f| f.extensions().contains(&ext.as_str()))
            .copied()
            .ok_or(EtlError::UnknownFormat(if ext.is_empty() { "(none)".to_string() } else { ext }))
    }
}

pub fn get_by_key(key: &str) -> Option<SourceFormat> {
    ALL_FORMATS
        .iter()
        .find(|f| f.key().eq_ignore_ascii_case(key))
        .copied()
}

/// Explicit `--format` wins; otherwise detect from the extension.
pub fn resolve_format(path: &Path, key: Option<&str>) -> Result<SourceFormat> {
    match key {
        Some(k) => get_by_key(k).ok_or_else(|| EtlError::UnknownFormat(k.to_string())),
        None => SourceFormat::detect(path),
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub type Record = Vec<Option<String>>;

enum Inner {
    Csv(csv::Reader<BufReader<File>>),
    Rows(std::vec::IntoIter<Record>),
}

/// Streams records from a source file, mapping columns by header name.
pub struct SourceReader {
    headers: Vec<String>,
    index: [Option<usize>; 7],
    inner: Inner,
}

fn cell(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl SourceReader {
    pub fn open(path: &Path, format: SourceFormat) -> Result<Self> {
        if !path.exists() {
            return Err(EtlError::SourceNotFound(path.to_path_buf()));
        }
        let (headers, inner) = match format {
            SourceFormat::Csv => {
                let file = File::open(path)?;
                let mut rdr = csv::ReaderBuilder::new()
                    .flexible(true)
                    .trim(csv::Trim::Headers)
                    .from_reader(BufReader::new(file));
                let headers = rdr.headers()?.iter().map(|h| h.to_string()).collect();
                (headers, Inner::Csv(rdr))
            }
            #[cfg(feature = "xlsx")]
            SourceFormat::Xlsx => {
                let mut rows = read_xlsx(path)?.into_iter();
                let headers = rows
                    .next()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|h| h.unwrap_or_default().trim().to_string())
                    .collect();
                (headers, Inner::Rows(rows))
            }
        };
        Ok(Self::with_headers(headers, inner))
    }

    fn with_headers(headers: Vec<String>, inner: Inner) -> Self {
        let mut index = [None; 7];
        for (slot, column) in index.iter_mut().zip(SOURCE_COLUMNS) {
            *slot = headers.iter().position(|h| h.eq_ignore_ascii_case(column));
        }
        Self { headers, index, inner }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Known spending columns that the file does not provide.
    pub fn missing_columns(&self) -> Vec<&'static str> {
        SOURCE_COLUMNS
            .iter()
            .zip(self.index)
            .filter(|(_, i)| i.is_none())
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        match &mut self.inner {
            Inner::Csv(rdr) => {
                let mut rec = csv::StringRecord::new();
                if !rdr.read_record(&mut rec)? {
                    return Ok(None);
                }
                Ok(Some(rec.iter().map(cell).collect()))
            }
            Inner::Rows(rows) => Ok(rows.next()),
        }
    }

    pub fn to_row(&self, record: &Record) -> RawSpendingRow {
        let mut row = RawSpendingRow::default();
        for (column, i) in SOURCE_COLUMNS.iter().zip(self.index) {
            let value = i.and_then(|i| record.get(i).cloned().flatten());
            row.set_field(column, value);
        }
        row
    }

    /// Up to `size` rows; an empty vec means the file is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Result<Vec<RawSpendingRow>> {
        let mut chunk = Vec::with_capacity(size.min(10_000));
        while chunk.len() < size.max(1) {
            match self.next_record()? {
                Some(rec) => chunk.push(self.to_row(&rec)),
                None => break,
            }
        }
        Ok(chunk)
    }
}

#[cfg(feature = "xlsx")]
fn excel_serial_to_date(serial: f64) -> Option<String> {
    // Excel epoch is 1899-12-30
    let base = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(chrono::Duration::days(serial.trunc() as i64))?;
    Some(date.format("%Y-%m-%d").to_string())
}

#[cfg(feature = "xlsx")]
fn read_xlsx(path: &Path) -> Result<Vec<Record>> {
    use calamine::{Data, Reader};

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| EtlError::Other(format!("Failed to open XLSX: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| EtlError::Other("XLSX workbook has no sheets".to_string()))?
        .map_err(|e| EtlError::Other(format!("Failed to read XLSX sheet: {e}")))?;

    let rows = range
        .rows()
        .map(|row| {
            row.iter()
                .map(|c| match c {
                    Data::Empty => None,
                    Data::String(s) => cell(s),
                    Data::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
                    Data::Float(f) => Some(f.to_string()),
                    Data::Int(i) => Some(i.to_string()),
                    Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
                    Data::DateTimeIso(s) => cell(s),
                    other => cell(&other.to_string()),
                })
                .collect()
        })
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(SourceFormat::detect(Path::new("a/b.CSV")).unwrap(), SourceFormat::Csv);
        assert!(matches!(
            SourceFormat::detect(Path::new("data.parquet")),
            Err(EtlError::UnknownFormat(ext)) if ext == "parquet"
        ));
        assert!(SourceFormat::detect(Path::new("noext")).is_err());
    }

    #[test]
    fn test_get_by_key() {
        assert_eq!(get_by_key("csv"), Some(SourceFormat::Csv));
        assert_eq!(get_by_key("parquet"), None);
        assert!(resolve_format(Path::new("x.dat"), Some("csv")).is_ok());
    }

    #[test]
    fn test_headers_are_case_insensitive_and_blanks_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            &dir,
            "in.csv",
            "Person_Name,AMOUNT,spending_date,extra\nAlice,$12.50,01-Apr-2022,x\n  ,,14/05/2024,y\n",
        );
        let mut rdr = SourceReader::open(&path, SourceFormat::Csv).unwrap();
        assert_eq!(rdr.headers().len(), 4);
        assert!(rdr.missing_columns().contains(&"location"));

        let rows = rdr.next_chunk(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].person_name.as_deref(), Some("Alice"));
        assert_eq!(rows[0].amount.as_deref(), Some("$12.50"));
        assert_eq!(rows[0].location, None);
        assert_eq!(rows[1].person_name, None);
        assert_eq!(rows[1].amount, None);
        assert!(rdr.next_chunk(10).unwrap().is_empty());
    }

    #[test]
    fn test_chunking() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::from("person_name,amount\n");
        for i in 0..5 {
            content.push_str(&format!("P{i},{i}\n"));
        }
        let path = write_csv(&dir, "in.csv", &content);
        let mut rdr = SourceReader::open(&path, SourceFormat::Csv).unwrap();
        assert_eq!(rdr.next_chunk(2).unwrap().len(), 2);
        assert_eq!(rdr.next_chunk(2).unwrap().len(), 2);
        assert_eq!(rdr.next_chunk(2).unwrap().len(), 1);
        assert_eq!(rdr.next_chunk(2).unwrap().len(), 0);
    }

    #[test]
    fn test_missing_file() {
        let err = SourceReader::open(Path::new("/no/such/file.csv"), SourceFormat::Csv);
        assert!(matches!(err, Err(EtlError::SourceNotFound(_))));
    }
}
