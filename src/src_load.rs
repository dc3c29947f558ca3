use std::path::Path;

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::audit;
use crate::error::{EtlError, Result};
use crate::models::{CheckResult, RawSpendingRow, Severity};
use crate::sources::{SourceFormat, SourceReader};

const STAGE: &str = "SRC";
const TABLE: &str = "src_daily_spending";

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

pub struct LoadResult {
    pub batch_id: String,
    pub load_run_id: String,
    pub source_file: String,
    pub rows_loaded: usize,
    pub chunks: usize,
    pub sample: Vec<(i64, RawSpendingRow)>,
}

fn load_event(conn: &Connection, run_id: &str, event: &str, passed: bool, rows: i64, message: &str) {
    let mut check = CheckResult::new(event, Severity::Error, rows, 0).with_message(message);
    check.passed = passed;
    if let Err(e) = audit::record(conn, run_id, STAGE, TABLE, &check) {
        warn!("could not write load event {event}: {e}");
    }
}

/// Load one source file into `src_daily_spending` as a new batch.
pub fn load_source(
    conn: &Connection,
    path: &Path,
    format: SourceFormat,
    chunk_size: usize,
    force: bool,
) -> Result<LoadResult> {
    let load_run_id = audit::new_run_id("LOAD");
    if !path.exists() {
        let msg = format!("File not found: {}", path.display());
        load_event(conn, &load_run_id, "FILE_NOT_FOUND", false, 0, &msg);
        return Err(EtlError::SourceNotFound(path.to_path_buf()));
    }

    let source_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();

    let checksum = compute_checksum(path)?;
    let already_loaded = conn
        .prepare("SELECT 1 FROM src_load_files WHERE checksum = ?1")?
        .exists([&checksum])?;
    if already_loaded && !force {
        return Err(EtlError::DuplicateSource(source_file));
    }

    let batch_id = audit::new_run_id("BATCH");
    info!(batch = %batch_id, file = %source_file, "loading source");

    let tx = conn.unchecked_transaction()?;
    let outcome = insert_chunks(&tx, path, format, chunk_size, &batch_id, &source_file).and_then(|(rows, chunks)| {
        tx.execute(
            "INSERT INTO src_load_files (filename, checksum, load_batch_id, record_count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(checksum) DO UPDATE SET
                filename = excluded.filename,
                load_batch_id = excluded.load_batch_id,
                record_count = excluded.record_count,
                loaded_at = datetime('now')",
            params![source_file, checksum, batch_id, rows as i64],
        )?;
        Ok((rows, chunks))
    });

    match outcome {
        Ok((rows, chunks)) => {
            tx.commit()?;
            let msg = format!("Successfully loaded {rows} rows in {chunks} chunks");
            load_event(conn, &load_run_id, "DATA_LOAD_SUCCESS", true, rows as i64, &msg);
            info!(batch = %batch_id, rows, chunks, "load complete");
            let sample = batch_sample(conn, &batch_id, 5)?;
            Ok(LoadResult {
                batch_id,
                load_run_id,
                source_file,
                rows_loaded: rows,
                chunks,
                sample,
            })
        }
        Err(e) => {
            drop(tx);
            warn!(batch = %batch_id, "load rolled back: {e}");
            load_event(conn, &load_run_id, "DATA_LOAD_FAILED", false, 0, &format!("Load failed: {e}"));
            Err(e)
        }
    }
}

fn insert_chunks(
    conn: &Connection,
    path: &Path,
    format: SourceFormat,
    chunk_size: usize,
    batch_id: &str,
    source_file: &str,
) -> Result<(usize, usize)> {
    let mut reader = SourceReader::open(path, format)?;
    let missing = reader.missing_columns();
    if !missing.is_empty() {
        warn!("source has no column(s): {}", missing.join(", "));
    }

    let mut insert = conn.prepare(
        "INSERT INTO src_daily_spending
         (person_name, spending_date, category, amount, location, description, payment_method,
          source_file, load_batch_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut count_stmt = conn.prepare("SELECT count(*) FROM src_daily_spending WHERE load_batch_id = ?1")?;

    let mut total = 0usize;
    let mut chunks = 0usize;
    loop {
        let chunk = reader.next_chunk(chunk_size)?;
        if chunk.is_empty() {
            break;
        }
        chunks += 1;
        for row in &chunk {
            insert.execute(params![
                row.person_name,
                row.spending_date,
                row.category,
                row.amount,
                row.location,
                row.description,
                row.payment_method,
                source_file,
                batch_id,
            ])?;
        }
        let expected = (total + chunk.len()) as i64;
        let actual: i64 = count_stmt.query_row([batch_id], |r| r.get(0))?;
        if actual != expected {
            return Err(EtlError::ChunkMismatch {
                chunk: chunks,
                expected,
                actual,
            });
        }
        total += chunk.len();
        debug!(chunk = chunks, rows = chunk.len(), total, "chunk verified");
    }
    Ok((total, chunks))
}

fn batch_sample(conn: &Connection, batch_id: &str, limit: i64) -> Result<Vec<(i64, RawSpendingRow)>> {
    let mut stmt = conn.prepare(
        "SELECT src_id, person_name, spending_date, category, amount, location, description, payment_method
         FROM src_daily_spending WHERE load_batch_id = ?1 ORDER BY src_id LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![batch_id, limit], |r| {
            Ok((
                r.get(0)?,
                RawSpendingRow {
                    person_name: r.get(1)?,
                    spending_date: r.get(2)?,
                    category: r.get(3)?,
                    amount: r.get(4)?,
                    location: r.get(5)?,
                    description: r.get(6)?,
                    payment_method: r.get(7)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete every row of one load batch. Returns the number of source rows removed.
pub fn purge_batch(conn: &Connection, batch_id: &str) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let n = tx.execute("DELETE FROM src_daily_spending WHERE load_batch_id = ?1", [batch_id])?;
    tx.execute("DELETE FROM src_load_files WHERE load_batch_id = ?1", [batch_id])?;
    tx.commit()?;
    info!(batch = %batch_id, rows = n, "batch purged");
    Ok(n)
}

pub fn latest_batch(conn: &Connection) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT load_batch_id FROM src_daily_spending ORDER BY src_id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

pub struct BatchInfo {
    pub batch_id: String,
    pub source_file: Option<String>,
    pub rows: i64,
    pub loaded_at: String,
}

pub fn list_batches(conn: &Connection) -> Result<Vec<BatchInfo>> {
    let mut stmt = conn.prepare(
        "SELECT load_batch_id, MAX(source_file), count(*), MIN(loaded_at)
         FROM src_daily_spending GROUP BY load_batch_id ORDER BY MIN(src_id)",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(BatchInfo {
                batch_id: r.get(0)?,
                source_file: r.get(1)?,
                rows: r.get(2)?,
                loaded_at: r.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit;
    use crate::db::tests::test_db;
    use crate::db::count_rows;

    fn write_source(dir: &Path, name: &str, rows: usize) -> std::path::PathBuf {
        let mut content = String::from("person_name,spending_date,category,amount,location,description,payment_method\n");
        for i in 0..rows {
            content.push_str(&format!("Alice,01-Apr-2022,Food,${}.50,Hawker Centre,Lunch {i},Cash\n", i + 1));
        }
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_in_chunks() {
        let (dir, conn) = test_db();
        let path = write_source(dir.path(), "spend.csv", 7);
        let result = load_source(&conn, &path, SourceFormat::Csv, 3, false).unwrap();
        assert_eq!(result.rows_loaded, 7);
        assert_eq!(result.chunks, 3);
        assert_eq!(result.sample.len(), 5);
        assert_eq!(result.sample[0].1.amount.as_deref(), Some("$1.50"));
        assert!(result.batch_id.starts_with("BATCH_"));
        assert_eq!(count_rows(&conn, "src_daily_spending").unwrap(), 7);
        assert_eq!(count_rows(&conn, "src_load_files").unwrap(), 1);

        let log = audit::entries(&conn, Some("SRC")).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].check_name, "DATA_LOAD_SUCCESS");
        assert_eq!(log[0].records_checked, 7);
    }

    #[test]
    fn test_duplicate_file_rejected_unless_forced() {
        let (dir, conn) = test_db();
        let path = write_source(dir.path(), "spend.csv", 2);
        load_source(&conn, &path, SourceFormat::Csv, 10, false).unwrap();
        let err = load_source(&conn, &path, SourceFormat::Csv, 10, false);
        assert!(matches!(err, Err(EtlError::DuplicateSource(_))));
        assert_eq!(count_rows(&conn, "src_daily_spending").unwrap(), 2);

        load_source(&conn, &path, SourceFormat::Csv, 10, true).unwrap();
        assert_eq!(count_rows(&conn, "src_daily_spending").unwrap(), 4);
        assert_eq!(count_rows(&conn, "src_load_files").unwrap(), 1);
    }

    #[test]
    fn test_missing_file_is_logged() {
        let (dir, conn) = test_db();
        let err = load_source(&conn, &dir.path().join("nope.csv"), SourceFormat::Csv, 10, false);
        assert!(matches!(err, Err(EtlError::SourceNotFound(_))));
        let log = audit::entries(&conn, None).unwrap();
        assert_eq!(log[0].check_name, "FILE_NOT_FOUND");
        assert_eq!(log[0].check_status, "FAILED");
    }

    #[test]
    fn test_failed_load_rolls_back() {
        let (dir, conn) = test_db();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "person_name,amount\nAlice,1\nBob,2\nCarol,3\n").unwrap();
        conn.execute_batch("CREATE TRIGGER fail_after BEFORE INSERT ON src_daily_spending WHEN NEW.person_name = 'Bob' BEGIN SELECT RAISE(ABORT, 'boom'); END;").unwrap();
        assert!(load_source(&conn, &path, SourceFormat::Csv, 1, false).is_err());
        assert_eq!(count_rows(&conn, "src_daily_spending").unwrap(), 0);
        assert_eq!(count_rows(&conn, "src_load_files").unwrap(), 0);
        let log = audit::entries(&conn, None).unwrap();
        assert_eq!(log.last().unwrap().check_name, "DATA_LOAD_FAILED");
    }

    #[test]
    fn test_purge_and_latest_batch() {
        let (dir, conn) = test_db();
        let a = write_source(dir.path(), "a.csv", 2);
        let b = write_source(dir.path(), "b.csv", 3);
        let first = load_source(&conn, &a, SourceFormat::Csv, 10, false).unwrap();
        let second = load_source(&conn, &b, SourceFormat::Csv, 10, true).unwrap();
        assert_eq!(latest_batch(&conn).unwrap(), Some(second.batch_id.clone()));
        assert_eq!(list_batches(&conn).unwrap().len(), 2);

        assert_eq!(purge_batch(&conn, &second.batch_id).unwrap(), 3);
        assert_eq!(latest_batch(&conn).unwrap(), Some(first.batch_id));
        assert_eq!(purge_batch(&conn, "BATCH_missing").unwrap(), 0);
    }
}
