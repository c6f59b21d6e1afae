use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::dedup::AmountKeys;
use crate::error::{EngineError, Result};
use crate::record::{Record, NUM};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Columns of a freshly created ledger, before any amount columns.
pub const BASE_COLUMNS: &[&str] = &[
    "NUM",
    "MAKER_NM",
    "FOOD_NM_KR",
    "FOOD_CAT1_NM",
    "SERVING_SIZE",
    "NUTRI_AMOUNT_SERVING",
    "Z10500",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Rows were appended to an existing ledger.
    Append,
    /// A new ledger was written.
    Write,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Append => f.write_str("append"),
            MergeMode::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub mode: MergeMode,
    pub appended: usize,
    pub skipped: usize,
    pub columns: Vec<String>,
    /// Identifiers known to the ledger after the merge.
    pub total_known: usize,
}

/// Header and identifier set of an existing ledger.
#[derive(Debug, Clone)]
pub struct LedgerIndex {
    pub columns: Vec<String>,
    pub ids: HashSet<String>,
    pub rows: usize,
}

impl LedgerIndex {
    pub fn amount_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| crate::record::is_amount_field(c))
            .collect()
    }
}

/// Merge a deduplicated batch into the ledger at `path`.
pub fn merge(records: &[Record], path: &Path, include_amount_columns: bool) -> Result<MergeSummary> {
    if path.exists() {
        append(records, path)
    } else {
        write_new(records, path, include_amount_columns)
    }
}

/// Read the header and identifier set of an existing ledger.
pub fn inspect(path: &Path) -> Result<LedgerIndex> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    skip_bom(&mut reader).map_err(|e| EngineError::io(path, e))?;

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);
    let columns: Vec<String> = rdr
        .headers()
        .map_err(|e| EngineError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();
    let Some(num_idx) = columns.iter().position(|c| c == NUM) else {
        return Err(EngineError::Schema {
            path: path.to_path_buf(),
            column: NUM.to_string(),
        });
    };

    let mut ids = HashSet::new();
    let mut rows = 0;
    for row in rdr.records() {
        let row = row.map_err(|e| EngineError::csv(path, e))?;
        rows += 1;
        if let Some(id) = row.get(num_idx).map(str::trim).filter(|s| !s.is_empty()) {
            ids.insert(id.to_string());
        }
    }
    Ok(LedgerIndex { columns, ids, rows })
}

fn append(records: &[Record], path: &Path) -> Result<MergeSummary> {
    let LedgerIndex { columns, mut ids, .. } = inspect(path)?;

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::io(path, e))?;

    let mut skipped = 0;
    let mut fresh: Vec<&Record> = Vec::new();
    for rec in records {
        match rec.id() {
            Some(id) if !ids.contains(id) => {
                ids.insert(id.to_string());
                fresh.push(rec);
            }
            _ => skipped += 1,
        }
    }

    if !fresh.is_empty() && !ends_with_newline(&mut file).map_err(|e| EngineError::io(path, e))? {
        file.write_all(b"\r\n").map_err(|e| EngineError::io(path, e))?;
    }
    let mut writer = csv_writer(&mut file);
    for rec in &fresh {
        writer
            .write_record(row_for(rec, &columns))
            .map_err(|e| EngineError::csv(path, e))?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    let appended = fresh.len();

    info!(
        "Appended {} rows to {:?} ({} skipped, {} known)",
        appended,
        path,
        skipped,
        ids.len()
    );
    Ok(MergeSummary {
        mode: MergeMode::Append,
        appended,
        skipped,
        columns,
        total_known: ids.len(),
    })
}

fn write_new(records: &[Record], path: &Path, include_amount_columns: bool) -> Result<MergeSummary> {
    let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    if include_amount_columns {
        columns.extend(AmountKeys::collect(records).as_slice().iter().cloned());
    }

    let mut buf = BOM.to_vec();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut appended = 0;
    let mut skipped = 0;
    {
        let mut writer = csv_writer(&mut buf);
        writer
            .write_record(&columns)
            .map_err(|e| EngineError::csv(path, e))?;
        for rec in records {
            match rec.id() {
                Some(id) if seen.insert(id) => {
                    writer
                        .write_record(row_for(rec, &columns))
                        .map_err(|e| EngineError::csv(path, e))?;
                    appended += 1;
                }
                _ => skipped += 1,
            }
        }
        writer.flush().map_err(|e| EngineError::io(path, e))?;
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    fs::write(path, &buf).map_err(|e| EngineError::io(path, e))?;

    info!(
        "Wrote {} rows to new ledger {:?} ({} skipped, {} columns)",
        appended,
        path,
        skipped,
        columns.len()
    );
    Ok(MergeSummary {
        mode: MergeMode::Write,
        appended,
        skipped,
        columns,
        total_known: seen.len(),
    })
}

fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(inner)
}

/// Values for `columns`; unknown columns render empty, extra fields are dropped.
fn row_for<'a>(rec: &'a Record, columns: &'a [String]) -> impl Iterator<Item = &'a str> {
    columns.iter().map(|c| rec.get(c).unwrap_or_default())
}

fn skip_bom<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    let buf = reader.fill_buf()?;
    if buf.starts_with(BOM) {
        reader.consume(BOM.len());
    }
    Ok(())
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!("Ledger does not end with a newline; adding one before appending");
    }
    Ok(last[0] == b'\n')
}
