//! CSV sidecar metadata: the dialect and header a CSV target was first written with.
//!
//! Later appends read the sidecar instead of re-sniffing the file, so a file created with `;`
//! keeps receiving `;` rows even if the session default changed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use trel_common::{CsvDialect, Result, TrelError};

use crate::atomic::replace_atomically;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsvSidecar {
    pub delimiter: char,
    pub quote: char,
    pub header: bool,
    pub columns: Vec<String>,
}

impl CsvSidecar {
    pub fn new(dialect: &CsvDialect, columns: Vec<String>) -> Self {
        Self {
            delimiter: dialect.delimiter,
            quote: dialect.quote,
            header: dialect.header,
            columns,
        }
    }

    pub fn dialect(&self) -> CsvDialect {
        CsvDialect {
            delimiter: self.delimiter,
            quote: self.quote,
            header: self.header,
        }
    }

    /// `<file><suffix>` next to the CSV file.
    pub fn path_for(target: &Path, suffix: &str) -> PathBuf {
        let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        target.with_file_name(name)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(path)?;
        serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| TrelError::InvalidConfig(format!("bad sidecar {}: {e}", path.display())))
    }

    pub fn store(&self, path: &Path, temp_prefix: &str) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| TrelError::Execution(format!("sidecar encode failed: {e}")))?;
        replace_atomically(path, temp_prefix, |f| Ok(f.write_all(&bytes)?))
    }

    /// Appended columns must match the recorded header exactly, in order.
    pub fn check_columns(&self, target: &Path, columns: &[String]) -> Result<()> {
        if self.columns == columns {
            return Ok(());
        }
        Err(TrelError::InvalidConfig(format!(
            "csv header mismatch for {}: file has [{}], appended relation has [{}]",
            target.display(),
            self.columns.join(", "),
            columns.join(", ")
        )))
    }
}

/// Header of an existing CSV file written without a sidecar, read with `dialect`.
pub fn read_header(path: &Path, dialect: &CsvDialect) -> Result<Option<Vec<String>>> {
    if !dialect.header {
        return Ok(None);
    }
    let (delimiter, quote) = dialect.as_bytes()?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .quote(quote)
        .has_headers(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?;
    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(headers.iter().map(str::to_string).collect()))
}

/// Data rows of a CSV file, excluding the header.
pub fn count_rows(path: &Path, dialect: &CsvDialect) -> Result<u64> {
    let (delimiter, quote) = dialect.as_bytes()?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .quote(quote)
        .has_headers(dialect.header)
        .from_path(path)
        .map_err(csv_err)?;
    let mut rows = 0u64;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record).map_err(csv_err)? {
        rows += 1;
    }
    Ok(rows)
}

fn csv_err(e: csv::Error) -> TrelError {
    if e.is_io_error() {
        match e.into_kind() {
            csv::ErrorKind::Io(io) => TrelError::Io(io),
            other => TrelError::Execution(format!("csv read failed: {other:?}")),
        }
    } else {
        TrelError::Execution(format!("csv read failed: {e}"))
    }
}
