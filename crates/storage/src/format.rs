use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use trel_common::{CsvDialect, Result, TrelError};
use trel_planner::sql::quote_str;
use trel_planner::ScanSource;

/// File formats that can be read into relations and appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    /// Newline-delimited JSON objects.
    Json,
    Parquet,
}

impl FileFormat {
    /// Detect from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Ok(FileFormat::Csv),
            "json" | "jsonl" | "ndjson" => Ok(FileFormat::Json),
            "parquet" | "pq" => Ok(FileFormat::Parquet),
            _ => Err(TrelError::InvalidConfig(format!(
                "cannot detect file format of {}; set it explicitly",
                path.display()
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Json => "jsonl",
            FileFormat::Parquet => "parquet",
        }
    }

    /// Row-oriented formats are appended in place; columnar ones are rewritten.
    pub fn is_row_oriented(self) -> bool {
        !matches!(self, FileFormat::Parquet)
    }

    /// Engine table function reading `path` in this format.
    pub fn scan_source(self, path: &Path, dialect: &CsvDialect) -> ScanSource {
        let path = path.to_string_lossy().into_owned();
        match self {
            FileFormat::Csv => ScanSource::new("read_csv", path)
                .option("delim", quote_str(&dialect.delimiter.to_string()))
                .option("quote", quote_str(&dialect.quote.to_string()))
                .option("header", dialect.header.to_string()),
            FileFormat::Json => {
                ScanSource::new("read_json", path).option("format", quote_str("newline_delimited"))
            }
            FileFormat::Parquet => ScanSource::new("read_parquet", path),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
            FileFormat::Parquet => "parquet",
        })
    }
}
