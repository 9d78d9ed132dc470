//! Per-format readers for rows already present in an append target.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use trel_common::{CsvDialect, Result, TrelError};

use crate::format::FileFormat;
use crate::infer::exec;

/// Reads the existing rows of one target file, shaped like the rows about to be appended.
///
/// `Ok(None)` means the scan cannot be performed in this build. Callers treat that as
/// "existing rows unknown" rather than as a failure.
pub trait TargetScanner: Send + Sync {
    fn format(&self) -> FileFormat;

    /// # Errors
    /// Returns an error when the file exists but cannot be decoded with `schema`.
    fn scan(
        &self,
        path: &Path,
        schema: &SchemaRef,
        dialect: &CsvDialect,
    ) -> Result<Option<Vec<RecordBatch>>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvScanner;

impl TargetScanner for CsvScanner {
    fn format(&self) -> FileFormat {
        FileFormat::Csv
    }

    fn scan(
        &self,
        path: &Path,
        schema: &SchemaRef,
        dialect: &CsvDialect,
    ) -> Result<Option<Vec<RecordBatch>>> {
        let (delimiter, quote) = dialect.as_bytes()?;
        let reader = arrow::csv::ReaderBuilder::new(schema.clone())
            .with_header(dialect.header)
            .with_delimiter(delimiter)
            .with_quote(quote)
            .build(File::open(path)?)
            .map_err(|e| exec("csv target scan", path, e))?;
        reader
            .map(|b| b.map_err(|e| exec("csv target scan", path, e)))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonScanner;

impl TargetScanner for JsonScanner {
    fn format(&self) -> FileFormat {
        FileFormat::Json
    }

    fn scan(
        &self,
        path: &Path,
        schema: &SchemaRef,
        _dialect: &CsvDialect,
    ) -> Result<Option<Vec<RecordBatch>>> {
        let reader = arrow::json::ReaderBuilder::new(schema.clone())
            .build(BufReader::new(File::open(path)?))
            .map_err(|e| exec("json target scan", path, e))?;
        reader
            .map(|b| b.map_err(|e| exec("json target scan", path, e)))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetScanner;

impl TargetScanner for ParquetScanner {
    fn format(&self) -> FileFormat {
        FileFormat::Parquet
    }

    #[cfg(feature = "parquet")]
    fn scan(
        &self,
        path: &Path,
        schema: &SchemaRef,
        _dialect: &CsvDialect,
    ) -> Result<Option<Vec<RecordBatch>>> {
        crate::infer::read_parquet(path)?
            .iter()
            .map(|b| conform(b, schema, path))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    #[cfg(not(feature = "parquet"))]
    fn scan(
        &self,
        _path: &Path,
        _schema: &SchemaRef,
        _dialect: &CsvDialect,
    ) -> Result<Option<Vec<RecordBatch>>> {
        Ok(None)
    }
}

/// Scanner for `format` among the built-in ones.
pub fn default_scanner(format: FileFormat) -> Box<dyn TargetScanner> {
    match format {
        FileFormat::Csv => Box::new(CsvScanner),
        FileFormat::Json => Box::new(JsonScanner),
        FileFormat::Parquet => Box::new(ParquetScanner),
    }
}

/// Project `batch` onto `schema` by column name, casting where the stored type differs.
pub fn conform(batch: &RecordBatch, schema: &SchemaRef, path: &Path) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let idx = batch
                .schema()
                .fields()
                .iter()
                .position(|f| f.name().eq_ignore_ascii_case(field.name()))
                .ok_or_else(|| {
                    TrelError::InvalidConfig(format!(
                        "target {} has no column '{}'",
                        path.display(),
                        field.name()
                    ))
                })?;
            let col = batch.column(idx);
            if col.data_type() == field.data_type() {
                Ok(col.clone())
            } else {
                arrow::compute::cast(col, field.data_type())
                    .map_err(|e| exec(&format!("cast of '{}'", field.name()), path, e))
            }
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    RecordBatch::try_new(schema.clone(), columns).map_err(|e| exec("conform", path, e))
}
