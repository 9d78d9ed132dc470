//! Local schema inference and batch reading for file sources and append targets.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use trel_common::{CsvDialect, Result, TrelError};

use crate::format::FileFormat;

/// Infer the arrow schema of `path`.
///
/// CSV and JSON sample up to `max_records` records; Parquet reads the footer.
pub fn infer_schema(
    path: &Path,
    format: FileFormat,
    dialect: &CsvDialect,
    max_records: Option<usize>,
) -> Result<Schema> {
    match format {
        FileFormat::Csv => {
            let (delimiter, quote) = dialect.as_bytes()?;
            let mut file = File::open(path)?;
            let (schema, _) = Format::default()
                .with_header(dialect.header)
                .with_delimiter(delimiter)
                .with_quote(quote)
                .infer_schema(&mut file, max_records)
                .map_err(|e| exec("csv schema inference", path, e))?;
            Ok(schema)
        }
        FileFormat::Json => {
            let mut reader = BufReader::new(File::open(path)?);
            let (schema, _) = arrow::json::reader::infer_json_schema(&mut reader, max_records)
                .map_err(|e| exec("json schema inference", path, e))?;
            Ok(schema)
        }
        FileFormat::Parquet => parquet_schema(path),
    }
}

#[cfg(feature = "parquet")]
fn parquet_schema(path: &Path) -> Result<Schema> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)
        .map_err(|e| exec("parquet footer read", path, e))?;
    Ok(builder.schema().as_ref().clone())
}

#[cfg(not(feature = "parquet"))]
fn parquet_schema(path: &Path) -> Result<Schema> {
    Err(TrelError::Unsupported(format!(
        "parquet support is not compiled in; cannot read {}",
        path.display()
    )))
}

/// Read every row of `path` as `schema`.
pub fn read_batches(
    path: &Path,
    format: FileFormat,
    schema: SchemaRef,
    dialect: &CsvDialect,
) -> Result<Vec<RecordBatch>> {
    match format {
        FileFormat::Csv => {
            let (delimiter, quote) = dialect.as_bytes()?;
            let reader = arrow::csv::ReaderBuilder::new(schema)
                .with_header(dialect.header)
                .with_delimiter(delimiter)
                .with_quote(quote)
                .build(File::open(path)?)
                .map_err(|e| exec("csv reader open", path, e))?;
            reader
                .map(|b| b.map_err(|e| exec("csv decode", path, e)))
                .collect()
        }
        FileFormat::Json => {
            let reader = arrow::json::ReaderBuilder::new(schema)
                .build(BufReader::new(File::open(path)?))
                .map_err(|e| exec("json reader open", path, e))?;
            reader
                .map(|b| b.map_err(|e| exec("json decode", path, e)))
                .collect()
        }
        FileFormat::Parquet => read_parquet(path),
    }
}

#[cfg(feature = "parquet")]
pub(crate) fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)
        .map_err(|e| exec("parquet reader build", path, e))?
        .build()
        .map_err(|e| exec("parquet reader open", path, e))?;
    reader
        .map(|b| b.map_err(|e| exec("parquet decode", path, e)))
        .collect()
}

#[cfg(not(feature = "parquet"))]
pub(crate) fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    parquet_schema(path).map(|_| Vec::new())
}

/// Arrow schema shared by the batches of `path` when read without a caller schema.
pub fn inferred_schema_ref(
    path: &Path,
    format: FileFormat,
    dialect: &CsvDialect,
    max_records: Option<usize>,
) -> Result<SchemaRef> {
    infer_schema(path, format, dialect, max_records).map(Arc::new)
}

pub(crate) fn exec(what: &str, path: &Path, err: impl std::fmt::Display) -> TrelError {
    TrelError::Execution(format!("{what} failed for {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use arrow::array::{Array, Int64Array, StringArray};
    use arrow_schema::DataType;

    use super::*;

    fn unique_path(prefix: &str, ext: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
    }

    #[test]
    fn csv_inference_uses_the_dialect() {
        let path = unique_path("trel_infer", "csv");
        fs::write(&path, "id;name\n1;ada\n2;bob\n").expect("write csv");
        let dialect = CsvDialect {
            delimiter: ';',
            ..CsvDialect::default()
        };
        let schema = infer_schema(&path, FileFormat::Csv, &dialect, Some(10)).expect("infer");
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);

        let batches =
            read_batches(&path, FileFormat::Csv, Arc::new(schema), &dialect).expect("read");
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
        let names = batches[0]
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(names.value(1), "bob");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn json_inference_reads_newline_delimited_objects() {
        let path = unique_path("trel_infer", "jsonl");
        fs::write(&path, "{\"id\": 1, \"tag\": \"a\"}\n{\"id\": 2, \"tag\": null}\n")
            .expect("write json");
        let schema = inferred_schema_ref(&path, FileFormat::Json, &CsvDialect::default(), None)
            .expect("infer");
        let batches = read_batches(&path, FileFormat::Json, schema, &CsvDialect::default())
            .expect("read");
        let ids = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64");
        assert_eq!(ids.len(), 2);
        assert!(batches[0].column(1).is_null(1));
        let _ = fs::remove_file(path);
    }
}
