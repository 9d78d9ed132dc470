//! The append policy engine.
//!
//! Appending runs in two phases. [`AppendEngine::simulate`] and [`AppendEngine::execute`]
//! share the same preparation: validate the options, route rows to partitions, drop rows
//! already present in the target, then split what is left across rollover files. Simulation
//! stops there and only reads target metadata; execution performs the writes.
//!
//! Row-oriented targets (CSV, JSON lines) are appended in place. Parquet targets are rewritten
//! to a temporary file that replaces the original only once it is complete.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, UInt32Array};
use arrow::compute::{concat_batches, nullif, take_record_batch};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow_schema::{DataType, SchemaRef};
use tracing::{debug, info, warn};
use trel_common::{CsvDialect, Result, SessionConfig, TrelError};

use crate::format::FileFormat;
use crate::infer::exec;
use crate::plan::{AppendAction, AppendPlan};
use crate::policy::{AppendOptions, DedupePolicy, PartitionMode, PartitionSpec, RolloverPolicy};
use crate::scanner::{default_scanner, TargetScanner};
use crate::sidecar::{self, CsvSidecar};

/// Partition identifier used for null partition values.
pub const NULL_PARTITION: &str = "__null__";

pub struct AppendEngine {
    config: SessionConfig,
    scanners: HashMap<FileFormat, Box<dyn TargetScanner>>,
}

/// How an existing (or about to be created) CSV file is written.
#[derive(Debug, Clone)]
struct CsvLayout {
    dialect: CsvDialect,
    /// Sidecar to persist after the write; `None` when an up-to-date one exists.
    store: Option<CsvSidecar>,
}

struct PendingWrite {
    action: AppendAction,
    format: FileFormat,
    batch: RecordBatch,
    csv: Option<CsvLayout>,
}

struct Prepared {
    plan: AppendPlan,
    writes: Vec<PendingWrite>,
}

struct Chunk {
    path: PathBuf,
    rows: u64,
    created: bool,
}

impl AppendEngine {
    pub fn new(config: SessionConfig) -> Self {
        let scanners = [FileFormat::Csv, FileFormat::Json, FileFormat::Parquet]
            .into_iter()
            .map(|f| (f, default_scanner(f)))
            .collect();
        Self { config, scanners }
    }

    /// Replace the scanner used for `scanner.format()` targets.
    pub fn with_scanner(mut self, scanner: Box<dyn TargetScanner>) -> Self {
        self.scanners.insert(scanner.format(), scanner);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Compute the write actions for appending `batches` to `target` without writing anything.
    pub fn simulate(
        &self,
        target: &Path,
        schema: &SchemaRef,
        batches: &[RecordBatch],
        options: &AppendOptions,
    ) -> Result<AppendPlan> {
        let prepared = self.prepare(target, schema, batches, options)?;
        info!(
            path = %target.display(),
            actions = prepared.plan.actions.len(),
            rows = prepared.plan.total_rows(),
            "append plan simulated"
        );
        Ok(prepared.plan)
    }

    /// Append `batches` to `target` and return the plan that was carried out.
    ///
    /// # Errors
    /// Configuration problems are reported before any file is touched. Filesystem errors are
    /// returned unchanged; a failed parquet rewrite leaves the previous file in place.
    pub fn execute(
        &self,
        target: &Path,
        schema: &SchemaRef,
        batches: &[RecordBatch],
        options: &AppendOptions,
    ) -> Result<AppendPlan> {
        let prepared = self.prepare(target, schema, batches, options)?;
        for write in &prepared.writes {
            self.write(write)?;
        }
        info!(
            path = %target.display(),
            actions = prepared.plan.actions.len(),
            rows = prepared.plan.total_rows(),
            "append executed"
        );
        Ok(prepared.plan)
    }

    fn prepare(
        &self,
        target: &Path,
        schema: &SchemaRef,
        batches: &[RecordBatch],
        options: &AppendOptions,
    ) -> Result<Prepared> {
        options.validate(schema)?;
        let format = resolve_format(target, options)?;
        let batch = concat_batches(schema, batches).map_err(|e| exec("input concat", target, e))?;

        let partition_ids = options
            .partition
            .as_ref()
            .map(|spec| partition_ids(&batch, spec, target))
            .transpose()?;
        let written = match &options.partition {
            Some(spec) if spec.drop_source => {
                let drop = spec.source_index(schema)?;
                let keep = (0..schema.fields().len())
                    .filter(|i| *i != drop)
                    .collect::<Vec<_>>();
                batch
                    .project(&keep)
                    .map_err(|e| exec("partition column drop", target, e))?
            }
            _ => batch,
        };
        let columns = written
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect::<Vec<_>>();

        let mut notes = Vec::new();
        let kept = match &options.dedupe {
            Some(policy) => {
                self.dedupe(target, format, options, policy, &written, &columns, &mut notes)?
            }
            None => (0..written.num_rows() as u32).collect(),
        };

        let mut groups: BTreeMap<Option<String>, Vec<u32>> = BTreeMap::new();
        for row in kept {
            let id = partition_ids.as_ref().map(|ids| ids[row as usize].clone());
            groups.entry(id).or_default().push(row);
        }

        let mut actions = Vec::new();
        let mut writes = Vec::new();
        for (partition, rows) in groups {
            let base = match &partition {
                Some(id) => target.join(id).join(format!("part.{}", format.extension())),
                None => target.to_path_buf(),
            };
            let group = take_record_batch(&written, &UInt32Array::from(rows))
                .map_err(|e| exec("partition routing", target, e))?;
            let chunks = self.allocate(
                &base,
                format,
                group.num_rows() as u64,
                options.rollover.as_ref(),
                &columns,
            )?;
            let mut offset = 0usize;
            for chunk in chunks {
                let csv = match format {
                    FileFormat::Csv => Some(self.csv_layout(&chunk.path, &columns)?),
                    FileFormat::Parquet if !chunk.created => {
                        check_parquet_columns(&chunk.path, &columns)?;
                        None
                    }
                    _ => None,
                };
                let len = chunk.rows as usize;
                let action = AppendAction {
                    path: chunk.path,
                    rows_to_append: chunk.rows,
                    created: chunk.created,
                    partition: partition.clone(),
                };
                writes.push(PendingWrite {
                    action: action.clone(),
                    format,
                    batch: group.slice(offset, len),
                    csv,
                });
                actions.push(action);
                offset += len;
            }
        }
        if actions.is_empty() {
            notes.push("nothing to append".to_string());
        }
        debug!(
            path = %target.display(),
            %format,
            actions = actions.len(),
            "append plan prepared"
        );
        Ok(Prepared {
            plan: AppendPlan { actions, notes },
            writes,
        })
    }

    /// Indices of the rows of `written` that are in neither the target nor earlier in `written`.
    #[allow(clippy::too_many_arguments)]
    fn dedupe(
        &self,
        target: &Path,
        format: FileFormat,
        options: &AppendOptions,
        policy: &DedupePolicy,
        written: &RecordBatch,
        columns: &[String],
        notes: &mut Vec<String>,
    ) -> Result<Vec<u32>> {
        let schema = written.schema();
        let all = (0..written.num_rows() as u32).collect::<Vec<_>>();
        let keys = policy.key_indices(&schema)?;
        let converter = RowConverter::new(
            keys.iter()
                .map(|&i| SortField::new(schema.field(i).data_type().clone()))
                .collect(),
        )
        .map_err(|e| exec("de-duplication key encoding", target, e))?;
        let key_columns = |b: &RecordBatch| {
            keys.iter()
                .map(|&i| match format {
                    FileFormat::Csv => csv_stored_form(b.column(i), target),
                    _ => Ok(b.column(i).clone()),
                })
                .collect::<Result<Vec<ArrayRef>>>()
        };

        let scanner = self
            .scanners
            .get(&format)
            .ok_or_else(|| TrelError::Unsupported(format!("no scanner for {format} targets")))?;
        let mut seen = HashSet::new();
        for path in self.existing_files(target, format, options)? {
            let dialect = match format {
                FileFormat::Csv => self.csv_layout(&path, columns)?.dialect,
                _ => self.config.csv,
            };
            let Some(batches) = scanner.scan(&path, &schema, &dialect)? else {
                warn!(
                    path = %path.display(),
                    %format,
                    "existing rows cannot be scanned; de-duplication skipped"
                );
                notes.push(format!(
                    "de-duplication skipped: scan unavailable for {format} target {}",
                    path.display()
                ));
                return Ok(all);
            };
            for b in &batches {
                let rows = converter
                    .convert_columns(&key_columns(b)?)
                    .map_err(|e| exec("de-duplication key encoding", &path, e))?;
                seen.extend(rows.iter().map(|r| r.owned()));
            }
        }

        let rows = converter
            .convert_columns(&key_columns(written)?)
            .map_err(|e| exec("de-duplication key encoding", target, e))?;
        let kept = all
            .into_iter()
            .filter(|&i| seen.insert(rows.row(i as usize).owned()))
            .collect::<Vec<_>>();
        let removed = written.num_rows() - kept.len();
        if removed > 0 {
            notes.push(format!(
                "de-duplication removed {removed} of {} rows",
                written.num_rows()
            ));
        }
        Ok(kept)
    }

    /// Data files of `target` that hold rows relevant to de-duplication.
    fn existing_files(
        &self,
        target: &Path,
        format: FileFormat,
        options: &AppendOptions,
    ) -> Result<Vec<PathBuf>> {
        if options.partition.is_some() {
            let mut out = Vec::new();
            if target.is_dir() {
                self.walk(target, format, &mut out)?;
            }
            out.sort();
            return Ok(out);
        }
        let mut out = Vec::new();
        if !is_new(target)? {
            out.push(target.to_path_buf());
        }
        if options.rollover.is_some() {
            let mut index = 1;
            loop {
                let path = series_path(target, index);
                if !path.exists() {
                    break;
                }
                if !is_new(&path)? {
                    out.push(path);
                }
                index += 1;
            }
        }
        Ok(out)
    }

    fn walk(&self, dir: &Path, format: FileFormat, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, format, out)?;
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.starts_with(&self.config.temp_prefix)
                || name.ends_with(&self.config.sidecar_suffix)
            {
                continue;
            }
            if FileFormat::from_path(&path).ok() == Some(format) && !is_new(&path)? {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Split `rows` across `base` and its rollover successors.
    fn allocate(
        &self,
        base: &Path,
        format: FileFormat,
        rows: u64,
        rollover: Option<&RolloverPolicy>,
        columns: &[String],
    ) -> Result<Vec<Chunk>> {
        if rows == 0 {
            return Ok(Vec::new());
        }
        let Some(policy) = rollover else {
            return Ok(vec![Chunk {
                path: base.to_path_buf(),
                rows,
                created: is_new(base)?,
            }]);
        };

        let mut index = 0;
        while series_path(base, index + 1).exists() {
            index += 1;
        }
        let mut path = series_path(base, index);
        let mut created = is_new(&path)?;
        let mut used = 0;
        if !created {
            if policy.max_rows.is_some() {
                used = self.current_rows(&path, format, columns)?;
            }
            if policy.is_full(used, fs::metadata(&path)?.len()) {
                index += 1;
                path = series_path(base, index);
                info!(full = used, next = %path.display(), "rollover threshold reached");
                created = true;
                used = 0;
            }
        }

        let mut chunks = Vec::new();
        let mut remaining = rows;
        while remaining > 0 {
            let room = policy
                .max_rows
                .map_or(remaining, |max| max.saturating_sub(used));
            if room == 0 {
                index += 1;
                path = series_path(base, index);
                info!(full = used, next = %path.display(), "rollover threshold reached");
                created = true;
                used = 0;
                continue;
            }
            let take = room.min(remaining);
            chunks.push(Chunk {
                path: path.clone(),
                rows: take,
                created,
            });
            remaining -= take;
            used += take;
        }
        Ok(chunks)
    }

    fn current_rows(&self, path: &Path, format: FileFormat, columns: &[String]) -> Result<u64> {
        match format {
            FileFormat::Csv => {
                let layout = self.csv_layout(path, columns)?;
                sidecar::count_rows(path, &layout.dialect)
            }
            FileFormat::Json => {
                let mut rows = 0;
                for line in BufReader::new(File::open(path)?).lines() {
                    if !line?.trim().is_empty() {
                        rows += 1;
                    }
                }
                Ok(rows)
            }
            FileFormat::Parquet => parquet_rows(path),
        }
    }

    /// Dialect for `path`, validating an existing header against `columns`.
    fn csv_layout(&self, path: &Path, columns: &[String]) -> Result<CsvLayout> {
        let fresh = CsvSidecar::new(&self.config.csv, columns.to_vec());
        if is_new(path)? {
            return Ok(CsvLayout {
                dialect: self.config.csv,
                store: Some(fresh),
            });
        }
        let sidecar_path = CsvSidecar::path_for(path, &self.config.sidecar_suffix);
        if let Some(existing) = CsvSidecar::load(&sidecar_path)? {
            existing.check_columns(path, columns)?;
            return Ok(CsvLayout {
                dialect: existing.dialect(),
                store: None,
            });
        }
        if let Some(header) = sidecar::read_header(path, &self.config.csv)? {
            CsvSidecar::new(&self.config.csv, header).check_columns(path, columns)?;
        }
        Ok(CsvLayout {
            dialect: self.config.csv,
            store: Some(fresh),
        })
    }

    fn write(&self, write: &PendingWrite) -> Result<()> {
        let path = &write.action.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        match write.format {
            FileFormat::Csv => self.append_csv(write)?,
            FileFormat::Json => append_json(path, &write.batch)?,
            FileFormat::Parquet => self.replace_parquet(path, &write.batch, write.action.created)?,
        }
        debug!(
            path = %path.display(),
            rows = write.action.rows_to_append,
            created = write.action.created,
            "append action written"
        );
        Ok(())
    }

    fn append_csv(&self, write: &PendingWrite) -> Result<()> {
        let path = &write.action.path;
        let layout = write
            .csv
            .as_ref()
            .ok_or_else(|| TrelError::Execution(format!("no csv layout for {}", path.display())))?;
        let (delimiter, quote) = layout.dialect.as_bytes()?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(write.action.created && layout.dialect.header)
            .with_delimiter(delimiter)
            .with_quote(quote)
            .build(file);
        writer
            .write(&write.batch)
            .map_err(|e| exec("csv append", path, e))?;
        writer.into_inner().sync_data()?;
        if let Some(sidecar) = &layout.store {
            sidecar.store(
                &CsvSidecar::path_for(path, &self.config.sidecar_suffix),
                &self.config.temp_prefix,
            )?;
        }
        Ok(())
    }

    #[cfg(feature = "parquet")]
    fn replace_parquet(&self, path: &Path, batch: &RecordBatch, created: bool) -> Result<()> {
        use parquet::arrow::ArrowWriter;

        let schema = batch.schema();
        let mut all = if created {
            Vec::new()
        } else {
            crate::infer::read_parquet(path)?
                .iter()
                .map(|b| crate::scanner::conform(b, &schema, path))
                .collect::<Result<Vec<_>>>()?
        };
        all.push(batch.clone());
        crate::atomic::replace_atomically(path, &self.config.temp_prefix, |file| {
            let mut writer = ArrowWriter::try_new(file, schema.clone(), None)
                .map_err(|e| exec("parquet writer open", path, e))?;
            for b in &all {
                writer.write(b).map_err(|e| exec("parquet write", path, e))?;
            }
            writer.close().map_err(|e| exec("parquet close", path, e))?;
            Ok(())
        })
    }

    #[cfg(not(feature = "parquet"))]
    fn replace_parquet(&self, path: &Path, _batch: &RecordBatch, _created: bool) -> Result<()> {
        Err(TrelError::Unsupported(format!(
            "parquet support is not compiled in; cannot write {}",
            path.display()
        )))
    }
}

fn append_json(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = arrow::json::LineDelimitedWriter::new(file);
    writer.write(batch).map_err(|e| exec("json append", path, e))?;
    writer.finish().map_err(|e| exec("json append", path, e))?;
    writer.into_inner().sync_data()?;
    Ok(())
}

/// `column` as a CSV target stores it. Empty strings and nulls share the empty field, and both
/// read back as null.
fn csv_stored_form(column: &ArrayRef, target: &Path) -> Result<ArrayRef> {
    let empty: BooleanArray = match column.data_type() {
        DataType::Utf8 => column
            .as_string::<i32>()
            .iter()
            .map(|v| Some(v == Some("")))
            .collect(),
        DataType::LargeUtf8 => column
            .as_string::<i64>()
            .iter()
            .map(|v| Some(v == Some("")))
            .collect(),
        _ => return Ok(column.clone()),
    };
    if empty.true_count() == 0 {
        return Ok(column.clone());
    }
    nullif(column.as_ref(), &empty).map_err(|e| exec("csv key normalization", target, e))
}

/// An existing parquet file is rewritten with the appended columns only, so both must name
/// the same columns. Order and case may differ.
#[cfg(feature = "parquet")]
fn check_parquet_columns(path: &Path, columns: &[String]) -> Result<()> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)
        .map_err(|e| exec("parquet footer read", path, e))?;
    let stored = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    let folded = |names: &[String]| {
        let mut names = names.iter().map(|n| n.to_lowercase()).collect::<Vec<_>>();
        names.sort();
        names
    };
    if folded(&stored) == folded(columns) {
        return Ok(());
    }
    Err(TrelError::InvalidConfig(format!(
        "parquet schema mismatch for {}: file has [{}], appended relation has [{}]",
        path.display(),
        stored.join(", "),
        columns.join(", ")
    )))
}

#[cfg(not(feature = "parquet"))]
fn check_parquet_columns(_path: &Path, _columns: &[String]) -> Result<()> {
    Ok(())
}

#[cfg(feature = "parquet")]
fn parquet_rows(path: &Path) -> Result<u64> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)
        .map_err(|e| exec("parquet footer read", path, e))?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
}

#[cfg(not(feature = "parquet"))]
fn parquet_rows(path: &Path) -> Result<u64> {
    Err(TrelError::Unsupported(format!(
        "parquet support is not compiled in; cannot count rows of {}",
        path.display()
    )))
}

fn resolve_format(target: &Path, options: &AppendOptions) -> Result<FileFormat> {
    if options.partition.is_some() {
        if target.is_file() {
            return Err(TrelError::InvalidConfig(format!(
                "partitioned target {} is a file, expected a directory",
                target.display()
            )));
        }
        return options.format.ok_or_else(|| {
            TrelError::InvalidConfig("partitioned targets need an explicit file format".to_string())
        });
    }
    if target.is_dir() {
        return Err(TrelError::InvalidConfig(format!(
            "target {} is a directory; set a partition spec to append to it",
            target.display()
        )));
    }
    match options.format {
        Some(format) => Ok(format),
        None => FileFormat::from_path(target),
    }
}

/// Missing and zero-length files are both written as new files.
fn is_new(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// `data.csv`, `data_1.csv`, `data_2.csv`, ...
pub fn series_path(base: &Path, index: u32) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{index}"),
    };
    base.with_file_name(name)
}

fn partition_ids(batch: &RecordBatch, spec: &PartitionSpec, target: &Path) -> Result<Vec<String>> {
    let column = batch.column(spec.source_index(&batch.schema())?);
    let formatter = ArrayFormatter::try_new(column.as_ref(), &FormatOptions::default())
        .map_err(|e| exec("partition value formatting", target, e))?;
    let label = sanitize(spec.display_label());
    Ok((0..batch.num_rows())
        .map(|i| {
            let value = (!column.is_null(i)).then(|| formatter.value(i).to_string());
            match spec.mode {
                PartitionMode::Column => {
                    let value = value.map_or_else(|| NULL_PARTITION.to_string(), |v| sanitize(&v));
                    format!("{label}={value}")
                }
                PartitionMode::Hash { buckets } => {
                    let hash = match &value {
                        Some(v) => fnv1a(v.as_bytes()),
                        None => fnv1a(NULL_PARTITION.as_bytes()) ^ 1,
                    };
                    format!("bucket={}", hash % u64::from(buckets))
                }
            }
        })
        .collect())
}

/// Partition values become directory names; path separators and dot-only names are replaced.
fn sanitize(value: &str) -> String {
    if value.is_empty() {
        return "__empty__".to_string();
    }
    if value.chars().all(|c| c == '.') {
        return value.replace('.', "_");
    }
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}
