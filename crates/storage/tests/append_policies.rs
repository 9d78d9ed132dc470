mod support;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use trel_common::{CsvDialect, Result, SessionConfig, TrelError};
use trel_storage::{
    AppendEngine, AppendOptions, CsvSidecar, DedupePolicy, FileFormat, PartitionSpec,
    RolloverPolicy, TargetScanner,
};

use support::*;

#[test]
fn row_rollover_splits_appends_across_numbered_files() {
    let dir = unique_dir("trel_rollover");
    let target = dir.join("events.csv");
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default().rollover(RolloverPolicy::rows(2));

    let first = engine
        .execute(&target, &people_schema(), &[people(&[1, 2], &["a", "b"])], &opts)
        .expect("first append");
    let second = engine
        .execute(&target, &people_schema(), &[people(&[3, 4], &["c", "d"])], &opts)
        .expect("second append");
    let third = engine
        .execute(&target, &people_schema(), &[people(&[5], &["e"])], &opts)
        .expect("third append");

    let paths = [first, second, third]
        .iter()
        .map(|plan| {
            assert_eq!(plan.actions.len(), 1, "{plan}");
            assert!(plan.actions[0].created);
            plan.actions[0].path.clone()
        })
        .collect::<Vec<_>>();
    assert_eq!(paths[0], dir.join("events.csv"));
    assert_eq!(paths[1], dir.join("events_1.csv"));
    assert_eq!(paths[2], dir.join("events_2.csv"));
    for (path, expected) in paths.iter().zip([2, 2, 1]) {
        assert_eq!(lines(path).len(), expected + 1, "{}", path.display());
        assert!(CsvSidecar::path_for(path, ".trel.json").exists());
    }
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn a_single_call_larger_than_the_cap_fills_then_rolls() {
    let dir = unique_dir("trel_rollover_split");
    let target = dir.join("events.jsonl");
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default().rollover(RolloverPolicy::rows(2));

    engine
        .execute(&target, &people_schema(), &[people(&[1], &["a"])], &opts)
        .expect("seed");
    let plan = engine
        .simulate(
            &target,
            &people_schema(),
            &[people(&[2, 3, 4, 5], &["b", "c", "d", "e"])],
            &opts,
        )
        .expect("simulate");
    let shape = plan
        .actions
        .iter()
        .map(|a| {
            (
                a.path.file_name().expect("name").to_string_lossy().into_owned(),
                a.rows_to_append,
                a.created,
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        shape,
        vec![
            ("events.jsonl".to_string(), 1, false),
            ("events_1.jsonl".to_string(), 2, true),
            ("events_2.jsonl".to_string(), 1, true),
        ]
    );
    assert!(!dir.join("events_1.jsonl").exists(), "simulation wrote a file");
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn key_dedupe_appends_only_unseen_keys() {
    let dir = unique_dir("trel_dedupe_keys");
    let target = dir.join("people.parquet");
    write_parquet(&target, &people(&[2, 3], &["b", "c"]));
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default().dedupe(DedupePolicy::keys(["id"]));
    let incoming = people(&[1, 2, 3], &["a", "changed", "c"]);

    let plan = engine
        .simulate(&target, &people_schema(), &[incoming.clone()], &opts)
        .expect("simulate");
    assert_eq!(plan.total_rows(), 1);
    assert_eq!(plan.actions.len(), 1);
    assert!(!plan.actions[0].created);
    assert!(plan.notes.iter().any(|n| n.contains("removed 2 of 3")), "{plan}");

    engine
        .execute(&target, &people_schema(), &[incoming], &opts)
        .expect("execute");
    let mut ids = parquet_ids(&target);
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
    let leftovers = fs::read_dir(&dir)
        .expect("list")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".trel-tmp-"))
        .count();
    assert_eq!(leftovers, 0);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn dedupe_is_idempotent_across_executions() {
    let dir = unique_dir("trel_dedupe_idem");
    let target = dir.join("people.csv");
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default().dedupe(DedupePolicy::AllColumns);
    let rows = people(&[1, 2, 2], &["a", "b", "b"]);

    let first = engine
        .execute(&target, &people_schema(), &[rows.clone()], &opts)
        .expect("first");
    assert_eq!(first.total_rows(), 2, "in-source duplicates are dropped too");
    let second = engine
        .execute(&target, &people_schema(), &[rows], &opts)
        .expect("second");
    assert_eq!(second.total_rows(), 0);
    assert!(second.actions.is_empty());
    assert!(second.notes.iter().any(|n| n == "nothing to append"));
    assert_eq!(lines(&target).len(), 3);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn csv_dedupe_is_idempotent_with_empty_strings() {
    let dir = unique_dir("trel_dedupe_empty");
    let target = dir.join("people.csv");
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default().dedupe(DedupePolicy::AllColumns);
    let rows = people(&[1, 2], &["", "x"]);

    let first = engine
        .execute(&target, &people_schema(), &[rows.clone()], &opts)
        .expect("first");
    assert_eq!(first.total_rows(), 2);
    let before = fs::read_to_string(&target).expect("read");
    let second = engine
        .execute(&target, &people_schema(), &[rows], &opts)
        .expect("second");
    assert_eq!(second.total_rows(), 0, "{second}");
    assert_eq!(fs::read_to_string(&target).expect("read"), before);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn parquet_append_with_different_columns_fails_before_writing() {
    let dir = unique_dir("trel_parquet_mismatch");
    let target = dir.join("t.parquet");
    let wide = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("extra", DataType::Utf8, true),
    ]));
    let seed = RecordBatch::try_new(
        wide,
        vec![
            Arc::new(Int64Array::from(vec![1])) as ArrayRef,
            Arc::new(StringArray::from(vec!["a"])) as ArrayRef,
            Arc::new(StringArray::from(vec!["keep me"])) as ArrayRef,
        ],
    )
    .expect("seed");
    write_parquet(&target, &seed);
    let before = fs::read(&target).expect("read");
    let engine = AppendEngine::new(SessionConfig::default());

    for opts in [
        AppendOptions::default(),
        AppendOptions::default().dedupe(DedupePolicy::AllColumns),
    ] {
        let err = engine
            .execute(&target, &people_schema(), &[people(&[2], &["b"])], &opts)
            .expect_err("column mismatch");
        assert!(matches!(err, TrelError::InvalidConfig(_)), "{err}");
        assert!(err.to_string().contains("extra"), "{err}");
    }
    assert_eq!(fs::read(&target).expect("read"), before);

    let reordered = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("EXTRA", DataType::Utf8, true),
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])),
        vec![
            Arc::new(StringArray::from(vec!["z"])) as ArrayRef,
            Arc::new(Int64Array::from(vec![3])) as ArrayRef,
            Arc::new(StringArray::from(vec!["c"])) as ArrayRef,
        ],
    )
    .expect("reordered");
    let plan = engine
        .execute(&target, &reordered.schema(), &[reordered], &AppendOptions::default())
        .expect("same columns in another order");
    assert_eq!(plan.total_rows(), 1);
    let _ = fs::remove_dir_all(dir);
}

struct UnavailableScanner;

impl TargetScanner for UnavailableScanner {
    fn format(&self) -> FileFormat {
        FileFormat::Json
    }

    fn scan(
        &self,
        _path: &Path,
        _schema: &SchemaRef,
        _dialect: &CsvDialect,
    ) -> Result<Option<Vec<RecordBatch>>> {
        Ok(None)
    }
}

#[test]
fn unavailable_scans_skip_dedupe_with_a_note() {
    let dir = unique_dir("trel_dedupe_unavailable");
    let target = dir.join("people.jsonl");
    let seed = AppendEngine::new(SessionConfig::default());
    seed.execute(
        &target,
        &people_schema(),
        &[people(&[1], &["a"])],
        &AppendOptions::default(),
    )
    .expect("seed");

    let engine = AppendEngine::new(SessionConfig::default()).with_scanner(Box::new(UnavailableScanner));
    let plan = engine
        .simulate(
            &target,
            &people_schema(),
            &[people(&[1, 2], &["a", "b"])],
            &AppendOptions::default().dedupe(DedupePolicy::AllColumns),
        )
        .expect("simulate");
    assert_eq!(plan.total_rows(), 2);
    assert!(
        plan.notes
            .iter()
            .any(|n| n.starts_with("de-duplication skipped: scan unavailable")),
        "{plan}"
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn invalid_policies_fail_before_touching_the_filesystem() {
    let dir = unique_dir("trel_invalid_policy");
    let target = dir.join("nested").join("people.csv");
    let engine = AppendEngine::new(SessionConfig::default());
    let batch = people(&[1], &["a"]);

    let err = engine
        .execute(
            &target,
            &people_schema(),
            &[batch.clone()],
            &AppendOptions::default().dedupe(DedupePolicy::KeyColumns(Vec::new())),
        )
        .expect_err("no keys");
    assert!(matches!(err, TrelError::InvalidConfig(_)), "{err}");

    let err = engine
        .execute(
            &target,
            &people_schema(),
            &[batch],
            &AppendOptions::default().rollover(RolloverPolicy::default()),
        )
        .expect_err("no thresholds");
    assert!(matches!(err, TrelError::InvalidConfig(_)), "{err}");
    assert!(!dir.join("nested").exists());
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn csv_appends_reuse_the_recorded_dialect_and_check_headers() {
    let dir = unique_dir("trel_csv_sidecar");
    let target = dir.join("people.csv");
    let semicolons = SessionConfig {
        csv: CsvDialect {
            delimiter: ';',
            ..CsvDialect::default()
        },
        ..SessionConfig::default()
    };
    AppendEngine::new(semicolons)
        .execute(&target, &people_schema(), &[people(&[1], &["a"])], &AppendOptions::default())
        .expect("create");

    let engine = AppendEngine::new(SessionConfig::default());
    engine
        .execute(&target, &people_schema(), &[people(&[2], &["b"])], &AppendOptions::default())
        .expect("append");
    assert_eq!(lines(&target), vec!["id;name", "1;a", "2;b"]);

    let swapped = arrow::record_batch::RecordBatch::try_new(
        std::sync::Arc::new(arrow_schema::Schema::new(vec![
            arrow_schema::Field::new("name", arrow_schema::DataType::Utf8, true),
            arrow_schema::Field::new("id", arrow_schema::DataType::Int64, false),
        ])),
        vec![
            std::sync::Arc::new(arrow::array::StringArray::from(vec!["c"])),
            std::sync::Arc::new(arrow::array::Int64Array::from(vec![3])),
        ],
    )
    .expect("batch");
    let err = engine
        .execute(&target, &swapped.schema(), &[swapped], &AppendOptions::default())
        .expect_err("header mismatch");
    assert!(matches!(err, TrelError::InvalidConfig(_)), "{err}");
    assert!(err.to_string().contains("header mismatch"), "{err}");
    assert_eq!(lines(&target).len(), 3);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn column_partitions_route_rows_into_labelled_directories() {
    let dir = unique_dir("trel_partition_column");
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default()
        .partition(PartitionSpec::column("region").drop_source(true))
        .format(FileFormat::Json);
    let plan = engine
        .execute(
            &dir,
            &sales_schema(),
            &[sales(
                &[1, 2, 3, 4],
                &[Some("eu"), Some("us"), Some("eu"), None],
                &[10, 20, 30, 40],
            )],
            &opts,
        )
        .expect("execute");

    let mut by_partition = plan
        .actions
        .iter()
        .map(|a| (a.partition.clone().expect("partition"), a.rows_to_append))
        .collect::<Vec<_>>();
    by_partition.sort();
    assert_eq!(
        by_partition,
        vec![
            ("region=__null__".to_string(), 1),
            ("region=eu".to_string(), 2),
            ("region=us".to_string(), 1),
        ]
    );
    let eu = lines(&dir.join("region=eu").join("part.jsonl"));
    assert_eq!(eu.len(), 2);
    assert!(!eu[0].contains("region"), "partition column should be dropped: {}", eu[0]);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn hash_partitions_are_deterministic_and_bounded() {
    let dir = unique_dir("trel_partition_hash");
    let engine = AppendEngine::new(SessionConfig::default());
    let opts = AppendOptions::default()
        .partition(PartitionSpec::hash("region", 4))
        .format(FileFormat::Csv);
    let batch = sales(
        &[1, 2, 3, 4, 5],
        &[Some("eu"), Some("us"), Some("eu"), Some("apac"), Some("us")],
        &[1, 2, 3, 4, 5],
    );
    let a = engine
        .simulate(&dir, &sales_schema(), &[batch.clone()], &opts)
        .expect("simulate");
    let b = engine
        .simulate(&dir, &sales_schema(), &[batch], &opts)
        .expect("simulate again");
    assert_eq!(a, b);
    assert_eq!(a.total_rows(), 5);
    for action in &a.actions {
        let id = action.partition.as_deref().expect("partition");
        let bucket: u32 = id
            .strip_prefix("bucket=")
            .expect("bucket prefix")
            .parse()
            .expect("bucket number");
        assert!(bucket < 4);
        assert_eq!(action.path, dir.join(id).join("part.csv"));
    }
    assert!(fs::read_dir(&dir).expect("list").next().is_none(), "simulation wrote files");
    let _ = fs::remove_dir_all(dir);
}
