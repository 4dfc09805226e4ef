// ==========================================
// 同步导入管道集成测试
// ==========================================
// 测试目标: 失败策略 / 表头 / 分块顺序 / 自定义消息
// 数据源: 临时 CSV 文件 + 内存数据源
// ==========================================


use excel_bridge::domain::HeadingFormatter;
use excel_bridge::importer::{plan_chunks, ChunkReader};
use excel_bridge::logging;
use excel_bridge::source::MemorySource;
use excel_bridge::{
    CellValue, Excel, FailurePolicy, ImportCapabilities, ImportError, ImportPipeline,
    ImportStrategy, LifecyclePoint, Row,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use test_helpers::{
    as_sink, record_sink, shared_db, status_rows, test_config, write_csv, FailingSink, RawImport,
    StatusImport,
};

// ==========================================
// 失败策略
// ==========================================

#[test]
fn test_fail_fast_commits_rows_before_failure() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "a,x\nb,y\nc,bad\nd,x\n");

    let conn = shared_db();
    let sink = record_sink(Arc::clone(&conn));
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let strategy = Arc::new(StatusImport::new(ImportCapabilities::to_model(None)));

    let err = excel
        .import(strategy, Some(as_sink(&sink)), &path)
        .unwrap_err();

    let ImportError::Validation(validation) = err else {
        panic!("应为校验错误");
    };
    assert_eq!(sink.count().unwrap(), 2);
    assert_eq!(validation.failures().len(), 1);

    let failure = &validation.failures()[0];
    assert_eq!(failure.row(), 3);
    assert_eq!(failure.attribute(), "1");
    assert_eq!(failure.errors(), ["The selected 1 is invalid.".to_string()]);
    assert_eq!(
        failure.values(),
        [CellValue::from("c"), CellValue::from("bad")]
    );
    assert_eq!(
        validation.errors(),
        vec!["There was an error on row 3. The selected 1 is invalid.".to_string()]
    );
}

#[test]
fn test_fail_fast_keeps_earlier_chunks_committed() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        dir.path(),
        "rows.csv",
        &status_rows(&["x", "x", "y", "bad", "x", "x"]),
    );

    let conn = shared_db();
    let sink = record_sink(Arc::clone(&conn));
    let excel = Excel::new(test_config(dir.path()).with_chunk_size(2)).unwrap();
    let strategy = Arc::new(StatusImport::new(ImportCapabilities::to_model(Some(2))));

    let result = excel.import(strategy, Some(as_sink(&sink)), &path);

    assert!(matches!(result, Err(ImportError::Validation(_))));
    // 分块 1 全部提交，分块 2 提交失败行之前的 1 行，分块 3 未处理
    assert_eq!(sink.count().unwrap(), 3);
}

#[test]
fn test_collect_and_continue_skips_invalid_rows() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "a,x\nb,y\nc,bad\n");

    let conn = shared_db();
    let sink = record_sink(Arc::clone(&conn));
    let excel = Excel::new(
        test_config(dir.path()).with_failure_policy(FailurePolicy::CollectAndContinue),
    )
    .unwrap();
    let strategy = Arc::new(StatusImport::new(ImportCapabilities::to_model(None)));

    let outcome = excel
        .import(strategy, Some(as_sink(&sink)), &path)
        .unwrap();

    assert_eq!(sink.count().unwrap(), 2);
    assert_eq!(outcome.committed_rows(), 2);
    assert_eq!(outcome.failed_rows(), 1);
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].row(), 3);
}

#[test]
fn test_collect_commits_everything_but_invalid_rows_across_chunks() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let statuses = ["x", "bad", "y", "x", "", "x", "y", "nope", "x", "y"];
    let path = write_csv(dir.path(), "rows.csv", &status_rows(&statuses));

    let conn = shared_db();
    let sink = record_sink(Arc::clone(&conn));
    let excel = Excel::new(test_config(dir.path()).with_chunk_size(4)).unwrap();
    let strategy = Arc::new(StatusImport::new(
        ImportCapabilities::to_model(Some(3))
            .with_failure_policy(FailurePolicy::CollectAndContinue),
    ));

    let outcome = excel
        .import(strategy, Some(as_sink(&sink)), &path)
        .unwrap();

    assert_eq!(sink.count().unwrap(), 7);
    let rows: Vec<usize> = outcome.failures().iter().map(|f| f.row()).collect();
    assert_eq!(rows, vec![2, 5, 8]);
    // 空值触发 required
    assert_eq!(
        outcome.failures()[1].errors(),
        ["The 1 field is required.".to_string()]
    );
}

#[test]
fn test_sink_failure_aborts_synchronous_import() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", &status_rows(&["x", "y", "x", "y", "x", "y"]));

    let conn = shared_db();
    let records = record_sink(Arc::clone(&conn));
    let sink = FailingSink::new(Arc::clone(&records), &[2]);
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let strategy = Arc::new(StatusImport::new(
        ImportCapabilities::to_model(Some(2)).with_chunk_size(2),
    ));

    let result = excel.import(strategy, Some(sink.as_sink()), &path);

    // 同步模式不重试，第 3 个分块不再读取
    assert!(matches!(result, Err(ImportError::SinkWrite(_))));
    assert_eq!(sink.calls(), 2);
    assert_eq!(records.count().unwrap(), 2);
}

#[test]
fn test_blank_csv_line_keeps_row_numbers() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "a,x\n\nc,bad\n");
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let outcome = excel
        .import(
            Arc::new(StatusImport::new(
                ImportCapabilities::default()
                    .skipping_empty_rows()
                    .with_failure_policy(FailurePolicy::CollectAndContinue),
            )),
            None,
            &path,
        )
        .unwrap();

    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].row(), 3);

    // 不跳过空行时，空行本身按行号 2 校验
    let outcome = excel
        .import(
            Arc::new(StatusImport::new(
                ImportCapabilities::default()
                    .with_failure_policy(FailurePolicy::CollectAndContinue),
            )),
            None,
            &path,
        )
        .unwrap();
    let rows: Vec<usize> = outcome.failures().iter().map(|f| f.row()).collect();
    assert_eq!(rows, vec![2, 3]);
}

// ==========================================
// 表头
// ==========================================

#[test]
fn test_heading_row_names_failure_attribute() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "Name,Status\na,x\nb,bad\n");

    let conn = shared_db();
    let sink = record_sink(Arc::clone(&conn));
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let strategy = Arc::new(StatusImport::with_heading(
        ImportCapabilities::to_model(None)
            .with_heading_row(1)
            .with_failure_policy(FailurePolicy::CollectAndContinue),
    ));

    let outcome = excel
        .import(strategy, Some(as_sink(&sink)), &path)
        .unwrap();

    // 表头行不作为数据行
    assert_eq!(sink.count().unwrap(), 1);
    assert_eq!(outcome.total_rows(), 2);
    assert_eq!(outcome.failures()[0].row(), 3);
    assert_eq!(outcome.failures()[0].attribute(), "status");
    assert_eq!(
        outcome.failures()[0].errors(),
        ["The selected status is invalid.".to_string()]
    );
}

#[test]
fn test_custom_attribute_and_message() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "a,bad\n");

    let excel = Excel::new(
        test_config(dir.path()).with_failure_policy(FailurePolicy::CollectAndContinue),
    )
    .unwrap();
    let strategy = Arc::new(
        StatusImport::new(ImportCapabilities::default())
            .with_attribute("1", "state")
            .with_message("1.in", ":attribute must be x or y."),
    );

    let outcome = excel.import(strategy, None, &path).unwrap();

    let failure = &outcome.failures()[0];
    assert_eq!(failure.attribute(), "state");
    assert_eq!(failure.errors(), ["state must be x or y.".to_string()]);
}

#[test]
fn test_validation_is_deterministic_across_runs() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "a,bad\nb,x\nc,\n");
    let excel = Excel::new(
        test_config(dir.path()).with_failure_policy(FailurePolicy::CollectAndContinue),
    )
    .unwrap();
    let strategy = Arc::new(StatusImport::new(ImportCapabilities::default()));

    let first = excel.import(Arc::clone(&strategy), None, &path).unwrap();
    let second = excel.import(strategy, None, &path).unwrap();

    assert_eq!(first.failures(), second.failures());
    assert_eq!(first.failures().len(), 2);
}

// ==========================================
// 分块
// ==========================================

struct RowLog {
    rows: Mutex<Vec<usize>>,
    chunk_size: usize,
}

impl ImportStrategy for RowLog {
    type Entity = ();

    fn capabilities(&self) -> ImportCapabilities {
        ImportCapabilities::on_each_row().with_chunk_size(self.chunk_size)
    }

    fn on_row(&self, row: &Row) -> anyhow::Result<()> {
        self.rows.lock().unwrap().push(row.index());
        Ok(())
    }
}

fn numbered(n: usize) -> Vec<Vec<CellValue>> {
    (1..=n).map(|i| vec![CellValue::Int(i as i64)]).collect()
}

#[test]
fn test_chunk_plan_covers_rows_without_gaps() {
    for n in 0..=9 {
        for c in 1..=4 {
            let plans = plan_chunks(0, 0, n, c);
            assert_eq!(plans.len(), (n + c - 1) / c, "n={} c={}", n, c);

            let covered: Vec<usize> = plans
                .iter()
                .flat_map(|p| p.start_row()..=p.end_row())
                .collect();
            assert_eq!(covered, (1..=n).collect::<Vec<_>>(), "n={} c={}", n, c);
            assert!(plans.iter().all(|p| p.len <= c));
        }
    }
}

#[test]
fn test_chunks_visit_rows_in_order() {
    logging::init_test();
    for n in [0, 1, 5, 7] {
        for c in 1..=3 {
            let reader = ChunkReader::new(c, None, HeadingFormatter::Slug).unwrap();
            let mut source = MemorySource::single(numbered(n));
            let mut visited = Vec::new();

            let chunks = reader
                .for_each_chunk(&mut source, 0, |chunk| {
                    assert!(chunk.len() <= c);
                    visited.extend(chunk.rows.iter().map(Row::index));
                    Ok(())
                })
                .unwrap();

            assert_eq!(chunks, (n + c - 1) / c);
            assert_eq!(visited, (1..=n).collect::<Vec<_>>());
        }
    }
}

#[test]
fn test_on_each_row_sees_every_row_once() {
    logging::init_test();
    let strategy = Arc::new(RowLog {
        rows: Mutex::new(Vec::new()),
        chunk_size: 3,
    });
    let pipeline = ImportPipeline::new(
        Arc::clone(&strategy),
        None,
        &excel_bridge::PipelineConfig::default(),
    )
    .unwrap();

    let mut source = MemorySource::single(numbered(8));
    let outcome = pipeline.import_synchronous(&mut source).unwrap();

    assert_eq!(outcome.committed_rows(), 8);
    assert_eq!(*strategy.rows.lock().unwrap(), (1..=8).collect::<Vec<_>>());
}

#[test]
fn test_empty_source_completes_with_events() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "empty.csv", "");

    struct Observed(Arc<Mutex<Vec<LifecyclePoint>>>);
    impl ImportStrategy for Observed {
        type Entity = ();
        fn register_events(&self, events: &mut excel_bridge::EventBus) {
            for point in [
                LifecyclePoint::BeforeImport,
                LifecyclePoint::BeforeSheet,
                LifecyclePoint::AfterSheet,
                LifecyclePoint::AfterImport,
                LifecyclePoint::ImportFailed,
            ] {
                let seen = Arc::clone(&self.0);
                events.on(point, move |event| seen.lock().unwrap().push(event.point));
            }
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let outcome = excel
        .import(Arc::new(Observed(Arc::clone(&seen))), None, &path)
        .unwrap();

    assert_eq!(outcome.total_rows(), 0);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            LifecyclePoint::BeforeImport,
            LifecyclePoint::BeforeSheet,
            LifecyclePoint::AfterSheet,
            LifecyclePoint::AfterImport,
        ]
    );
}

// ==========================================
// to_array
// ==========================================

#[test]
fn test_to_array_returns_sheet_rows_cells() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "rows.csv", "name,qty\na,1\nb,\n");
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let data = excel
        .to_array(
            Arc::new(RawImport(ImportCapabilities::default().with_heading_row(1))),
            &path,
        )
        .unwrap();

    assert_eq!(data.len(), 1);
    assert_eq!(
        data[0],
        vec![
            vec![CellValue::from("a"), CellValue::from("1")],
            vec![CellValue::from("b"), CellValue::Empty],
        ]
    );
}

#[test]
fn test_missing_file_is_source_error() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let result = excel.to_array(
        Arc::new(RawImport(ImportCapabilities::default())),
        &dir.path().join("missing.csv"),
    );

    assert!(matches!(result, Err(ImportError::FileNotFound(_))));
}
