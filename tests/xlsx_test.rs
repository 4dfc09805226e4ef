// ==========================================
// XLSX 导出/导入集成测试
// ==========================================
// 测试目标: 多 sheet 写出 / sheet 选择 / 表头校验
// ==========================================


use excel_bridge::logging;
use excel_bridge::{
    CellValue, Excel, ExportStrategy, FailurePolicy, ImportCapabilities, ImportError,
    LifecyclePoint, RowsExport, SheetExport, WriterType,
};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use test_helpers::{test_config, RawImport, StatusImport};

struct Sheet {
    title: &'static str,
    rows: Vec<Vec<CellValue>>,
}

impl SheetExport for Sheet {
    fn title(&self) -> Option<String> {
        Some(self.title.to_string())
    }

    fn headings(&self) -> Option<Vec<String>> {
        Some(vec!["name".to_string(), "status".to_string(), "qty".to_string()])
    }

    fn rows(&self) -> anyhow::Result<Box<dyn Iterator<Item = Vec<CellValue>> + '_>> {
        Ok(Box::new(self.rows.iter().cloned()))
    }
}

struct Workbook {
    sheets: Vec<Sheet>,
    seen: Arc<Mutex<Vec<LifecyclePoint>>>,
}

impl ExportStrategy for Workbook {
    fn sheets(&self) -> Vec<&dyn SheetExport> {
        self.sheets.iter().map(|s| s as &dyn SheetExport).collect()
    }

    fn register_events(&self, events: &mut excel_bridge::EventBus) {
        for point in [LifecyclePoint::BeforeExport, LifecyclePoint::BeforeWriting] {
            let seen = Arc::clone(&self.seen);
            events.on(point, move |event| seen.lock().unwrap().push(event.point));
        }
    }
}

fn workbook() -> Workbook {
    Workbook {
        sheets: vec![
            Sheet {
                title: "Orders",
                rows: vec![
                    vec!["a".into(), "x".into(), CellValue::Int(7)],
                    vec!["b".into(), "bad".into(), CellValue::Float(2.5)],
                ],
            },
            Sheet {
                title: "Returns",
                rows: vec![vec!["c".into(), "y".into(), CellValue::Bool(true)]],
            },
        ],
        seen: Arc::new(Mutex::new(Vec::new())),
    }
}

fn texts(rows: &[Vec<CellValue>]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(CellValue::to_string).collect())
        .collect()
}

fn store_workbook(excel: &Excel, dir: &Path) -> std::path::PathBuf {
    let path = dir.join("report.xlsx");
    let book = workbook();
    let artifact = excel.store(&book, &path).unwrap();
    assert_eq!(artifact.sheets, 2);
    assert_eq!(artifact.rows_written, 3);
    assert_eq!(artifact.writer_type, WriterType::Xlsx);
    assert_eq!(
        *book.seen.lock().unwrap(),
        vec![LifecyclePoint::BeforeExport, LifecyclePoint::BeforeWriting]
    );
    path
}

#[test]
fn test_xlsx_store_then_read_all_sheets() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let path = store_workbook(&excel, dir.path());

    let data = excel
        .to_array(
            Arc::new(RawImport(ImportCapabilities::default().with_heading_row(1))),
            &path,
        )
        .unwrap();

    assert_eq!(data.len(), 2);
    assert_eq!(
        texts(&data[0]),
        vec![vec!["a", "x", "7"], vec!["b", "bad", "2.5"]]
    );
    assert_eq!(data[1][0][2], CellValue::Bool(true));
}

#[test]
fn test_xlsx_sheet_selection() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let path = store_workbook(&excel, dir.path());

    let data = excel
        .to_array(
            Arc::new(RawImport(
                ImportCapabilities::default()
                    .with_heading_row(1)
                    .with_sheets(vec![1]),
            )),
            &path,
        )
        .unwrap();
    assert_eq!(texts(&data[0]), vec![vec!["c", "y", "TRUE"]]);

    let missing = excel.to_array(
        Arc::new(RawImport(ImportCapabilities::default().with_sheets(vec![5]))),
        &path,
    );
    assert!(matches!(missing, Err(ImportError::Configuration(_))));
}

#[test]
fn test_xlsx_validation_reports_absolute_rows() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let path = store_workbook(&excel, dir.path());

    let outcome = excel
        .import(
            Arc::new(StatusImport::with_heading(
                ImportCapabilities::default()
                    .with_heading_row(1)
                    .with_chunk_size(1)
                    .with_failure_policy(FailurePolicy::CollectAndContinue),
            )),
            None,
            &path,
        )
        .unwrap();

    assert_eq!(outcome.sheets.len(), 2);
    assert_eq!(outcome.sheets[0].name, "Orders");
    assert_eq!(outcome.committed_rows(), 2);
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].row(), 3);
    assert_eq!(outcome.failures()[0].attribute(), "status");
}

#[test]
fn test_xlsx_export_to_bytes() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let bytes = excel.export(&workbook(), WriterType::Xlsx).unwrap();

    // xlsx 为 zip 容器
    assert!(bytes.starts_with(b"PK"));
}

#[test]
fn test_document_title_written_to_properties() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let export = RowsExport::new(vec![vec!["a".into()]])
        .with_title("Orders")
        .with_document_title("Quarterly report");

    let bytes = excel.export(&export, WriterType::Xlsx).unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut core = String::new();
    archive
        .by_name("docProps/core.xml")
        .unwrap()
        .read_to_string(&mut core)
        .unwrap();
    assert!(core.contains("<dc:title>Quarterly report</dc:title>"));

    // CSV 无文档属性，标题不影响输出
    let csv = excel.export(&export, WriterType::Csv).unwrap();
    assert_eq!(String::from_utf8(csv).unwrap(), "a\n");
}

#[test]
fn test_csv_writer_rejects_second_sheet() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let result = excel.export(&workbook(), WriterType::Csv);

    assert!(matches!(result, Err(ImportError::Export(_))));
}
