// ==========================================
// CSV 方言集成测试
// ==========================================
// 测试目标: 读取分隔符 / 写出方言 / Excel 兼容模式
// ==========================================


use excel_bridge::logging;
use excel_bridge::{CellValue, CsvDialect, Excel, ImportCapabilities, RowsExport, WriterType};
use std::sync::Arc;
use tempfile::TempDir;
use test_helpers::{test_config, write_csv, RawImport};

fn grid() -> Vec<Vec<CellValue>> {
    vec![
        vec!["A1".into(), "B1".into()],
        vec!["A2".into(), "B2".into()],
    ]
}

fn semicolon() -> CsvDialect {
    CsvDialect {
        delimiter: ';',
        ..CsvDialect::default()
    }
}

#[test]
fn test_delimiter_controls_cell_split() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "semi.csv", "a;b\n");

    let with_semicolon = Excel::new(test_config(dir.path()).with_csv(semicolon()))
        .unwrap()
        .to_array(Arc::new(RawImport(ImportCapabilities::default())), &path)
        .unwrap();
    assert_eq!(
        with_semicolon[0],
        vec![vec![CellValue::from("a"), CellValue::from("b")]]
    );

    let with_comma = Excel::new(test_config(dir.path()))
        .unwrap()
        .to_array(Arc::new(RawImport(ImportCapabilities::default())), &path)
        .unwrap();
    assert_eq!(with_comma[0], vec![vec![CellValue::from("a;b")]]);
}

#[test]
fn test_strategy_dialect_overrides_config() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), "tabs.csv", "a\tb\n");
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let data = excel
        .to_array(
            Arc::new(RawImport(ImportCapabilities::default().with_csv(CsvDialect::tsv()))),
            &path,
        )
        .unwrap();

    assert_eq!(data[0][0].len(), 2);
}

#[test]
fn test_export_with_separator_line() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let export = RowsExport::new(grid()).with_csv(CsvDialect {
        include_separator_line: true,
        ..semicolon()
    });

    let bytes = excel.export(&export, WriterType::Csv).unwrap();
    let text = String::from_utf8(bytes).unwrap();

    assert_eq!(text, "sep=;\nA1;B1\nA2;B2\n");
}

#[test]
fn test_excel_compatibility_output() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();
    let export = RowsExport::new(grid()).with_csv(CsvDialect {
        excel_compatibility: true,
        ..CsvDialect::default()
    });

    let bytes = excel.export(&export, WriterType::Csv).unwrap();

    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    assert_eq!(text, "sep=;\r\nA1;B1\r\nA2;B2\r\n");
}

#[test]
fn test_stored_csv_reads_back_with_same_dialect() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path()).with_csv(CsvDialect {
        excel_compatibility: true,
        ..CsvDialect::default()
    });
    let excel = Excel::new(config).unwrap();
    let path = dir.path().join("out").join("report.csv");

    let artifact = excel
        .store(
            &RowsExport::new(vec![vec!["x;y".into(), "plain".into()]]).with_headings(["a", "b"]),
            &path,
        )
        .unwrap();
    assert_eq!(artifact.rows_written, 1);

    // BOM 与 "sep=" 声明行在读取时跳过
    let data = excel
        .to_array(
            Arc::new(RawImport(ImportCapabilities::default().with_heading_row(1))),
            &path,
        )
        .unwrap();
    assert_eq!(
        data[0],
        vec![vec![CellValue::from("x;y"), CellValue::from("plain")]]
    );
}

#[test]
fn test_tsv_export_uses_tabs() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let excel = Excel::new(test_config(dir.path())).unwrap();

    let bytes = excel.export(&RowsExport::new(grid()), WriterType::Tsv).unwrap();

    assert_eq!(String::from_utf8(bytes).unwrap(), "A1\tB1\nA2\tB2\n");
}
