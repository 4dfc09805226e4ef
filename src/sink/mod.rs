// ==========================================
// 表格导入导出管道 - 写出层
// ==========================================
// 职责: 表格写出抽象（逐行追加，结束时产出文件或字节流）
// 支持: Excel (.xlsx) / CSV (.csv) / TSV (.tsv)
// ==========================================

pub mod csv_sink;
pub mod xlsx_sink;

pub use csv_sink::CsvSink;
pub use xlsx_sink::XlsxSink;

use crate::config::pipeline_config::CsvDialect;
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// sheet 句柄（begin_sheet 返回，append_row 使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetHandle(pub usize);

/// 写出结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl SinkOutput {
    /// 读取为字节（文件输出会读回文件内容）
    pub fn into_bytes(self) -> ImportResult<Vec<u8>> {
        match self {
            SinkOutput::Bytes(bytes) => Ok(bytes),
            SinkOutput::Path(path) => Ok(std::fs::read(path)?),
        }
    }
}

// ==========================================
// TabularSink Trait
// ==========================================
pub trait TabularSink {
    /// 开始一个新 sheet
    fn begin_sheet(&mut self, name: Option<&str>) -> ImportResult<SheetHandle>;

    /// 设置文档标题（不支持文档属性的格式忽略）
    fn set_title(&mut self, _title: &str) {}

    /// 追加一行
    fn append_row(&mut self, sheet: SheetHandle, cells: &[CellValue]) -> ImportResult<()>;

    /// 结束写出
    fn finalize(self: Box<Self>) -> ImportResult<SinkOutput>;
}

// ==========================================
// 写出类型 (Writer Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriterType {
    Xlsx,
    Csv,
    Tsv,
}

impl WriterType {
    /// 按扩展名识别
    pub fn from_path(path: &Path) -> ImportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "xlsx" => Ok(WriterType::Xlsx),
            "csv" => Ok(WriterType::Csv),
            "tsv" => Ok(WriterType::Tsv),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            WriterType::Xlsx => "xlsx",
            WriterType::Csv => "csv",
            WriterType::Tsv => "tsv",
        }
    }
}

/// 创建写出器
///
/// # 参数
/// - writer_type: 写出类型
/// - path: 输出文件路径（None 表示写入内存）
/// - dialect: CSV 方言（TSV 强制制表符分隔）
pub fn open_sink(
    writer_type: WriterType,
    path: Option<&Path>,
    dialect: &CsvDialect,
) -> ImportResult<Box<dyn TabularSink>> {
    let csv_dialect = match writer_type {
        WriterType::Tsv => CsvDialect {
            delimiter: '\t',
            ..dialect.clone()
        },
        _ => dialect.clone(),
    };

    match (writer_type, path) {
        (WriterType::Xlsx, Some(path)) => Ok(Box::new(XlsxSink::to_path(path))),
        (WriterType::Xlsx, None) => Ok(Box::new(XlsxSink::in_memory())),
        (_, Some(path)) => Ok(Box::new(CsvSink::to_path(path, csv_dialect)?)),
        (_, None) => Ok(Box::new(CsvSink::in_memory(csv_dialect)?)),
    }
}
