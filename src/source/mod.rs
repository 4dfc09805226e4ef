// ==========================================
// 表格导入导出管道 - 数据源层
// ==========================================
// 职责: 表格数据源抽象（按窗口读取行，不整表加载）
// 支持: Excel (.xlsx/.xlsm/.xls/.ods) / CSV (.csv/.tsv) / 内存
// ==========================================

pub mod csv_source;
pub mod memory_source;
pub mod xlsx_source;

pub use csv_source::CsvSource;
pub use memory_source::MemorySource;
pub use xlsx_source::XlsxSource;

use crate::config::pipeline_config::CsvDialect;
use crate::domain::row::Row;
use crate::importer::error::{ImportError, ImportResult};
use std::path::Path;

// ==========================================
// TabularSource Trait
// ==========================================
// 行号约定: start 为从 0 开始的源表行偏移，返回的 Row.index = 偏移 + 1
pub trait TabularSource {
    /// sheet 数量
    fn sheet_count(&mut self) -> ImportResult<usize>;

    /// sheet 名称（按顺序）
    fn sheet_names(&mut self) -> ImportResult<Vec<String>>;

    /// sheet 的总行数（含表头）
    fn row_count(&mut self, sheet: usize) -> ImportResult<usize>;

    /// 读取 [start, start + count) 范围内的行（超出末尾部分截断）
    fn read_rows(&mut self, sheet: usize, start: usize, count: usize) -> ImportResult<Vec<Row>>;

    /// 读取表头行原始文本
    ///
    /// # 参数
    /// - heading_row: 表头行号（从 1 开始）
    ///
    /// # 返回
    /// - None: 表头行超出数据范围
    fn read_heading(&mut self, sheet: usize, heading_row: usize) -> ImportResult<Option<Vec<String>>> {
        if heading_row == 0 {
            return Ok(None);
        }
        let rows = self.read_rows(sheet, heading_row - 1, 1)?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| row.cells().iter().map(|c| c.as_text()).collect()))
    }
}

/// 源文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
    Spreadsheet,
}

impl SourceFormat {
    /// 按扩展名识别
    pub fn from_path(path: &Path) -> ImportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Csv),
            "tsv" => Ok(SourceFormat::Tsv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

/// 按扩展名打开数据源
///
/// # 参数
/// - path: 文件路径
/// - dialect: CSV 方言（仅 CSV/TSV 使用；TSV 强制制表符分隔）
pub fn open_source(path: &Path, dialect: &CsvDialect) -> ImportResult<Box<dyn TabularSource>> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }

    match SourceFormat::from_path(path)? {
        SourceFormat::Csv => Ok(Box::new(CsvSource::open(path, dialect.clone())?)),
        SourceFormat::Tsv => Ok(Box::new(CsvSource::open(
            path,
            CsvDialect {
                delimiter: '\t',
                ..dialect.clone()
            },
        )?)),
        SourceFormat::Spreadsheet => Ok(Box::new(XlsxSource::open(path)?)),
    }
}
