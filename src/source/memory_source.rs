// ==========================================
// 表格导入导出管道 - 内存数据源
// ==========================================
// 用途: 测试与程序内构造的数据（to_array / 二次导入）
// ==========================================

use crate::domain::row::Row;
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use crate::source::TabularSource;

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    sheets: Vec<(String, Vec<Vec<CellValue>>)>,
    read_calls: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单 sheet 数据源
    pub fn single(rows: Vec<Vec<CellValue>>) -> Self {
        Self::new().with_sheet("Worksheet", rows)
    }

    /// 由字符串二维数组构造单 sheet 数据源
    pub fn from_strings(rows: &[&[&str]]) -> Self {
        Self::single(
            rows.iter()
                .map(|row| row.iter().map(|s| CellValue::from_text(s)).collect())
                .collect(),
        )
    }

    pub fn with_sheet(mut self, name: &str, rows: Vec<Vec<CellValue>>) -> Self {
        self.sheets.push((name.to_string(), rows));
        self
    }

    /// read_rows 调用次数（验证窗口读取）
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    fn sheet(&self, sheet: usize) -> ImportResult<&Vec<Vec<CellValue>>> {
        self.sheets
            .get(sheet)
            .map(|(_, rows)| rows)
            .ok_or_else(|| ImportError::SourceRead(format!("工作表不存在: 序号 {}", sheet)))
    }
}

impl TabularSource for MemorySource {
    fn sheet_count(&mut self) -> ImportResult<usize> {
        Ok(self.sheets.len())
    }

    fn sheet_names(&mut self) -> ImportResult<Vec<String>> {
        Ok(self.sheets.iter().map(|(name, _)| name.clone()).collect())
    }

    fn row_count(&mut self, sheet: usize) -> ImportResult<usize> {
        Ok(self.sheet(sheet)?.len())
    }

    fn read_rows(&mut self, sheet: usize, start: usize, count: usize) -> ImportResult<Vec<Row>> {
        self.read_calls += 1;
        let rows = self.sheet(sheet)?;
        Ok(rows
            .iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(offset, cells)| Row::new(offset + 1, cells.clone()))
            .collect())
    }
}
