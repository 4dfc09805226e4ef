// ==========================================
// 表格导入导出管道 - Excel 数据源
// ==========================================
// 依赖: calamine（自动识别 xlsx/xlsm/xlsb/xls/ods）
// 读取方式: 每个 sheet 的 Range 首次访问时加载并缓存
// 行号: 保持源表绝对行号（数据不从 A1 开始时补齐前导空行/空列）
// ==========================================

use crate::domain::row::Row;
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use crate::source::TabularSource;
use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct XlsxSource {
    path: PathBuf,
    workbook: Sheets<BufReader<File>>,
    names: Vec<String>,
    ranges: HashMap<usize, Range<Data>>,
}

impl XlsxSource {
    pub fn open(path: &Path) -> ImportResult<Self> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let workbook: Sheets<_> = open_workbook_auto(path)?;
        let names = workbook.sheet_names().to_vec();
        if names.is_empty() {
            return Err(ImportError::SourceRead("Excel 文件无工作表".to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            workbook,
            names,
            ranges: HashMap::new(),
        })
    }

    fn range(&mut self, sheet: usize) -> ImportResult<&Range<Data>> {
        if !self.ranges.contains_key(&sheet) {
            let name = self.names.get(sheet).cloned().ok_or_else(|| {
                ImportError::SourceRead(format!("工作表不存在: 序号 {}", sheet))
            })?;
            let range = self.workbook.worksheet_range(&name)?;
            debug!(
                file = %self.path.display(),
                sheet = %name,
                size = ?range.get_size(),
                "工作表已加载"
            );
            self.ranges.insert(sheet, range);
        }

        self.ranges
            .get(&sheet)
            .ok_or_else(|| ImportError::SourceRead(format!("工作表不存在: 序号 {}", sheet)))
    }
}

/// Range 覆盖到的绝对行数（含数据前的空行）
fn absolute_height(range: &Range<Data>) -> usize {
    let (height, _) = range.get_size();
    if height == 0 {
        return 0;
    }
    let (start_row, _) = range.start().unwrap_or((0, 0));
    start_row as usize + height
}

impl TabularSource for XlsxSource {
    fn sheet_count(&mut self) -> ImportResult<usize> {
        Ok(self.names.len())
    }

    fn sheet_names(&mut self) -> ImportResult<Vec<String>> {
        Ok(self.names.clone())
    }

    fn row_count(&mut self, sheet: usize) -> ImportResult<usize> {
        Ok(absolute_height(self.range(sheet)?))
    }

    fn read_rows(&mut self, sheet: usize, start: usize, count: usize) -> ImportResult<Vec<Row>> {
        let range = self.range(sheet)?;
        let total = absolute_height(range);
        let (start_row, start_col) = range.start().unwrap_or((0, 0));
        let (start_row, start_col) = (start_row as usize, start_col as usize);
        let (_, width) = range.get_size();

        let end = start.saturating_add(count).min(total);
        let mut rows = Vec::with_capacity(end.saturating_sub(start));

        for offset in start..end {
            let cells = if offset < start_row {
                Vec::new()
            } else {
                let relative = offset - start_row;
                let mut cells = vec![CellValue::Empty; start_col];
                cells.extend((0..width).map(|col| {
                    range
                        .get((relative, col))
                        .map(CellValue::from)
                        .unwrap_or(CellValue::Empty)
                }));
                cells
            };
            rows.push(Row::new(offset + 1, cells));
        }

        Ok(rows)
    }
}
