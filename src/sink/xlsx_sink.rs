// ==========================================
// 表格导入导出管道 - Excel 写出
// ==========================================
// 依赖: rust_xlsxwriter
// 说明: 工作表在内存中累积，finalize 时统一挂到 Workbook 并保存
// ==========================================

use crate::domain::types::{CellValue, DATETIME_FORMAT};
use crate::importer::error::{ImportError, ImportResult};
use crate::sink::{SheetHandle, SinkOutput, TabularSink};
use rust_xlsxwriter::{DocProperties, Workbook, Worksheet};
use std::path::{Path, PathBuf};

/// Excel 单 sheet 最大行数
const MAX_ROWS: u32 = 1_048_576;
/// Excel 单 sheet 最大列数
const MAX_COLS: usize = 16_384;
/// sheet 名称最大长度
const MAX_SHEET_NAME_LEN: usize = 31;

fn xlsx_error(err: impl std::fmt::Display) -> ImportError {
    ImportError::Export(format!("Excel 写出失败: {}", err))
}

/// 清理 sheet 名称（去除非法字符并截断）
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            _ => c,
        })
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    let trimmed = cleaned.trim_matches('\'').trim();
    if trimmed.is_empty() {
        "Worksheet".to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct XlsxSink {
    path: Option<PathBuf>,
    title: Option<String>,
    sheets: Vec<Worksheet>,
    next_row: Vec<u32>,
}

impl XlsxSink {
    pub fn to_path(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            title: None,
            sheets: Vec::new(),
            next_row: Vec::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            title: None,
            sheets: Vec::new(),
            next_row: Vec::new(),
        }
    }
}

impl TabularSink for XlsxSink {
    fn begin_sheet(&mut self, name: Option<&str>) -> ImportResult<SheetHandle> {
        let index = self.sheets.len();
        let name = match name {
            Some(n) => sanitize_sheet_name(n),
            None => format!("Worksheet{}", index + 1),
        };

        let mut worksheet = Worksheet::new();
        worksheet.set_name(&name).map_err(xlsx_error)?;

        self.sheets.push(worksheet);
        self.next_row.push(0);
        Ok(SheetHandle(index))
    }

    fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }

    fn append_row(&mut self, sheet: SheetHandle, cells: &[CellValue]) -> ImportResult<()> {
        let (worksheet, next_row) = match (self.sheets.get_mut(sheet.0), self.next_row.get_mut(sheet.0)) {
            (Some(ws), Some(row)) => (ws, row),
            _ => {
                return Err(ImportError::Export(format!(
                    "无效的工作表句柄: {}",
                    sheet.0
                )))
            }
        };

        let row = *next_row;
        if row >= MAX_ROWS {
            return Err(ImportError::Export(format!(
                "超出 Excel 最大行数 {}",
                MAX_ROWS
            )));
        }
        if cells.len() > MAX_COLS {
            return Err(ImportError::Export(format!(
                "超出 Excel 最大列数 {}",
                MAX_COLS
            )));
        }

        for (idx, cell) in cells.iter().enumerate() {
            let col = idx as u16;
            match cell {
                CellValue::Empty => {}
                CellValue::String(s) => {
                    worksheet.write_string(row, col, s).map_err(xlsx_error)?;
                }
                CellValue::Int(i) => {
                    worksheet.write_number(row, col, *i as f64).map_err(xlsx_error)?;
                }
                CellValue::Float(f) => {
                    worksheet.write_number(row, col, *f).map_err(xlsx_error)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(row, col, *b).map_err(xlsx_error)?;
                }
                CellValue::DateTime(dt) => {
                    worksheet
                        .write_string(row, col, dt.format(DATETIME_FORMAT).to_string())
                        .map_err(xlsx_error)?;
                }
                CellValue::Error(e) => {
                    worksheet.write_string(row, col, e).map_err(xlsx_error)?;
                }
            }
        }

        *next_row += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> ImportResult<SinkOutput> {
        let XlsxSink {
            path,
            title,
            sheets,
            ..
        } = *self;

        let mut workbook = Workbook::new();
        if let Some(title) = title {
            workbook.set_properties(&DocProperties::new().set_title(title));
        }
        if sheets.is_empty() {
            workbook.add_worksheet();
        }
        for worksheet in sheets {
            workbook.push_worksheet(worksheet);
        }

        match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(xlsx_error)?;
                    }
                }
                workbook.save(&path).map_err(xlsx_error)?;
                Ok(SinkOutput::Path(path))
            }
            None => Ok(SinkOutput::Bytes(
                workbook.save_to_buffer().map_err(xlsx_error)?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("a/b:c"), "a_b_c");
        assert_eq!(sanitize_sheet_name(""), "Worksheet");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40)).len(), 31);
    }

    #[test]
    fn test_invalid_handle_rejected() {
        let mut sink = XlsxSink::in_memory();
        assert!(sink.append_row(SheetHandle(3), &[CellValue::Int(1)]).is_err());
    }
}
