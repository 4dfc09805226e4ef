// ==========================================
// 表格导入导出管道 - 行与分块
// ==========================================
// 红线: Row.index 为源表中的绝对行号（从 1 开始）
// 红线: 一个 Chunk 只包含同一个 sheet 的行
// ==========================================

use crate::domain::types::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// 表头格式化 (Heading Formatter)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingFormatter {
    /// 小写 + 非字母数字折叠为下划线（"Order Date" -> "order_date"）
    #[default]
    Slug,
    /// 保留原始表头（仅去除首尾空白）
    None,
}

impl HeadingFormatter {
    pub fn format(&self, label: &str) -> String {
        match self {
            HeadingFormatter::Slug => slug(label),
            HeadingFormatter::None => label.trim().to_string(),
        }
    }
}

/// 表头 slug 化
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_sep = false;

    for ch in label.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}

// ==========================================
// 表头行 (Heading Row)
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingRow {
    labels: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeadingRow {
    /// 由表头原始文本构建映射
    ///
    /// 空表头回退为列序号；重复表头以首次出现为准
    pub fn new(raw_labels: &[String], formatter: HeadingFormatter) -> Self {
        let labels: Vec<String> = raw_labels
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                let formatted = formatter.format(raw);
                if formatted.is_empty() {
                    idx.to_string()
                } else {
                    formatted
                }
            })
            .collect();

        let mut positions = HashMap::with_capacity(labels.len());
        for (idx, label) in labels.iter().enumerate() {
            positions.entry(label.clone()).or_insert(idx);
        }

        Self { labels, positions }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// ==========================================
// 行 (Row)
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    index: usize,
    cells: Vec<CellValue>,
    heading: Option<Arc<HeadingRow>>,
}

impl Row {
    /// # 参数
    /// - index: 源表中的绝对行号（从 1 开始）
    /// - cells: 单元格值（按列顺序）
    pub fn new(index: usize, cells: Vec<CellValue>) -> Self {
        Self {
            index,
            cells,
            heading: None,
        }
    }

    pub fn with_heading(mut self, heading: Arc<HeadingRow>) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cells(&self) -> &[CellValue] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<CellValue> {
        self.cells
    }

    pub fn heading(&self) -> Option<&HeadingRow> {
        self.heading.as_deref()
    }

    /// 按列键取值
    ///
    /// 有表头时先按表头标签查找，再回退为列序号（"0"、"1"...）
    pub fn get(&self, key: &str) -> Option<&CellValue> {
        if let Some(pos) = self.heading.as_ref().and_then(|h| h.position(key)) {
            return self.cells.get(pos);
        }
        key.parse::<usize>().ok().and_then(|pos| self.cells.get(pos))
    }

    /// 列键（有表头为标签，无表头为列序号）
    pub fn keys(&self) -> Vec<String> {
        match &self.heading {
            Some(h) => {
                let mut keys = h.labels().to_vec();
                keys.extend((keys.len()..self.cells.len()).map(|i| i.to_string()));
                keys
            }
            None => (0..self.cells.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// 整行空白
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }
}

// ==========================================
// 分块 (Chunk)
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// sheet 序号（从 0 开始）
    pub sheet: usize,
    /// 分块序号（从 0 开始）
    pub sequence: usize,
    pub rows: Vec<Row>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_row(&self) -> Option<usize> {
        self.rows.first().map(Row::index)
    }

    pub fn last_row(&self) -> Option<usize> {
        self.rows.last().map(Row::index)
    }
}
