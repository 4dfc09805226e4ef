// ==========================================
// 表格导入导出管道 - 行校验失败
// ==========================================
// 红线: 每行每个属性最多一个 Failure（同一属性的多条消息合并）
// ==========================================

use crate::domain::types::CellValue;
use serde::{Deserialize, Serialize};

/// 行校验失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// 源表中的绝对行号（从 1 开始）
    pub row: usize,
    /// 属性名（列键，或自定义属性名）
    pub attribute: String,
    /// 校验消息（按规则顺序）
    pub errors: Vec<String>,
    /// 失败时该行的原始值
    pub values: Vec<CellValue>,
}

impl Failure {
    pub fn new(
        row: usize,
        attribute: impl Into<String>,
        errors: Vec<String>,
        values: Vec<CellValue>,
    ) -> Self {
        Self {
            row,
            attribute: attribute.into(),
            errors,
            values,
        }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    /// 面向用户的错误行（"There was an error on row 3. ..."）
    pub fn error_lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|msg| format!("There was an error on row {}. {}", self.row, msg))
            .collect()
    }
}
