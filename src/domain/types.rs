// ==========================================
// 表格导入导出管道 - 领域类型定义
// ==========================================
// 职责: 单元格值、失败策略等基础值类型
// 红线: 单元格值不可变，读出后原样传递给校验与落库
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 日期时间的统一文本格式（CSV 写出 / SQLite 落库）
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// 单元格值 (Cell Value)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Empty,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Error(String),
}

impl CellValue {
    /// 从文本构造（CSV 读取使用，空串视为空单元格）
    pub fn from_text(text: &str) -> Self {
        if text.is_empty() {
            CellValue::Empty
        } else {
            CellValue::String(text.to_string())
        }
    }

    /// 是否为空（空单元格，或去除首尾空白后为空串）
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 数值视图（字符串按去空白后解析）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// 文本视图（与 Display 一致）
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::String(s) => write!(f, "{}", s),
            CellValue::Int(i) => write!(f, "{}", i),
            // 整数值的浮点不带小数位
            CellValue::Float(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Float(n) => write!(f, "{}", n),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            CellValue::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::DateTime(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Empty)
    }
}

impl From<&calamine::Data> for CellValue {
    fn from(data: &calamine::Data) -> Self {
        use calamine::Data;

        match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::from_text(s),
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(n) => CellValue::Float(*n),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Float(dt.as_f64())),
            Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                })
                .map(CellValue::DateTime)
                .unwrap_or_else(|_| CellValue::String(s.clone())),
            Data::DurationIso(s) => CellValue::String(s.clone()),
            Data::Error(e) => CellValue::Error(format!("#{:?}", e)),
        }
    }
}

/// Excel 日期序列号转换（1900 日期系统，基准 1899-12-30）
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    base.checked_add_signed(chrono::Duration::milliseconds(millis))
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Empty => ToSqlOutput::Owned(Value::Null),
            CellValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            CellValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            CellValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            CellValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            CellValue::DateTime(dt) => {
                ToSqlOutput::Owned(Value::Text(dt.format(DATETIME_FORMAT).to_string()))
            }
            CellValue::Error(e) => ToSqlOutput::Borrowed(ValueRef::Text(e.as_bytes())),
        })
    }
}

// ==========================================
// 失败策略 (Failure Policy)
// ==========================================
// FailFast: 首个校验失败即终止整个导入
// CollectAndContinue: 跳过失败行，汇总全部失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    CollectAndContinue,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailFast => "FAIL_FAST",
            FailurePolicy::CollectAndContinue => "COLLECT_AND_CONTINUE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FAIL_FAST" => Some(FailurePolicy::FailFast),
            "COLLECT_AND_CONTINUE" | "SKIP_ON_FAILURE" => Some(FailurePolicy::CollectAndContinue),
            _ => None,
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_string_is_empty() {
        assert!(CellValue::String("   ".to_string()).is_empty());
        assert!(CellValue::Empty.is_empty());
        assert!(!CellValue::Int(0).is_empty());
    }

    #[test]
    fn test_integral_float_renders_without_fraction() {
        assert_eq!(CellValue::Float(1.0).to_string(), "1");
        assert_eq!(CellValue::Float(1.5).to_string(), "1.5");
    }

    #[test]
    fn test_excel_serial_conversion() {
        // 44197 = 2021-01-01
        let dt = excel_serial_to_datetime(44197.5).unwrap();
        assert_eq!(dt.format(DATETIME_FORMAT).to_string(), "2021-01-01 12:00:00");
        assert!(excel_serial_to_datetime(-1.0).is_none());
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!(FailurePolicy::parse("fail_fast"), Some(FailurePolicy::FailFast));
        assert_eq!(
            FailurePolicy::parse("COLLECT_AND_CONTINUE"),
            Some(FailurePolicy::CollectAndContinue)
        );
        assert_eq!(FailurePolicy::parse("nope"), None);
    }
}
