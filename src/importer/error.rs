// ==========================================
// 表格导入导出管道 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 校验失败 / 数据源读取 / 写入 / 配置
// ==========================================

use crate::domain::failure::Failure;
use crate::repository::error::RepositoryError;
use std::fmt;
use thiserror::Error;

// ==========================================
// 校验失败（终止型）
// ==========================================
/// FailFast 策略下抛出的校验错误，携带触发终止的失败项
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    failures: Vec<Failure>,
}

impl ValidationError {
    pub fn new(failures: Vec<Failure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<Failure> {
        self.failures
    }

    /// 面向用户的错误消息（每条消息一行，带行号）
    pub fn errors(&self) -> Vec<String> {
        self.failures.iter().flat_map(Failure::error_lines).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors().join(" "))
    }
}

impl std::error::Error for ValidationError {}

// ==========================================
// 错误分类
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 行级校验失败（唯一可局部恢复的类别）
    Validation,
    /// 数据源无法解析/读取
    SourceRead,
    /// 落库/写出失败
    SinkWrite,
    /// 配置错误（处理任何行之前发现）
    Configuration,
}

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 校验错误 =====
    #[error("数据校验失败: {0}")]
    Validation(ValidationError),

    // ===== 数据源错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xlsm/.xls/.ods/.csv/.tsv）")]
    UnsupportedFormat(String),

    #[error("数据源读取失败: {0}")]
    SourceRead(String),

    // ===== 写入错误 =====
    #[error("数据写入失败: {0}")]
    SinkWrite(#[from] RepositoryError),

    #[error("导出写出失败: {0}")]
    Export(String),

    #[error("回调执行失败 (行 {row}): {message}")]
    Callback { row: usize, message: String },

    // ===== 基础设施错误 =====
    #[error("临时文件存储失败: {0}")]
    TempStorage(String),

    #[error("队列操作失败: {0}")]
    Queue(String),

    // ===== 配置错误 =====
    #[error("配置错误: {0}")]
    Configuration(String),

    // ===== 通用错误 =====
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::Validation(_) => ErrorKind::Validation,
            ImportError::FileNotFound(_)
            | ImportError::UnsupportedFormat(_)
            | ImportError::SourceRead(_)
            | ImportError::TempStorage(_) => ErrorKind::SourceRead,
            ImportError::SinkWrite(_)
            | ImportError::Export(_)
            | ImportError::Callback { .. }
            | ImportError::Queue(_)
            | ImportError::Other(_) => ErrorKind::SinkWrite,
            ImportError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// 队列模式下是否值得重试（校验失败与配置错误重试不会改变结果）
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Configuration
        )
    }

    /// 校验失败项（非校验错误返回空）
    pub fn failures(&self) -> &[Failure] {
        match self {
            ImportError::Validation(v) => v.failures(),
            _ => &[],
        }
    }
}

impl From<ValidationError> for ImportError {
    fn from(err: ValidationError) -> Self {
        ImportError::Validation(err)
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ImportError::FileNotFound(err.to_string()),
            _ => ImportError::SourceRead(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::SinkWrite(RepositoryError::from(err))
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::SourceRead(format!("CSV 解析失败: {}", err))
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::SourceRead(format!("Excel 解析失败: {}", err))
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Queue(format!("任务载荷序列化失败: {}", err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CellValue;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::new(vec![Failure::new(
            2,
            "1",
            vec!["The selected 1 is invalid.".to_string()],
            vec![CellValue::from("a"), CellValue::from("bad")],
        )]);

        assert_eq!(
            err.errors(),
            vec!["There was an error on row 2. The selected 1 is invalid.".to_string()]
        );
    }

    #[test]
    fn test_error_classification() {
        let validation = ImportError::from(ValidationError::new(vec![]));
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(!validation.is_retryable());

        let config = ImportError::Configuration("chunk_size".to_string());
        assert!(!config.is_retryable());

        let sink = ImportError::SinkWrite(RepositoryError::DatabaseConnectionError(
            "down".to_string(),
        ));
        assert_eq!(sink.kind(), ErrorKind::SinkWrite);
        assert!(sink.is_retryable());

        let io = ImportError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(io.kind(), ErrorKind::SourceRead);
    }
}
