// ==========================================
// 表格导入导出管道 - 管道配置
// ==========================================
// 职责: 显式配置值，每次构建管道时传入（不读全局状态）
// 结构: chunk_size / failure_policy / heading_row_index / csv / queue / temp
// ==========================================

use crate::domain::row::HeadingFormatter;
use crate::domain::types::FailurePolicy;
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 默认分块大小
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认 worker 数
pub const DEFAULT_WORKERS: usize = 2;

// ==========================================
// CSV 方言 (CSV Dialect)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvDialect {
    /// 分隔符
    pub delimiter: char,
    /// 包围符（None 表示不加引号）
    pub enclosure: Option<char>,
    /// 转义符（None 表示按双写包围符转义）
    pub escape: Option<char>,
    /// 行尾（"\n" 或 "\r\n"）
    pub line_ending: String,
    /// 写出时是否添加 UTF-8 BOM
    pub use_bom: bool,
    /// 写出时是否添加 "sep=;" 分隔符声明行
    pub include_separator_line: bool,
    /// Excel 兼容模式（强制 BOM + 分隔符声明 + ';' + '"' + CRLF）
    pub excel_compatibility: bool,
    /// 输入编码（仅支持 UTF-8）
    pub input_encoding: String,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            enclosure: Some('"'),
            escape: None,
            line_ending: "\n".to_string(),
            use_bom: false,
            include_separator_line: false,
            excel_compatibility: false,
            input_encoding: "UTF-8".to_string(),
        }
    }
}

impl CsvDialect {
    /// TSV 方言
    pub fn tsv() -> Self {
        Self {
            delimiter: '\t',
            ..Self::default()
        }
    }

    /// 生效方言（Excel 兼容模式覆盖相关字段）
    pub fn effective(&self) -> CsvDialect {
        if !self.excel_compatibility {
            return self.clone();
        }
        CsvDialect {
            delimiter: ';',
            enclosure: Some('"'),
            line_ending: "\r\n".to_string(),
            use_bom: true,
            include_separator_line: true,
            ..self.clone()
        }
    }

    pub fn delimiter_byte(&self) -> ImportResult<u8> {
        ascii_byte("delimiter", self.delimiter)
    }

    pub fn enclosure_byte(&self) -> ImportResult<Option<u8>> {
        self.enclosure.map(|c| ascii_byte("enclosure", c)).transpose()
    }

    pub fn escape_byte(&self) -> ImportResult<Option<u8>> {
        self.escape.map(|c| ascii_byte("escape", c)).transpose()
    }

    pub fn validate(&self) -> ImportResult<()> {
        self.delimiter_byte()?;
        self.enclosure_byte()?;
        self.escape_byte()?;

        if !matches!(self.line_ending.as_str(), "\n" | "\r\n" | "\r") {
            return Err(ImportError::Configuration(format!(
                "csv.line_ending 仅支持 \\n / \\r\\n / \\r，实际 {:?}",
                self.line_ending
            )));
        }

        let encoding = self.input_encoding.to_ascii_uppercase().replace('-', "");
        if encoding != "UTF8" {
            return Err(ImportError::Configuration(format!(
                "csv.input_encoding 仅支持 UTF-8，实际 {}",
                self.input_encoding
            )));
        }

        Ok(())
    }
}

fn ascii_byte(field: &str, c: char) -> ImportResult<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ImportError::Configuration(format!(
            "csv.{} 必须是单个 ASCII 字符，实际 {:?}",
            field, c
        )))
    }
}

// ==========================================
// 队列配置 (Queue Config)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 是否允许队列执行
    pub enabled: bool,
    /// 远程临时磁盘标识（None 表示仅本地临时文件）
    pub remote_disk: Option<String>,
    /// 单个分块任务最大尝试次数
    pub max_retries: u32,
    /// worker 数量
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_disk: None,
            max_retries: DEFAULT_MAX_RETRIES,
            workers: DEFAULT_WORKERS,
        }
    }
}

// ==========================================
// 临时文件配置 (Temp Config)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempConfig {
    /// 本地临时目录
    pub local_path: PathBuf,
    /// 远程磁盘根目录（remote_disk 启用时使用）
    pub remote_root: Option<PathBuf>,
}

impl Default for TempConfig {
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            local_path: base.join("excel-bridge"),
            remote_root: None,
        }
    }
}

// ==========================================
// 管道配置 (Pipeline Config)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub failure_policy: FailurePolicy,
    /// 表头行号（从 1 开始，None 表示无表头）
    pub heading_row_index: Option<usize>,
    pub heading_formatter: HeadingFormatter,
    pub csv: CsvDialect,
    pub queue: QueueConfig,
    pub temp: TempConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            failure_policy: FailurePolicy::FailFast,
            heading_row_index: None,
            heading_formatter: HeadingFormatter::Slug,
            csv: CsvDialect::default(),
            queue: QueueConfig::default(),
            temp: TempConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 文本解析（缺失字段取默认值）
    pub fn from_json(json: &str) -> ImportResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| ImportError::Configuration(format!("配置 JSON 解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> ImportResult<()> {
        if self.chunk_size == 0 {
            return Err(ImportError::Configuration(
                "chunk_size 必须大于 0".to_string(),
            ));
        }
        if self.heading_row_index == Some(0) {
            return Err(ImportError::Configuration(
                "heading_row_index 从 1 开始计数".to_string(),
            ));
        }
        if self.queue.workers == 0 {
            return Err(ImportError::Configuration(
                "queue.workers 必须大于 0".to_string(),
            ));
        }
        if self.queue.max_retries == 0 {
            return Err(ImportError::Configuration(
                "queue.max_retries 必须大于 0".to_string(),
            ));
        }
        if self.queue.remote_disk.is_some() && self.temp.remote_root.is_none() {
            return Err(ImportError::Configuration(
                "启用 queue.remote_disk 时必须配置 temp.remote_root".to_string(),
            ));
        }
        self.csv.validate()
    }

    // ===== 构建辅助 =====

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_heading_row(mut self, heading_row_index: usize) -> Self {
        self.heading_row_index = Some(heading_row_index);
        self
    }

    pub fn with_csv(mut self, csv: CsvDialect) -> Self {
        self.csv = csv;
        self
    }

    pub fn with_temp_path(mut self, local_path: impl Into<PathBuf>) -> Self {
        self.temp.local_path = local_path.into();
        self
    }

    pub fn with_queue(mut self, enabled: bool) -> Self {
        self.queue.enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = PipelineConfig::default().with_chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(ImportError::Configuration(_))
        ));
    }

    #[test]
    fn test_excel_compatibility_overrides_dialect() {
        let dialect = CsvDialect {
            delimiter: ',',
            excel_compatibility: true,
            ..CsvDialect::default()
        };
        let effective = dialect.effective();
        assert_eq!(effective.delimiter, ';');
        assert_eq!(effective.line_ending, "\r\n");
        assert!(effective.use_bom);
        assert!(effective.include_separator_line);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PipelineConfig::from_json(
            r#"{"chunk_size": 50, "failure_policy": "COLLECT_AND_CONTINUE", "csv": {"delimiter": ";"}}"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.failure_policy, FailurePolicy::CollectAndContinue);
        assert_eq!(config.csv.delimiter, ';');
        assert_eq!(config.csv.enclosure, Some('"'));
    }

    #[test]
    fn test_non_utf8_encoding_rejected() {
        let dialect = CsvDialect {
            input_encoding: "GBK".to_string(),
            ..CsvDialect::default()
        };
        assert!(dialect.validate().is_err());
    }
}
