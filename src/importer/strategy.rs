// ==========================================
// 表格导入导出管道 - 导入策略与能力
// ==========================================
// 职责: 定义导入策略接口 + 能力声明
// 红线: 能力在构建管道时一次性解析为 ResolvedImport，运行期不再探测
// ==========================================

use crate::config::pipeline_config::{CsvDialect, PipelineConfig};
use crate::domain::failure::Failure;
use crate::domain::row::{HeadingFormatter, Row};
use crate::domain::types::FailurePolicy;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::events::EventBus;
use crate::importer::validator::RuleSet;
use std::collections::HashMap;

// ==========================================
// 消费方式 (Consume Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeMode {
    /// 构造实体并落库（batch_size = None 时逐行落库）
    ToModel { batch_size: Option<usize> },
    /// 逐行回调
    OnEachRow,
    /// 收集为行集合（由调用方取用）
    ToCollection,
}

/// sheet 选择
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SheetSelection {
    #[default]
    All,
    /// 指定 sheet 序号（从 0 开始，按给定顺序处理）
    Indices(Vec<usize>),
}

impl SheetSelection {
    /// 解析为实际处理的 sheet 序号
    pub fn resolve(&self, sheet_count: usize) -> ImportResult<Vec<usize>> {
        match self {
            SheetSelection::All => Ok((0..sheet_count).collect()),
            SheetSelection::Indices(indices) => {
                if let Some(missing) = indices.iter().find(|&&i| i >= sheet_count) {
                    return Err(ImportError::Configuration(format!(
                        "sheet 不存在: 序号 {}（共 {} 个）",
                        missing, sheet_count
                    )));
                }
                Ok(indices.clone())
            }
        }
    }
}

// ==========================================
// 能力声明 (Import Capabilities)
// ==========================================
// None 表示沿用 PipelineConfig 中的值
#[derive(Debug, Clone, PartialEq)]
pub struct ImportCapabilities {
    pub consume: ConsumeMode,
    pub heading_row: Option<usize>,
    pub chunk_size: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
    pub csv: Option<CsvDialect>,
    pub should_queue: bool,
    pub skip_empty_rows: bool,
    pub sheets: SheetSelection,
}

impl Default for ImportCapabilities {
    fn default() -> Self {
        Self {
            consume: ConsumeMode::ToCollection,
            heading_row: None,
            chunk_size: None,
            failure_policy: None,
            csv: None,
            should_queue: false,
            skip_empty_rows: false,
            sheets: SheetSelection::All,
        }
    }
}

impl ImportCapabilities {
    pub fn to_model(batch_size: Option<usize>) -> Self {
        Self {
            consume: ConsumeMode::ToModel { batch_size },
            ..Self::default()
        }
    }

    pub fn on_each_row() -> Self {
        Self {
            consume: ConsumeMode::OnEachRow,
            ..Self::default()
        }
    }

    pub fn with_heading_row(mut self, heading_row: usize) -> Self {
        self.heading_row = Some(heading_row);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn with_csv(mut self, csv: CsvDialect) -> Self {
        self.csv = Some(csv);
        self
    }

    pub fn queued(mut self) -> Self {
        self.should_queue = true;
        self
    }

    pub fn skipping_empty_rows(mut self) -> Self {
        self.skip_empty_rows = true;
        self
    }

    pub fn with_sheets(mut self, sheets: Vec<usize>) -> Self {
        self.sheets = SheetSelection::Indices(sheets);
        self
    }
}

// ==========================================
// ImportStrategy Trait
// ==========================================
// 实现者: 业务方的导入定义（每种表格一个）
pub trait ImportStrategy: Send + Sync {
    /// 落库实体类型（非 ToModel 策略可取 `()`）
    type Entity: Send + 'static;

    fn capabilities(&self) -> ImportCapabilities {
        ImportCapabilities::default()
    }

    /// 校验规则（构建管道时调用一次）
    fn rules(&self) -> ImportResult<RuleSet> {
        Ok(RuleSet::new())
    }

    fn custom_attributes(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn custom_messages(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// 行 -> 实体（返回 None 表示忽略该行）
    fn model(&self, _row: &Row) -> anyhow::Result<Option<Self::Entity>> {
        Ok(None)
    }

    /// OnEachRow 模式的逐行回调
    fn on_row(&self, _row: &Row) -> anyhow::Result<()> {
        Ok(())
    }

    /// CollectAndContinue 模式下，每个产生失败的分块调用一次
    fn on_failure(&self, _failures: &[Failure]) {}

    /// 注册生命周期监听器
    fn register_events(&self, _events: &mut EventBus) {}
}

// ==========================================
// 解析后的导入参数 (Resolved Import)
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImport {
    pub consume: ConsumeMode,
    pub chunk_size: usize,
    pub heading_row: Option<usize>,
    pub heading_formatter: HeadingFormatter,
    pub failure_policy: FailurePolicy,
    pub csv: CsvDialect,
    pub should_queue: bool,
    pub skip_empty_rows: bool,
    pub sheets: SheetSelection,
}

impl ResolvedImport {
    /// 合并能力声明与管道配置（策略声明优先）
    pub fn resolve(caps: ImportCapabilities, config: &PipelineConfig) -> ImportResult<Self> {
        let resolved = Self {
            consume: caps.consume,
            chunk_size: caps.chunk_size.unwrap_or(config.chunk_size),
            heading_row: caps.heading_row.or(config.heading_row_index),
            heading_formatter: config.heading_formatter,
            failure_policy: caps.failure_policy.unwrap_or(config.failure_policy),
            csv: caps.csv.unwrap_or_else(|| config.csv.clone()),
            should_queue: caps.should_queue,
            skip_empty_rows: caps.skip_empty_rows,
            sheets: caps.sheets,
        };
        resolved.validate()?;
        Ok(resolved)
    }

    fn validate(&self) -> ImportResult<()> {
        if self.chunk_size == 0 {
            return Err(ImportError::Configuration("chunk_size 必须大于 0".to_string()));
        }
        if self.heading_row == Some(0) {
            return Err(ImportError::Configuration(
                "heading_row 从 1 开始计数".to_string(),
            ));
        }
        if let ConsumeMode::ToModel {
            batch_size: Some(0),
        } = self.consume
        {
            return Err(ImportError::Configuration("batch_size 必须大于 0".to_string()));
        }
        self.csv.validate()
    }
}
