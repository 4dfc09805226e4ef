// ==========================================
// 表格导入导出管道 - 导出策略
// ==========================================
// 职责: 定义导出侧的行生产接口 + 能力声明
// ==========================================

use crate::config::pipeline_config::CsvDialect;
use crate::domain::types::CellValue;
use crate::importer::events::EventBus;

/// 单个 sheet 的行生产者
pub trait SheetExport: Send + Sync {
    /// sheet 标题（None 使用写出器默认名）
    fn title(&self) -> Option<String> {
        None
    }

    /// 表头行（None 表示不写表头）
    fn headings(&self) -> Option<Vec<String>> {
        None
    }

    /// 数据行（惰性产出）
    fn rows(&self) -> anyhow::Result<Box<dyn Iterator<Item = Vec<CellValue>> + '_>>;
}

/// 导出能力声明
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportCapabilities {
    /// 工作簿标题（写入文档属性，CSV 忽略）
    pub title: Option<String>,
    /// CSV 方言覆写（None 沿用管道配置）
    pub csv: Option<CsvDialect>,
    /// 写出后存入临时磁盘（供后续队列任务读取）
    pub should_queue: bool,
}

// ==========================================
// ExportStrategy Trait
// ==========================================
pub trait ExportStrategy: Send + Sync {
    fn capabilities(&self) -> ExportCapabilities {
        ExportCapabilities::default()
    }

    /// 按顺序写出的 sheet
    fn sheets(&self) -> Vec<&dyn SheetExport>;

    fn register_events(&self, _events: &mut EventBus) {}
}

// ==========================================
// RowsExport - 内存行导出
// ==========================================
/// 单 sheet、行数据已在内存中的导出
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowsExport {
    title: Option<String>,
    headings: Option<Vec<String>>,
    rows: Vec<Vec<CellValue>>,
    capabilities: ExportCapabilities,
}

impl RowsExport {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// 工作簿标题（区别于 sheet 标题）
    pub fn with_document_title(mut self, title: impl Into<String>) -> Self {
        self.capabilities.title = Some(title.into());
        self
    }

    pub fn with_headings<I, S>(mut self, headings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headings = Some(headings.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_csv(mut self, csv: CsvDialect) -> Self {
        self.capabilities.csv = Some(csv);
        self
    }

    pub fn queued(mut self) -> Self {
        self.capabilities.should_queue = true;
        self
    }
}

impl SheetExport for RowsExport {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn headings(&self) -> Option<Vec<String>> {
        self.headings.clone()
    }

    fn rows(&self) -> anyhow::Result<Box<dyn Iterator<Item = Vec<CellValue>> + '_>> {
        Ok(Box::new(self.rows.iter().cloned()))
    }
}

impl ExportStrategy for RowsExport {
    fn capabilities(&self) -> ExportCapabilities {
        self.capabilities.clone()
    }

    fn sheets(&self) -> Vec<&dyn SheetExport> {
        vec![self]
    }
}
