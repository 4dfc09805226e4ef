// ==========================================
// 表格导入导出管道 - 核心库
// ==========================================
// 定位: 分块读取、逐行校验、可队列化的表格导入导出管道
// 技术栈: Rust + SQLite + calamine / csv / rust_xlsxwriter
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 单元格/行/失败/任务
pub mod domain;

// 配置层 - 管道配置
pub mod config;

// 数据源层 - CSV / Excel / 内存
pub mod source;

// 写出层 - CSV / XLSX
pub mod sink;

// 导入层 - 分块/校验/失败策略/批量写入
pub mod importer;

// 导出层 - 导出策略/写出管道
pub mod exporter;

// 队列层 - 临时文件/任务队列/worker 池
pub mod queue;

// 数据仓储层 - 落库
pub mod repository;

// API 层 - 门面
pub mod api;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    CellValue, Chunk, Failure, FailurePolicy, HeadingFormatter, ImportState, QueuedChunkTask, Row,
    TaskStatus, TemporaryFile,
};

// 配置
pub use config::{ConfigManager, CsvDialect, PipelineConfig};

// 导入
pub use importer::{
    ConsumeMode, EventBus, ImportCapabilities, ImportError, ImportOutcome, ImportPipeline,
    ImportResult, ImportStrategy, LifecyclePoint, PipelineEvent, Rule, RuleSet, ValidationError,
    ValidationRule,
};

// 导出
pub use exporter::{ExportCapabilities, ExportStrategy, RowsExport, SheetExport};

// 队列
pub use queue::{QueuedImportController, QueuedImportHandle, QueuedImportSummary, WorkerPool};

// 写出
pub use sink::WriterType;

// 仓储
pub use repository::{MemorySink, PersistenceSink, SqliteRecordSink};

// API
pub use api::Excel;

// ==========================================
// 常量定义
// ==========================================

// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
