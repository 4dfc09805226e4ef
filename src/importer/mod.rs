// ==========================================
// 表格导入导出管道 - 导入层
// ==========================================
// 职责: 分块读取、行校验、失败策略、批量写入
// 流程: 数据源 → 分块 → 校验 → 失败收集 → 落库
// ==========================================

// 模块声明
pub mod batch_inserter;
pub mod error;
pub mod events;
pub mod failure_collector;
pub mod row_stream;
pub mod sheet_reader;
pub mod strategy;
pub mod validator;

// 重导出核心类型
pub use batch_inserter::BatchInserter;
pub use error::{ErrorKind, ImportError, ImportResult, ValidationError};
pub use events::{EventBus, LifecyclePoint, PipelineEvent};
pub use failure_collector::FailureCollector;
pub use row_stream::{plan_chunks, stream, ChunkPlan, ChunkReader, RowStream};
pub use sheet_reader::{ChunkOutcome, ImportOutcome, ImportPipeline, SheetOutcome};
pub use strategy::{ConsumeMode, ImportCapabilities, ImportStrategy, ResolvedImport, SheetSelection};
pub use validator::{ClosureRule, Rule, RowValidator, RuleSet, ValidationRule};
