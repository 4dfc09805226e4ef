// ==========================================
// 表格导入导出管道 - 领域模型层
// ==========================================
// 职责: 单元格值、行、分块、校验失败、队列任务
// 红线: 不含文件读写逻辑，不含数据访问逻辑
// ==========================================

pub mod failure;
pub mod row;
pub mod task;
pub mod types;

// 重导出核心类型
pub use failure::Failure;
pub use row::{slug, Chunk, HeadingFormatter, HeadingRow, Row};
pub use task::{ImportState, QueuedChunkTask, TaskStatus, TemporaryFile};
pub use types::{excel_serial_to_datetime, CellValue, FailurePolicy, DATETIME_FORMAT};
