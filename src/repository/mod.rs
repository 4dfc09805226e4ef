// ==========================================
// 表格导入导出管道 - 数据仓储层
// ==========================================
// 职责: 落库接口与实现（SQLite / 内存）
// ==========================================

pub mod error;
pub mod persistence_sink;
pub mod record_sink;

pub use error::{RepositoryError, RepositoryResult};
pub use persistence_sink::{MemorySink, PersistenceSink};
pub use record_sink::SqliteRecordSink;
