// ==========================================
// 表格导入导出管道 - 队列层
// ==========================================
// 职责: 临时文件存储、分块任务队列、worker 池、队列导入控制器
// ==========================================

pub mod chunk_queue;
pub mod controller;
pub mod temporary_file;
pub mod worker_pool;

pub use chunk_queue::{ChunkTaskQueue, QueueStats, QueuedImportSummary, QueuedTaskRecord};
pub use controller::{CompletionJob, QueuedImportController, QueuedImportHandle, QueuedImportHandler};
pub use temporary_file::{
    temp_key, temp_storage_from_config, DiskTempStorage, LocalTempStorage, TempStorage,
};
pub use worker_pool::{ChunkTaskHandler, WorkerPool};
