// ==========================================
// 表格导入导出管道 - 配置层
// ==========================================
// 职责: 显式管道配置 + config_kv 覆写加载
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod pipeline_config;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use pipeline_config::{
    CsvDialect, PipelineConfig, QueueConfig, TempConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_WORKERS,
};
