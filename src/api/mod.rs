// ==========================================
// 表格导入导出管道 - API 层
// ==========================================
// 职责: 对外门面（同步导入/导出、队列导入）
// ==========================================

pub mod excel_api;

pub use excel_api::Excel;
