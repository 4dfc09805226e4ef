// ==========================================
// 表格导入导出管道 - 导出层
// ==========================================
// 职责: 由导出策略产出行，写入 CSV / XLSX
// ==========================================

pub mod sheet_writer;
pub mod strategy;

pub use sheet_writer::{ExportArtifact, SheetWriter};
pub use strategy::{ExportCapabilities, ExportStrategy, RowsExport, SheetExport};
