// ==========================================
// 表格导入导出管道 - 导出管道（Sheet Writer）
// ==========================================
// 流程: BeforeExport → 逐 sheet 写表头/数据 → BeforeWriting → finalize → (可选) 存入临时磁盘
// ==========================================

use crate::config::pipeline_config::PipelineConfig;
use crate::domain::task::TemporaryFile;
use crate::domain::types::CellValue;
use crate::exporter::strategy::ExportStrategy;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::events::{EventBus, LifecyclePoint, PipelineEvent};
use crate::queue::temporary_file::{temp_key, TempStorage};
use crate::sink::{open_sink, SinkOutput, WriterType};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// 导出产物
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub output: SinkOutput,
    pub writer_type: WriterType,
    pub sheets: usize,
    /// 数据行数（不含表头）
    pub rows_written: usize,
    /// should_queue 时存入临时磁盘的副本
    pub temporary_file: Option<TemporaryFile>,
}

pub struct SheetWriter {
    config: PipelineConfig,
    storage: Option<Arc<dyn TempStorage>>,
}

impl SheetWriter {
    pub fn new(config: PipelineConfig) -> ImportResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            storage: None,
        })
    }

    pub fn with_storage(mut self, storage: Arc<dyn TempStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 同步导出
    ///
    /// # 参数
    /// - strategy: 导出策略
    /// - writer_type: 写出类型
    /// - path: 输出路径（None 写入内存）
    #[instrument(skip(self, strategy, path))]
    pub fn export<E>(
        &self,
        strategy: &E,
        writer_type: WriterType,
        path: Option<&Path>,
    ) -> ImportResult<ExportArtifact>
    where
        E: ExportStrategy + ?Sized,
    {
        let start_time = Instant::now();
        let operation_id = Uuid::new_v4().to_string();
        let mut events = EventBus::new();
        strategy.register_events(&mut events);

        events.emit(&PipelineEvent::new(LifecyclePoint::BeforeExport).with_operation(&operation_id));

        let artifact = self.write(strategy, writer_type, path, &events, &operation_id).map_err(|e| {
            error!(error = %e, "导出失败");
            e
        })?;

        info!(
            sheets = artifact.sheets,
            rows_written = artifact.rows_written,
            queued = artifact.temporary_file.is_some(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "导出完成"
        );
        Ok(artifact)
    }

    fn write<E>(
        &self,
        strategy: &E,
        writer_type: WriterType,
        path: Option<&Path>,
        events: &EventBus,
        operation_id: &str,
    ) -> ImportResult<ExportArtifact>
    where
        E: ExportStrategy + ?Sized,
    {
        let caps = strategy.capabilities();
        let dialect = caps.csv.unwrap_or_else(|| self.config.csv.clone());
        dialect.validate()?;

        // 存储目标在写出之前确认
        let storage = match (&self.storage, caps.should_queue) {
            (Some(storage), true) => Some(Arc::clone(storage)),
            (None, true) => {
                return Err(ImportError::Configuration(
                    "导出声明了 should_queue 但未配置临时存储".to_string(),
                ))
            }
            (_, false) => None,
        };

        let mut sink = open_sink(writer_type, path, &dialect)?;
        if let Some(title) = &caps.title {
            sink.set_title(title);
        }
        let sheets = strategy.sheets();
        let mut rows_written = 0;

        for sheet in &sheets {
            let title = sheet.title();
            let handle = sink.begin_sheet(title.as_deref())?;

            if let Some(headings) = sheet.headings() {
                let cells: Vec<CellValue> = headings.into_iter().map(CellValue::String).collect();
                sink.append_row(handle, &cells)?;
            }

            let rows = sheet
                .rows()
                .map_err(|e| ImportError::Export(format!("行数据生成失败: {:#}", e)))?;
            for row in rows {
                sink.append_row(handle, &row)?;
                rows_written += 1;
            }
        }

        events.emit(
            &PipelineEvent::new(LifecyclePoint::BeforeWriting)
                .with_operation(operation_id)
                .with_rows(rows_written),
        );

        let output = sink.finalize()?;

        let temporary_file = match storage {
            Some(storage) => {
                let key = temp_key(writer_type.extension());
                Some(match &output {
                    SinkOutput::Path(path) => storage.store_path(path, &key)?,
                    SinkOutput::Bytes(bytes) => storage.store(bytes, &key)?,
                })
            }
            None => None,
        };

        Ok(ExportArtifact {
            output,
            writer_type,
            sheets: sheets.len(),
            rows_written,
            temporary_file,
        })
    }
}
