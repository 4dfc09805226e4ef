// ==========================================
// 表格导入导出管道 - Excel 门面
// ==========================================
// 职责: 对外的命令式入口
// 入口: import / to_array / export / store / queue_import
// ==========================================

use crate::config::config_manager::ConfigManager;
use crate::config::pipeline_config::PipelineConfig;
use crate::domain::row::Row;
use crate::domain::types::CellValue;
use crate::exporter::{ExportArtifact, ExportStrategy, SheetWriter};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::sheet_reader::{ImportOutcome, ImportPipeline};
use crate::importer::strategy::ImportStrategy;
use crate::queue::{
    temp_storage_from_config, ChunkTaskQueue, CompletionJob, QueuedImportController,
    QueuedImportHandle, QueuedImportHandler, WorkerPool,
};
use crate::repository::persistence_sink::PersistenceSink;
use crate::sink::WriterType;
use crate::source::open_source;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

struct QueueRuntime {
    controller: QueuedImportController,
    pool: WorkerPool,
}

// ==========================================
// Excel - 门面
// ==========================================
pub struct Excel {
    config: PipelineConfig,
    queue: Option<QueueRuntime>,
}

impl Excel {
    /// 创建门面（仅同步能力）
    pub fn new(config: PipelineConfig) -> ImportResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            queue: None,
        })
    }

    /// 从 config_kv 加载配置创建
    pub fn from_config_manager(manager: &ConfigManager) -> ImportResult<Self> {
        Self::new(manager.load_pipeline_config()?)
    }

    /// 启用队列能力（任务表建在给定连接上）
    pub fn with_queue(mut self, conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        let queue = Arc::new(ChunkTaskQueue::new(conn)?);
        let controller = QueuedImportController::from_config(Arc::clone(&queue), self.config.clone())?;
        let pool = WorkerPool::new(queue, self.config.queue.workers);
        self.queue = Some(QueueRuntime { controller, pool });
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn worker_pool(&self) -> Option<&WorkerPool> {
        self.queue.as_ref().map(|q| &q.pool)
    }

    fn runtime(&self) -> ImportResult<&QueueRuntime> {
        self.queue.as_ref().ok_or_else(|| {
            ImportError::Configuration("未配置队列连接，请先调用 with_queue".to_string())
        })
    }

    // ===== 导入 =====

    /// 同步导入文件
    ///
    /// # 参数
    /// - strategy: 导入策略
    /// - sink: 落库目标（ToModel 策略必填）
    /// - path: 源文件（按扩展名选择读取器）
    pub fn import<S: ImportStrategy>(
        &self,
        strategy: Arc<S>,
        sink: Option<Arc<dyn PersistenceSink<S::Entity>>>,
        path: &Path,
    ) -> ImportResult<ImportOutcome> {
        let pipeline = ImportPipeline::new(strategy, sink, &self.config)?;
        let mut source = open_source(path, &pipeline.resolved().csv)?;
        pipeline.import_synchronous(source.as_mut())
    }

    /// 读取为三维数组（sheet → 行 → 单元格），不落库
    pub fn to_array<S: ImportStrategy>(
        &self,
        strategy: Arc<S>,
        path: &Path,
    ) -> ImportResult<Vec<Vec<Vec<CellValue>>>> {
        let pipeline = ImportPipeline::collecting(strategy, &self.config)?;
        let mut source = open_source(path, &pipeline.resolved().csv)?;
        let outcome = pipeline.import_synchronous(source.as_mut())?;

        Ok(outcome
            .sheets
            .into_iter()
            .map(|sheet| sheet.rows.into_iter().map(Row::into_cells).collect())
            .collect())
    }

    // ===== 导出 =====

    fn writer(&self) -> ImportResult<SheetWriter> {
        let storage = match &self.queue {
            Some(runtime) => Arc::clone(runtime.controller.storage()),
            None => temp_storage_from_config(&self.config)?,
        };
        Ok(SheetWriter::new(self.config.clone())?.with_storage(storage))
    }

    /// 导出为字节
    pub fn export<E: ExportStrategy + ?Sized>(
        &self,
        strategy: &E,
        writer_type: WriterType,
    ) -> ImportResult<Vec<u8>> {
        self.writer()?
            .export(strategy, writer_type, None)?
            .output
            .into_bytes()
    }

    /// 导出到文件（写出类型由扩展名决定）
    pub fn store<E: ExportStrategy + ?Sized>(
        &self,
        strategy: &E,
        path: &Path,
    ) -> ImportResult<ExportArtifact> {
        let writer_type = WriterType::from_path(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let artifact = self.writer()?.export(strategy, writer_type, Some(path))?;
        info!(path = %path.display(), rows = artifact.rows_written, "导出文件已保存");
        Ok(artifact)
    }

    // ===== 队列导入 =====

    /// 创建并注册队列导入处理器
    pub fn queued_handler<S: ImportStrategy + 'static>(
        &self,
        job_name: &str,
        strategy: Arc<S>,
        sink: Option<Arc<dyn PersistenceSink<S::Entity>>>,
    ) -> ImportResult<Arc<QueuedImportHandler<S>>> {
        let runtime = self.runtime()?;
        let pipeline = ImportPipeline::new(strategy, sink, &self.config)?;
        let handler = QueuedImportHandler::new(
            job_name,
            pipeline,
            Arc::clone(runtime.controller.storage()),
        );
        runtime.pool.register(job_name, handler.clone())?;
        Ok(handler)
    }

    /// 派发队列导入（任务由 worker 池执行）
    pub fn queue_import<S: ImportStrategy + 'static>(
        &self,
        handler: &Arc<QueuedImportHandler<S>>,
        path: &Path,
        completions: Vec<Arc<dyn CompletionJob>>,
    ) -> ImportResult<QueuedImportHandle> {
        self.runtime()?
            .controller
            .import_queued(handler, path, completions)
    }
}
