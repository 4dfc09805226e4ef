// ==========================================
// 表格导入导出管道 - 队列导入控制器
// ==========================================
// 状态机: Created → Dispatched(n) → {Pending → Running → Completed | Failed}* → AllCompleted | AbortedOnFailure
// 职责: 源文件落临时存储 → 统计行数切分分块 → 每块一个独立任务入队
// 红线: 每个任务的行号范围在派发时确定
// 红线: 临时文件在全部任务终态后删除
// ==========================================

use crate::config::pipeline_config::PipelineConfig;
use crate::domain::failure::Failure;
use crate::domain::task::{ImportState, QueuedChunkTask, TemporaryFile};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::events::{LifecyclePoint, PipelineEvent};
use crate::importer::failure_collector::FailureCollector;
use crate::importer::row_stream::{ChunkPlan, ChunkReader};
use crate::importer::sheet_reader::ImportPipeline;
use crate::importer::strategy::ImportStrategy;
use crate::queue::chunk_queue::{ChunkTaskQueue, QueuedImportSummary};
use crate::queue::temporary_file::{temp_key, temp_storage_from_config, TempStorage};
use crate::queue::worker_pool::ChunkTaskHandler;
use crate::source::{open_source, SourceFormat};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 完成回调 (Completion Job)
// ==========================================
pub trait CompletionJob: Send + Sync {
    fn run(&self, summary: &QueuedImportSummary) -> anyhow::Result<()>;
}

impl<F> CompletionJob for F
where
    F: Fn(&QueuedImportSummary) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, summary: &QueuedImportSummary) -> anyhow::Result<()> {
        self(summary)
    }
}

/// 队列导入句柄（派发后立即返回）
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedImportHandle {
    pub import_id: String,
    pub job_name: String,
    pub task_ids: Vec<String>,
    pub total_chunks: usize,
    pub temporary_file: TemporaryFile,
}

// ==========================================
// QueuedImportHandler - 分块任务处理器
// ==========================================
pub struct QueuedImportHandler<S: ImportStrategy> {
    job_name: String,
    pipeline: Arc<ImportPipeline<S>>,
    storage: Arc<dyn TempStorage>,
    completions: Mutex<HashMap<String, Vec<Arc<dyn CompletionJob>>>>,
}

impl<S: ImportStrategy> QueuedImportHandler<S> {
    pub fn new(
        job_name: impl Into<String>,
        pipeline: ImportPipeline<S>,
        storage: Arc<dyn TempStorage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_name: job_name.into(),
            pipeline: Arc::new(pipeline),
            storage,
            completions: Mutex::new(HashMap::new()),
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn pipeline(&self) -> &ImportPipeline<S> {
        &self.pipeline
    }

    fn attach_completions(&self, import_id: &str, jobs: Vec<Arc<dyn CompletionJob>>) -> ImportResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        self.completions
            .lock()
            .map_err(|e| ImportError::Queue(format!("锁获取失败: {}", e)))?
            .insert(import_id.to_string(), jobs);
        Ok(())
    }

    fn take_completions(&self, import_id: &str) -> ImportResult<Vec<Arc<dyn CompletionJob>>> {
        Ok(self
            .completions
            .lock()
            .map_err(|e| ImportError::Queue(format!("锁获取失败: {}", e)))?
            .remove(import_id)
            .unwrap_or_default())
    }

    /// 按顺序执行完成回调，首个失败即停止
    fn run_completions(&self, summary: &QueuedImportSummary) -> ImportResult<()> {
        for (idx, job) in self.take_completions(&summary.import_id)?.iter().enumerate() {
            job.run(summary).map_err(|e| {
                ImportError::Other(e.context(format!("完成回调 #{} 执行失败", idx + 1)))
            })?;
        }
        Ok(())
    }
}

impl<S: ImportStrategy> ChunkTaskHandler for QueuedImportHandler<S> {
    #[instrument(skip(self, task), fields(task_id = %task.task_id, sequence = task.sequence))]
    fn handle(&self, task: &QueuedChunkTask) -> ImportResult<Vec<Failure>> {
        let resolved = self.pipeline.resolved();
        let path = self.storage.fetch(&task.temporary_file)?;
        let mut source = open_source(&path, &resolved.csv)?;

        // 表头行与行范围均取自任务载荷
        let reader = ChunkReader::new(
            task.chunk_size,
            task.heading_row_index,
            resolved.heading_formatter,
        )?
        .skip_empty_rows(resolved.skip_empty_rows);
        let heading = reader.read_heading(source.as_mut(), task.sheet)?;
        let plan = ChunkPlan {
            sheet: task.sheet,
            sequence: task.sequence,
            start_offset: task.start_offset,
            len: task.chunk_size,
        };
        let chunk = reader.read_chunk(source.as_mut(), &plan, heading.as_ref())?;

        let mut collector = FailureCollector::new(resolved.failure_policy);
        let outcome = self.pipeline.process_chunk(&chunk, &mut collector)?;
        debug!(
            start_row = task.start_row(),
            end_row = task.end_row(),
            committed = outcome.committed,
            failed = outcome.failed,
            "分块任务处理完成"
        );
        Ok(collector.into_failures())
    }

    fn finish(&self, summary: &QueuedImportSummary) -> ImportResult<()> {
        let result = self.run_completions(summary);

        // 无论回调结果如何都清理临时文件
        if let Err(e) = self.storage.delete(&summary.temporary_file) {
            warn!(import_id = %summary.import_id, error = %e, "临时文件删除失败");
        }

        let events = self.pipeline.events();
        match (&result, summary.state) {
            (Ok(()), ImportState::AllCompleted) => events.emit(
                &PipelineEvent::new(LifecyclePoint::AfterImport)
                    .with_operation(&summary.import_id)
                    .with_rows(summary.completed),
            ),
            (Err(e), _) => events.emit(
                &PipelineEvent::new(LifecyclePoint::ImportFailed)
                    .with_operation(&summary.import_id)
                    .with_error(e),
            ),
            (Ok(()), state) => events.emit(
                &PipelineEvent::new(LifecyclePoint::ImportFailed)
                    .with_operation(&summary.import_id)
                    .with_error(format!(
                        "{} 个分块失败，{} 个分块取消 ({})",
                        summary.failed,
                        summary.cancelled,
                        state.as_str()
                    )),
            ),
        }

        result
    }
}

// ==========================================
// QueuedImportController - 队列导入控制器
// ==========================================
pub struct QueuedImportController {
    queue: Arc<ChunkTaskQueue>,
    storage: Arc<dyn TempStorage>,
    config: PipelineConfig,
}

impl QueuedImportController {
    pub fn new(
        queue: Arc<ChunkTaskQueue>,
        storage: Arc<dyn TempStorage>,
        config: PipelineConfig,
    ) -> ImportResult<Self> {
        config.validate()?;
        Ok(Self {
            queue,
            storage,
            config,
        })
    }

    /// 按配置创建（临时存储由 queue.remote_disk / temp 决定）
    pub fn from_config(queue: Arc<ChunkTaskQueue>, config: PipelineConfig) -> ImportResult<Self> {
        let storage = temp_storage_from_config(&config)?;
        Self::new(queue, storage, config)
    }

    pub fn storage(&self) -> &Arc<dyn TempStorage> {
        &self.storage
    }

    /// 派发队列导入
    ///
    /// # 参数
    /// - handler: 已注册到 worker 池的处理器
    /// - source_path: 源文件
    /// - completions: 全部分块结束后按顺序执行的回调
    ///
    /// # 返回
    /// - Ok(QueuedImportHandle): 派发句柄（任务尚未执行）
    /// - Err(Configuration): 策略未声明队列能力或队列未启用（不会创建临时文件）
    #[instrument(skip(self, handler, completions), fields(job_name = %handler.job_name(), import_id))]
    pub fn import_queued<S: ImportStrategy>(
        &self,
        handler: &Arc<QueuedImportHandler<S>>,
        source_path: &Path,
        completions: Vec<Arc<dyn CompletionJob>>,
    ) -> ImportResult<QueuedImportHandle> {
        let resolved = handler.pipeline().resolved();
        if !resolved.should_queue {
            return Err(ImportError::Configuration(
                "导入策略未声明队列能力，不能以队列方式执行".to_string(),
            ));
        }
        if !self.config.queue.enabled {
            return Err(ImportError::Configuration(
                "队列执行未启用 (excel.queue.enabled)".to_string(),
            ));
        }
        SourceFormat::from_path(source_path)?;
        if !source_path.exists() {
            return Err(ImportError::FileNotFound(source_path.display().to_string()));
        }

        let import_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("import_id", import_id.as_str());
        handler
            .pipeline()
            .events()
            .emit(&PipelineEvent::new(LifecyclePoint::BeforeImport).with_operation(&import_id));

        // === 步骤 1: 源文件落临时存储 ===
        let extension = source_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let temporary_file = self.storage.store_path(source_path, &temp_key(&extension))?;

        // === 步骤 2: 切分 + 入队（失败时清理临时文件） ===
        match self.dispatch(handler, &import_id, &temporary_file, completions) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                error!(error = %e, "队列导入派发失败");
                if let Err(detach) = handler.take_completions(&import_id) {
                    warn!(error = %detach, "完成回调解除失败");
                }
                if let Err(cleanup) = self.storage.delete(&temporary_file) {
                    warn!(error = %cleanup, "临时文件清理失败");
                }
                handler.pipeline().events().emit(
                    &PipelineEvent::new(LifecyclePoint::ImportFailed)
                        .with_operation(&import_id)
                        .with_error(&e),
                );
                Err(e)
            }
        }
    }

    fn dispatch<S: ImportStrategy>(
        &self,
        handler: &Arc<QueuedImportHandler<S>>,
        import_id: &str,
        temporary_file: &TemporaryFile,
        completions: Vec<Arc<dyn CompletionJob>>,
    ) -> ImportResult<QueuedImportHandle> {
        let resolved = handler.pipeline().resolved();
        let path = self.storage.fetch(temporary_file)?;
        let mut source = open_source(&path, &resolved.csv)?;

        let sheet_count = source.sheet_count()?;
        let reader = ChunkReader::from_resolved(resolved)?;
        let mut plans = Vec::new();
        for sheet in resolved.sheets.resolve(sheet_count)? {
            plans.extend(reader.plan(source.as_mut(), sheet)?);
        }

        let total_chunks = plans.len();
        let tasks: Vec<QueuedChunkTask> = plans
            .iter()
            .enumerate()
            .map(|(sequence, plan)| {
                QueuedChunkTask::new(
                    import_id,
                    handler.job_name(),
                    temporary_file.clone(),
                    plan.sheet,
                    plan.start_offset,
                    plan.len,
                    resolved.heading_row,
                    sequence,
                    total_chunks,
                )
            })
            .collect();

        // 回调先于入队挂载，避免任务在挂载前全部完成
        handler.attach_completions(import_id, completions)?;
        let task_ids =
            self.queue
                .enqueue_import(import_id, temporary_file, &tasks, self.config.queue.max_retries)?;

        info!(
            import_id,
            total_chunks,
            chunk_size = resolved.chunk_size,
            "队列导入已派发"
        );

        // 空数据源: 无任务可执行，直接完成
        if tasks.is_empty() && self.queue.try_claim_completion(import_id)? {
            let summary = self.queue.summary(import_id)?;
            if let Err(e) = handler.finish(&summary) {
                error!(import_id, error = %e, "完成回调执行失败");
            }
        }

        Ok(QueuedImportHandle {
            import_id: import_id.to_string(),
            job_name: handler.job_name().to_string(),
            task_ids,
            total_chunks,
            temporary_file: temporary_file.clone(),
        })
    }
}
