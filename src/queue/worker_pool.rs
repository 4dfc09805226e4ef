// ==========================================
// 表格导入导出管道 - Worker 池
// ==========================================
// 职责: 从分块任务队列拉取任务，按 job_name 分派给已注册的处理器
// 执行: N 个 tokio 阻塞 worker，各自循环拉取直到队列为空
// 语义: 至少一次执行；失败任务按队列的重试策略回到 PENDING
// ==========================================

use crate::domain::failure::Failure;
use crate::domain::task::{QueuedChunkTask, TaskStatus};
use crate::importer::error::{ImportError, ImportResult};
use crate::queue::chunk_queue::{ChunkTaskQueue, QueuedImportSummary};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, instrument};

// ==========================================
// ChunkTaskHandler Trait
// ==========================================
pub trait ChunkTaskHandler: Send + Sync {
    /// 执行单个分块任务
    ///
    /// # 返回
    /// - Ok(Vec<Failure>): 该分块被跳过的失败行（CollectAndContinue）
    /// - Err: 任务失败（由队列决定是否重试）
    fn handle(&self, task: &QueuedChunkTask) -> ImportResult<Vec<Failure>>;

    /// 全部分块到达终态后调用一次
    fn finish(&self, summary: &QueuedImportSummary) -> ImportResult<()>;
}

struct PoolShared {
    queue: Arc<ChunkTaskQueue>,
    handlers: RwLock<HashMap<String, Arc<dyn ChunkTaskHandler>>>,
    workers: usize,
}

// ==========================================
// WorkerPool
// ==========================================
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(queue: Arc<ChunkTaskQueue>, workers: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue,
                handlers: RwLock::new(HashMap::new()),
                workers: workers.max(1),
            }),
        }
    }

    pub fn queue(&self) -> &Arc<ChunkTaskQueue> {
        &self.shared.queue
    }

    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// 注册处理器（同名覆盖）
    pub fn register(&self, job_name: &str, handler: Arc<dyn ChunkTaskHandler>) -> ImportResult<()> {
        self.shared
            .handlers
            .write()
            .map_err(|e| ImportError::Queue(format!("锁获取失败: {}", e)))?
            .insert(job_name.to_string(), handler);
        debug!(job_name, "任务处理器已注册");
        Ok(())
    }

    fn handler(&self, job_name: &str) -> ImportResult<Option<Arc<dyn ChunkTaskHandler>>> {
        let handlers = self
            .shared
            .handlers
            .read()
            .map_err(|e| ImportError::Queue(format!("锁获取失败: {}", e)))?;
        Ok(handlers.get(job_name).cloned())
    }

    /// 执行队列中的下一个任务
    ///
    /// # 返回
    /// - Ok(Some(status)): 任务执行后的状态（Pending 表示将重试）
    /// - Ok(None): 队列为空
    pub fn run_next(&self) -> ImportResult<Option<TaskStatus>> {
        let queue = &self.shared.queue;
        let Some(record) = queue.dequeue()? else {
            return Ok(None);
        };
        let task = &record.task;
        let handler = self.handler(&task.job_name)?;

        let status = match &handler {
            Some(handler) => match handler.handle(task) {
                Ok(failures) => {
                    queue.mark_completed(&task.task_id, &failures)?;
                    info!(
                        task_id = %task.task_id,
                        sequence = task.sequence,
                        failures = failures.len(),
                        "分块任务完成"
                    );
                    TaskStatus::Completed
                }
                Err(e) => {
                    let status = queue.mark_failed(&record, &e)?;
                    // FailFast 校验失败: 后续分块不再执行
                    if status == TaskStatus::Failed && matches!(e, ImportError::Validation(_)) {
                        queue.cancel_pending(&task.import_id)?;
                    }
                    status
                }
            },
            None => {
                let err = ImportError::Configuration(format!("未注册的任务处理器: {}", task.job_name));
                queue.mark_failed(&record, &err)?
            }
        };

        if status.is_terminal() {
            self.complete_if_finished(&task.import_id, handler.as_ref())?;
        }
        Ok(Some(status))
    }

    /// 取消等待中的任务
    ///
    /// 取消后若该导入的全部分块均已终态，随即执行完成回调
    ///
    /// # 返回
    /// - true: 已取消
    /// - false: 任务不存在或已开始执行
    pub fn cancel_task(&self, task_id: &str) -> ImportResult<bool> {
        let queue = &self.shared.queue;
        let Some(record) = queue.get_task_status(task_id)? else {
            return Ok(false);
        };
        if !queue.cancel_task(task_id)? {
            return Ok(false);
        }
        info!(task_id, import_id = %record.task.import_id, "分块任务已取消");

        let handler = self.handler(&record.task.job_name)?;
        self.complete_if_finished(&record.task.import_id, handler.as_ref())?;
        Ok(true)
    }

    /// 全部分块终态时认领并执行完成回调（每次导入只会成功认领一次）
    fn complete_if_finished(
        &self,
        import_id: &str,
        handler: Option<&Arc<dyn ChunkTaskHandler>>,
    ) -> ImportResult<bool> {
        if !self.shared.queue.try_claim_completion(import_id)? {
            return Ok(false);
        }

        let summary = self.shared.queue.summary(import_id)?;
        info!(
            import_id,
            state = summary.state.as_str(),
            completed = summary.completed,
            failed = summary.failed,
            "队列导入全部分块已结束"
        );

        match handler {
            Some(handler) => {
                if let Err(e) = handler.finish(&summary) {
                    error!(import_id, error = %e, "完成回调执行失败");
                }
            }
            None => error!(import_id, "缺少任务处理器，完成回调未执行"),
        }
        Ok(true)
    }

    /// 在当前线程执行队列直到为空
    ///
    /// # 返回
    /// - Ok(usize): 执行的任务次数（含重试）
    pub fn drain(&self) -> ImportResult<usize> {
        let mut executed = 0;
        while self.run_next()?.is_some() {
            executed += 1;
        }
        Ok(executed)
    }

    /// 启动 N 个阻塞 worker 并发消费队列，全部空闲后返回
    #[instrument(skip(self), fields(workers = self.shared.workers))]
    pub async fn run(&self) -> ImportResult<usize> {
        let handles: Vec<_> = (0..self.shared.workers)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::task::spawn_blocking(move || {
                    let executed = pool.drain();
                    debug!(worker_id, "worker 退出");
                    executed
                })
            })
            .collect();

        let mut executed = 0;
        for result in join_all(handles).await {
            executed += result.map_err(|e| ImportError::Queue(format!("worker 异常退出: {}", e)))??;
        }

        info!(executed, "worker 池执行完成");
        Ok(executed)
    }
}
