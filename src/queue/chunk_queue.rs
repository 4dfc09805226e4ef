// ==========================================
// 表格导入导出管道 - 分块任务队列
// ==========================================
// 职责: 持久化队列导入的分块任务，支持重试、取消与完成判定
// 存储: import_chunk_queue（每任务一行）/ import_queue_batch（每次导入一行）
// 红线: 完成回调只允许被认领一次（completion_fired 原子置位）
// ==========================================

use crate::domain::failure::Failure;
use crate::domain::task::{ImportState, QueuedChunkTask, TaskStatus, TemporaryFile};
use crate::importer::error::{ImportError, ImportResult};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

const TASK_COLUMNS: &str = "task_id, payload, status, retry_count, max_retries, \
     created_at, started_at, completed_at, error_message";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 队列中的任务记录
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTaskRecord {
    pub task: QueuedChunkTask,
    pub status: TaskStatus,
    /// 已失败次数
    pub retry_count: u32,
    /// 最大尝试次数
    pub max_retries: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

impl QueuedTaskRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let payload: String = row.get(1)?;
        let task: QueuedChunkTask = serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
        let status: String = row.get(2)?;

        Ok(Self {
            task,
            status: TaskStatus::from_str(&status),
            retry_count: row.get(3)?,
            max_retries: row.get(4)?,
            created_at: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            error_message: row.get(8)?,
        })
    }
}

/// 单次导入的任务统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl QueueStats {
    /// 所有任务均已到达终态
    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// 队列导入汇总（传给完成回调）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedImportSummary {
    pub import_id: String,
    pub state: ImportState,
    pub total_chunks: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// 全部分块的失败项（按行号排序）
    pub failures: Vec<Failure>,
    /// 本次导入共享的临时文件
    pub temporary_file: TemporaryFile,
}

// ==========================================
// ChunkTaskQueue - 分块任务队列
// ==========================================
pub struct ChunkTaskQueue {
    conn: Arc<Mutex<Connection>>,
}

impl ChunkTaskQueue {
    /// 创建队列（确保队列表存在）
    pub fn new(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        let queue = Self { conn };
        queue.ensure_queue_tables()?;
        Ok(queue)
    }

    fn lock(&self) -> ImportResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ImportError::Queue(format!("锁获取失败: {}", e)))
    }

    fn ensure_queue_tables(&self) -> ImportResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS import_queue_batch (
                import_id TEXT PRIMARY KEY,
                total_chunks INTEGER NOT NULL,
                temp_file TEXT NOT NULL,
                completion_fired INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS import_chunk_queue (
                task_id TEXT PRIMARY KEY,
                import_id TEXT NOT NULL,
                job_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                sequence_no INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                failures_json TEXT,
                FOREIGN KEY (import_id) REFERENCES import_queue_batch(import_id)
            );

            CREATE INDEX IF NOT EXISTS idx_chunk_queue_status
              ON import_chunk_queue(status, created_at, sequence_no);

            CREATE INDEX IF NOT EXISTS idx_chunk_queue_import
              ON import_chunk_queue(import_id, status);
            "#,
        )?;
        Ok(())
    }

    /// 提交一次导入的全部分块任务（同一事务）
    ///
    /// # 返回
    /// - Ok(Vec<String>): 任务 ID（按分块序号）
    pub fn enqueue_import(
        &self,
        import_id: &str,
        temporary_file: &TemporaryFile,
        tasks: &[QueuedChunkTask],
        max_retries: u32,
    ) -> ImportResult<Vec<String>> {
        let conn = self.lock()?;
        let created_at = now();
        let temp_json = serde_json::to_string(temporary_file)?;

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO import_queue_batch (import_id, total_chunks, temp_file, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![import_id, tasks.len() as i64, temp_json, created_at],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO import_chunk_queue (
                    task_id, import_id, job_name, payload, sequence_no,
                    status, retry_count, max_retries, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', 0, ?6, ?7)
                "#,
            )?;
            for task in tasks {
                stmt.execute(params![
                    task.task_id,
                    import_id,
                    task.job_name,
                    serde_json::to_string(task)?,
                    task.sequence as i64,
                    max_retries,
                    created_at,
                ])?;
            }
        }
        tx.commit()?;

        info!(import_id, tasks = tasks.len(), "分块任务已加入队列");
        Ok(tasks.iter().map(|t| t.task_id.clone()).collect())
    }

    /// 取出下一个待执行任务并置为 RUNNING
    pub fn dequeue(&self) -> ImportResult<Option<QueuedTaskRecord>> {
        let conn = self.lock()?;

        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_chunk_queue WHERE status = 'PENDING' \
                     ORDER BY created_at ASC, sequence_no ASC LIMIT 1",
                    TASK_COLUMNS
                ),
                [],
                QueuedTaskRecord::from_row,
            )
            .optional()?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        let started_at = now();
        conn.execute(
            "UPDATE import_chunk_queue SET status = 'RUNNING', started_at = ?1 WHERE task_id = ?2 AND status = 'PENDING'",
            params![started_at, record.task.task_id],
        )?;
        record.status = TaskStatus::Running;
        record.started_at = Some(started_at);
        Ok(Some(record))
    }

    /// 标记任务完成（CollectAndContinue 下附带该分块的失败项）
    pub fn mark_completed(&self, task_id: &str, failures: &[Failure]) -> ImportResult<()> {
        let failures_json = if failures.is_empty() {
            None
        } else {
            Some(serde_json::to_string(failures)?)
        };

        let conn = self.lock()?;
        conn.execute(
            "UPDATE import_chunk_queue SET status = 'COMPLETED', completed_at = ?1, failures_json = ?2 WHERE task_id = ?3",
            params![now(), failures_json, task_id],
        )?;
        Ok(())
    }

    /// 标记任务失败
    ///
    /// # 返回
    /// - Pending: 将重试
    /// - Failed: 不可重试或已达最大次数
    pub fn mark_failed(&self, record: &QueuedTaskRecord, err: &ImportError) -> ImportResult<TaskStatus> {
        let retry_count = record.retry_count + 1;
        let status = if err.is_retryable() && retry_count < record.max_retries {
            TaskStatus::Pending
        } else {
            TaskStatus::Failed
        };

        let failures_json = if err.failures().is_empty() {
            None
        } else {
            Some(serde_json::to_string(err.failures())?)
        };
        let completed_at = (status == TaskStatus::Failed).then(now);

        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE import_chunk_queue
            SET status = ?1, retry_count = ?2, error_message = ?3,
                failures_json = COALESCE(?4, failures_json), completed_at = ?5
            WHERE task_id = ?6
            "#,
            params![
                status.as_str(),
                retry_count,
                err.to_string(),
                failures_json,
                completed_at,
                record.task.task_id,
            ],
        )?;

        match status {
            TaskStatus::Pending => warn!(
                task_id = %record.task.task_id,
                retry_count,
                error = %err,
                "分块任务执行失败，将重试"
            ),
            _ => error!(
                task_id = %record.task.task_id,
                retry_count,
                error = %err,
                "分块任务执行失败，不再重试"
            ),
        }
        Ok(status)
    }

    /// 取消等待中的任务
    ///
    /// # 返回
    /// - true: 已取消
    /// - false: 任务不存在或已开始执行
    pub fn cancel_task(&self, task_id: &str) -> ImportResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE import_chunk_queue SET status = 'CANCELLED', completed_at = ?1 WHERE task_id = ?2 AND status = 'PENDING'",
            params![now(), task_id],
        )?;
        Ok(changed > 0)
    }

    /// 取消一次导入中全部等待中的任务
    ///
    /// # 返回
    /// - Ok(usize): 被取消的任务数（RUNNING 任务不受影响）
    pub fn cancel_pending(&self, import_id: &str) -> ImportResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE import_chunk_queue SET status = 'CANCELLED', completed_at = ?1 WHERE import_id = ?2 AND status = 'PENDING'",
            params![now(), import_id],
        )?;
        if changed > 0 {
            info!(import_id, cancelled = changed, "剩余分块任务已取消");
        }
        Ok(changed)
    }

    /// 单个任务记录
    pub fn get_task_status(&self, task_id: &str) -> ImportResult<Option<QueuedTaskRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_chunk_queue WHERE task_id = ?1",
                    TASK_COLUMNS
                ),
                [task_id],
                QueuedTaskRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// 一次导入的全部任务（按分块序号）
    pub fn list_tasks(&self, import_id: &str) -> ImportResult<Vec<QueuedTaskRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_chunk_queue WHERE import_id = ?1 ORDER BY sequence_no ASC",
            TASK_COLUMNS
        ))?;
        let records = stmt
            .query_map([import_id], QueuedTaskRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn get_queue_stats(&self, import_id: &str) -> ImportResult<QueueStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM import_chunk_queue WHERE import_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map([import_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            match TaskStatus::from_str(&status) {
                TaskStatus::Pending => stats.pending += count,
                TaskStatus::Running => stats.running += count,
                TaskStatus::Completed => stats.completed += count,
                TaskStatus::Failed => stats.failed += count,
                TaskStatus::Cancelled => stats.cancelled += count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// 认领完成回调的执行权
    ///
    /// 仅当全部任务到达终态且尚未认领时返回 true（原子操作）
    pub fn try_claim_completion(&self, import_id: &str) -> ImportResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE import_queue_batch
            SET completion_fired = 1, finished_at = ?2
            WHERE import_id = ?1
              AND completion_fired = 0
              AND NOT EXISTS (
                  SELECT 1 FROM import_chunk_queue
                  WHERE import_id = ?1 AND status IN ('PENDING', 'RUNNING')
              )
            "#,
            params![import_id, now()],
        )?;
        Ok(changed == 1)
    }

    /// 导入汇总
    pub fn summary(&self, import_id: &str) -> ImportResult<QueuedImportSummary> {
        let stats = self.get_queue_stats(import_id)?;

        let conn = self.lock()?;
        let batch: Option<(i64, String)> = conn
            .query_row(
                "SELECT total_chunks, temp_file FROM import_queue_batch WHERE import_id = ?1",
                [import_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (total_chunks, temp_json) =
            batch.ok_or_else(|| ImportError::Queue(format!("导入不存在: {}", import_id)))?;
        let temporary_file: TemporaryFile = serde_json::from_str(&temp_json)?;

        let mut stmt = conn.prepare(
            "SELECT failures_json FROM import_chunk_queue WHERE import_id = ?1 AND failures_json IS NOT NULL ORDER BY sequence_no ASC",
        )?;
        let chunks = stmt
            .query_map([import_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut failures = Vec::new();
        for json in chunks {
            failures.extend(serde_json::from_str::<Vec<Failure>>(&json)?);
        }
        failures.sort_by_key(|f| f.row);

        let state = if !stats.is_finished() {
            ImportState::Dispatched
        } else if stats.failed > 0 || stats.cancelled > 0 {
            ImportState::AbortedOnFailure
        } else {
            ImportState::AllCompleted
        };

        Ok(QueuedImportSummary {
            import_id: import_id.to_string(),
            state,
            total_chunks: total_chunks as usize,
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            failures,
            temporary_file,
        })
    }

    /// 导入共享的临时文件
    pub fn temporary_file(&self, import_id: &str) -> ImportResult<Option<TemporaryFile>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT temp_file FROM import_queue_batch WHERE import_id = ?1",
                [import_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(ImportError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CellValue;
    use std::path::PathBuf;

    fn queue() -> ChunkTaskQueue {
        let conn = Connection::open_in_memory().unwrap();
        ChunkTaskQueue::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn temp() -> TemporaryFile {
        TemporaryFile::Local {
            path: PathBuf::from("/tmp/excel-bridge-test.csv"),
        }
    }

    fn tasks(import_id: &str, n: usize) -> Vec<QueuedChunkTask> {
        (0..n)
            .map(|i| QueuedChunkTask::new(import_id, "users", temp(), 0, i * 10, 10, None, i, n))
            .collect()
    }

    #[test]
    fn test_dequeue_in_sequence_order() {
        let queue = queue();
        let ids = queue.enqueue_import("imp-1", &temp(), &tasks("imp-1", 3), 3).unwrap();

        let first = queue.dequeue().unwrap().unwrap();
        assert_eq!(first.task.task_id, ids[0]);
        assert_eq!(first.status, TaskStatus::Running);
        let second = queue.dequeue().unwrap().unwrap();
        assert_eq!(second.task.sequence, 1);

        let stats = queue.get_queue_stats("imp-1").unwrap();
        assert_eq!(stats.running, 2);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_retry_until_max_then_failed() {
        let queue = queue();
        queue.enqueue_import("imp-2", &temp(), &tasks("imp-2", 1), 2).unwrap();
        let err = ImportError::SourceRead("broken".to_string());

        let record = queue.dequeue().unwrap().unwrap();
        assert_eq!(queue.mark_failed(&record, &err).unwrap(), TaskStatus::Pending);

        let record = queue.dequeue().unwrap().unwrap();
        assert_eq!(record.retry_count, 1);
        assert_eq!(queue.mark_failed(&record, &err).unwrap(), TaskStatus::Failed);
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn test_validation_failure_is_terminal() {
        let queue = queue();
        queue.enqueue_import("imp-3", &temp(), &tasks("imp-3", 1), 3).unwrap();
        let failure = Failure::new(4, "1", vec!["bad".to_string()], vec![CellValue::from("c")]);
        let err = ImportError::from(crate::importer::error::ValidationError::new(vec![failure]));

        let record = queue.dequeue().unwrap().unwrap();
        assert_eq!(queue.mark_failed(&record, &err).unwrap(), TaskStatus::Failed);

        let summary = queue.summary("imp-3").unwrap();
        assert_eq!(summary.state, ImportState::AbortedOnFailure);
        assert_eq!(summary.failures.len(), 1);
    }

    #[test]
    fn test_completion_claimed_once_after_terminal() {
        let queue = queue();
        let ids = queue.enqueue_import("imp-4", &temp(), &tasks("imp-4", 2), 3).unwrap();

        let record = queue.dequeue().unwrap().unwrap();
        queue.mark_completed(&record.task.task_id, &[]).unwrap();
        assert!(!queue.try_claim_completion("imp-4").unwrap());

        assert!(queue.cancel_task(&ids[1]).unwrap());
        assert!(queue.try_claim_completion("imp-4").unwrap());
        assert!(!queue.try_claim_completion("imp-4").unwrap());

        let summary = queue.summary("imp-4").unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(queue.temporary_file("imp-4").unwrap(), Some(temp()));
    }

    #[test]
    fn test_cancel_pending_leaves_running_and_other_imports() {
        let queue = queue();
        queue.enqueue_import("imp-5", &temp(), &tasks("imp-5", 3), 3).unwrap();
        queue.enqueue_import("imp-6", &temp(), &tasks("imp-6", 1), 3).unwrap();

        let running = queue.dequeue().unwrap().unwrap();
        assert_eq!(running.task.import_id, "imp-5");
        assert_eq!(queue.cancel_pending("imp-5").unwrap(), 2);

        let record = queue.get_task_status(&running.task.task_id).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert!(queue.get_task_status("missing").unwrap().is_none());
        assert_eq!(queue.get_queue_stats("imp-6").unwrap().pending, 1);
    }
}
