// ==========================================
// 表格导入导出管道 - 队列任务模型
// ==========================================
// 职责: 临时文件引用、分块任务载荷、任务/导入状态
// 红线: QueuedChunkTask 的行号范围在派发时确定，执行期间不可变
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ==========================================
// 临时文件引用 (Temporary File)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemporaryFile {
    /// 本地临时文件
    Local { path: PathBuf },
    /// 远程磁盘上的文件 + 本地缓存路径
    Remote {
        disk: String,
        key: String,
        local_path: PathBuf,
    },
}

impl TemporaryFile {
    /// 本地可读路径（远程文件为缓存路径，可能需要先 fetch）
    pub fn local_path(&self) -> &Path {
        match self {
            TemporaryFile::Local { path } => path,
            TemporaryFile::Remote { local_path, .. } => local_path,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, TemporaryFile::Remote { .. })
    }

    /// 扩展名（用于选择读取器）
    pub fn extension(&self) -> Option<String> {
        self.local_path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

impl fmt::Display for TemporaryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporaryFile::Local { path } => write!(f, "{}", path.display()),
            TemporaryFile::Remote { disk, key, .. } => write!(f, "{}://{}", disk, key),
        }
    }
}

// ==========================================
// 分块任务 (Queued Chunk Task)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedChunkTask {
    /// 任务 ID
    pub task_id: String,
    /// 所属导入 ID
    pub import_id: String,
    /// 处理器注册名
    pub job_name: String,
    /// 共享的临时文件
    pub temporary_file: TemporaryFile,
    /// sheet 序号（从 0 开始）
    pub sheet: usize,
    /// 起始偏移（从 0 开始的源表行偏移）
    pub start_offset: usize,
    /// 本块行数
    pub chunk_size: usize,
    /// 表头行号（从 1 开始）
    pub heading_row_index: Option<usize>,
    /// 分块序号（从 0 开始，跨 sheet 连续）
    pub sequence: usize,
    /// 本次导入的分块总数
    pub total_chunks: usize,
}

impl QueuedChunkTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        import_id: &str,
        job_name: &str,
        temporary_file: TemporaryFile,
        sheet: usize,
        start_offset: usize,
        chunk_size: usize,
        heading_row_index: Option<usize>,
        sequence: usize,
        total_chunks: usize,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            import_id: import_id.to_string(),
            job_name: job_name.to_string(),
            temporary_file,
            sheet,
            start_offset,
            chunk_size,
            heading_row_index,
            sequence,
            total_chunks,
        }
    }

    /// 首行绝对行号（从 1 开始）
    pub fn start_row(&self) -> usize {
        self.start_offset + 1
    }

    /// 末行绝对行号（含）
    pub fn end_row(&self) -> usize {
        self.start_offset + self.chunk_size
    }
}

// ==========================================
// 任务状态 (Task Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待中
    Pending,
    /// 执行中
    Running,
    /// 已完成
    Completed,
    /// 失败（不再重试）
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "COMPLETED" => TaskStatus::Completed,
            "FAILED" => TaskStatus::Failed,
            "CANCELLED" => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        }
    }

    /// 终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

// ==========================================
// 导入状态 (Import State)
// ==========================================
// Created -> Dispatched -> AllCompleted | AbortedOnFailure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportState {
    Created,
    Dispatched,
    AllCompleted,
    AbortedOnFailure,
}

impl ImportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportState::Created => "CREATED",
            ImportState::Dispatched => "DISPATCHED",
            ImportState::AllCompleted => "ALL_COMPLETED",
            ImportState::AbortedOnFailure => "ABORTED_ON_FAILURE",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "CREATED" => ImportState::Created,
            "DISPATCHED" => ImportState::Dispatched,
            "ALL_COMPLETED" => ImportState::AllCompleted,
            _ => ImportState::AbortedOnFailure,
        }
    }
}
