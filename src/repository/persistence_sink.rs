// ==========================================
// 表格导入导出管道 - 落库接口
// ==========================================
// 职责: 定义批量/单条落库接口（不包含实现细节）
// 约定: 一次调用即一个原子单元
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use std::sync::Mutex;

// ==========================================
// PersistenceSink Trait
// ==========================================
// 实现者: SqliteRecordSink / MemorySink
pub trait PersistenceSink<E>: Send + Sync {
    /// 批量写入（同一事务）
    ///
    /// # 返回
    /// - Ok(usize): 写入条数
    fn insert_many(&self, entities: Vec<E>) -> RepositoryResult<usize>;

    /// 单条写入
    fn insert_one(&self, entity: E) -> RepositoryResult<()> {
        self.insert_many(vec![entity]).map(|_| ())
    }
}

// ==========================================
// MemorySink - 内存落库
// ==========================================
// 用途: 测试与 to_array 类场景
#[derive(Debug)]
pub struct MemorySink<E> {
    entities: Mutex<Vec<E>>,
    units: Mutex<Vec<usize>>,
}

impl<E> Default for MemorySink<E> {
    fn default() -> Self {
        Self {
            entities: Mutex::new(Vec::new()),
            units: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> MemorySink<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入的实体（按写入顺序）
    pub fn entities(&self) -> Vec<E> {
        self.entities
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entities.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 每个原子单元的条数（insert_many / insert_one 各算一个单元）
    pub fn units(&self) -> Vec<usize> {
        self.units
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl<E: Clone + Send> PersistenceSink<E> for MemorySink<E> {
    fn insert_many(&self, entities: Vec<E>) -> RepositoryResult<usize> {
        let count = entities.len();
        let mut guard = self
            .entities
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        guard.extend(entities);

        self.units
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .push(count);
        Ok(count)
    }
}
