// ==========================================
// 表格导入导出管道 - 批量写入
// ==========================================
// batch_size = Some(n): 每 n 个实体一次 insert_many（一个原子单元）
// batch_size = None:    逐行 insert_one，每行一个原子单元
// 红线: 单元之间互不影响，不存在跨分块事务
// ==========================================

use crate::domain::row::Row;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::persistence_sink::PersistenceSink;
use std::sync::Arc;
use tracing::debug;

/// 回调错误转换（带行号）
pub(crate) fn callback_error(row: usize, err: anyhow::Error) -> ImportError {
    ImportError::Callback {
        row,
        message: format!("{:#}", err),
    }
}

pub struct BatchInserter<E> {
    sink: Arc<dyn PersistenceSink<E>>,
    batch_size: Option<usize>,
}

impl<E> BatchInserter<E> {
    pub fn new(sink: Arc<dyn PersistenceSink<E>>, batch_size: Option<usize>) -> Self {
        Self { sink, batch_size }
    }

    /// 将通过校验的行转换为实体并写入
    ///
    /// # 参数
    /// - rows: 通过校验的行（已剔除失败行）
    /// - build: 实体构造回调，返回 None 表示忽略该行
    ///
    /// # 返回
    /// - Ok(usize): 写入的实体数
    pub fn commit<F>(&self, rows: &[Row], mut build: F) -> ImportResult<usize>
    where
        F: FnMut(&Row) -> anyhow::Result<Option<E>>,
    {
        let mut written = 0;

        match self.batch_size {
            None => {
                for row in rows {
                    if let Some(entity) = build(row).map_err(|e| callback_error(row.index(), e))? {
                        self.sink.insert_one(entity)?;
                        written += 1;
                    }
                }
            }
            Some(size) => {
                let size = size.max(1);
                let mut pending = Vec::with_capacity(size.min(rows.len()));
                for row in rows {
                    if let Some(entity) = build(row).map_err(|e| callback_error(row.index(), e))? {
                        pending.push(entity);
                    }
                    if pending.len() >= size {
                        written += self.sink.insert_many(std::mem::take(&mut pending))?;
                    }
                }
                if !pending.is_empty() {
                    written += self.sink.insert_many(pending)?;
                }
            }
        }

        debug!(rows = rows.len(), written, batch_size = ?self.batch_size, "批量写入单元提交完成");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CellValue;
    use crate::repository::persistence_sink::MemorySink;

    fn rows(n: usize) -> Vec<Row> {
        (1..=n)
            .map(|i| Row::new(i, vec![CellValue::Int(i as i64)]))
            .collect()
    }

    #[test]
    fn test_batches_split_by_size() {
        let sink = Arc::new(MemorySink::<i64>::new());
        let inserter = BatchInserter::new(sink.clone() as Arc<dyn PersistenceSink<i64>>, Some(2));

        let written = inserter
            .commit(&rows(5), |row| Ok(Some(row.index() as i64)))
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(sink.units(), vec![2, 2, 1]);
        assert_eq!(sink.entities(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_per_row_units_and_skipped_models() {
        let sink = Arc::new(MemorySink::<i64>::new());
        let inserter = BatchInserter::new(sink.clone() as Arc<dyn PersistenceSink<i64>>, None);

        let written = inserter
            .commit(&rows(4), |row| {
                Ok((row.index() % 2 == 0).then(|| row.index() as i64))
            })
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(sink.units(), vec![1, 1]);
    }

    #[test]
    fn test_builder_error_carries_row() {
        let sink = Arc::new(MemorySink::<i64>::new());
        let inserter = BatchInserter::new(sink as Arc<dyn PersistenceSink<i64>>, Some(10));

        let err = inserter
            .commit(&rows(3), |row| {
                if row.index() == 2 {
                    anyhow::bail!("bad row");
                }
                Ok(Some(1))
            })
            .unwrap_err();
        assert!(matches!(err, ImportError::Callback { row: 2, .. }));
    }
}
