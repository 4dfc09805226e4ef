// ==========================================
// 表格导入导出管道 - SQLite 记录落库
// ==========================================
// 职责: 将行实体（单元格值数组）写入指定表
// 事务: 每次 insert_many 一个事务（unchecked_transaction + 预编译语句）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::CellValue;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::persistence_sink::PersistenceSink;
use rusqlite::{params_from_iter, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// 校验 SQL 标识符（仅允许字母、数字、下划线，且不以数字开头）
fn check_identifier(name: &str) -> RepositoryResult<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::InvalidIdentifier(name.to_string()))
    }
}

pub struct SqliteRecordSink {
    conn: Arc<Mutex<Connection>>,
    table: String,
    columns: Vec<String>,
    insert_sql: String,
}

impl SqliteRecordSink {
    /// 创建记录落库
    ///
    /// # 参数
    /// - conn: 共享连接
    /// - table: 目标表名
    /// - columns: 列名（与实体中的单元格顺序一一对应）
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        table: &str,
        columns: &[&str],
    ) -> RepositoryResult<Self> {
        check_identifier(table)?;
        for column in columns {
            check_identifier(column)?;
        }
        if columns.is_empty() {
            return Err(RepositoryError::InvalidIdentifier(format!(
                "{}: 列清单为空",
                table
            )));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(Self {
            conn,
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            insert_sql,
        })
    }

    /// 打开数据库文件并创建记录落库
    pub fn open(db_path: &str, table: &str, columns: &[&str]) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::new(Arc::new(Mutex::new(conn)), table, columns)
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(format!("锁获取失败: {}", e)))
    }

    /// 确保目标表存在（无类型列，保留单元格原始类型）
    pub fn ensure_table(&self) -> RepositoryResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {});",
            self.table,
            self.columns.join(", ")
        ))?;
        Ok(())
    }

    /// 表中记录数
    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl PersistenceSink<Vec<CellValue>> for SqliteRecordSink {
    fn insert_many(&self, entities: Vec<Vec<CellValue>>) -> RepositoryResult<usize> {
        for entity in &entities {
            if entity.len() != self.columns.len() {
                return Err(RepositoryError::ColumnCountMismatch {
                    table: self.table.clone(),
                    expected: self.columns.len(),
                    actual: entity.len(),
                });
            }
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&self.insert_sql)?;
            for entity in &entities {
                stmt.execute(params_from_iter(entity.iter()))?;
            }
        }
        tx.commit()?;

        debug!(table = %self.table, count = entities.len(), "批量写入完成");
        Ok(entities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> SqliteRecordSink {
        let conn = Connection::open_in_memory().unwrap();
        let sink = SqliteRecordSink::new(Arc::new(Mutex::new(conn)), "users", &["name", "status"])
            .unwrap();
        sink.ensure_table().unwrap();
        sink
    }

    #[test]
    fn test_insert_many_and_count() {
        let sink = sink();
        let written = sink
            .insert_many(vec![
                vec!["a".into(), "x".into()],
                vec!["b".into(), CellValue::Empty],
            ])
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(sink.count().unwrap(), 2);
    }

    #[test]
    fn test_column_mismatch_writes_nothing() {
        let sink = sink();
        let result = sink.insert_many(vec![vec!["a".into(), "x".into()], vec!["b".into()]]);
        assert!(matches!(
            result,
            Err(RepositoryError::ColumnCountMismatch { .. })
        ));
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(SqliteRecordSink::new(Arc::new(Mutex::new(conn)), "users; DROP", &["a"]).is_err());
    }

    #[test]
    fn test_failed_statement_rolls_back_unit() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE codes (code TEXT NOT NULL UNIQUE);")
            .unwrap();
        let sink = SqliteRecordSink::new(Arc::new(Mutex::new(conn)), "codes", &["code"]).unwrap();

        let result = sink.insert_many(vec![vec!["a".into()], vec!["a".into()]]);
        assert!(matches!(
            result,
            Err(RepositoryError::UniqueConstraintViolation(_))
        ));
        assert_eq!(sink.count().unwrap(), 0);
    }
}
