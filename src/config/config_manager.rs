// ==========================================
// 表格导入导出管道 - 配置管理器
// ==========================================
// 职责: 从 config_kv 表加载管道配置覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::pipeline_config::PipelineConfig;
use crate::db::open_sqlite_connection;
use crate::domain::row::HeadingFormatter;
use crate::domain::types::FailurePolicy;
use crate::importer::error::{ImportError, ImportResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// 配置键
pub mod config_keys {
    pub const CHUNK_SIZE: &str = "excel.chunk_size";
    pub const FAILURE_POLICY: &str = "excel.failure_policy";
    pub const HEADING_ROW: &str = "excel.heading_row";
    pub const HEADING_FORMATTER: &str = "excel.heading_formatter";
    pub const CSV_DELIMITER: &str = "excel.csv.delimiter";
    pub const CSV_ENCLOSURE: &str = "excel.csv.enclosure";
    pub const CSV_LINE_ENDING: &str = "excel.csv.line_ending";
    pub const CSV_USE_BOM: &str = "excel.csv.use_bom";
    pub const CSV_INCLUDE_SEPARATOR_LINE: &str = "excel.csv.include_separator_line";
    pub const CSV_EXCEL_COMPATIBILITY: &str = "excel.csv.excel_compatibility";
    pub const CSV_INPUT_ENCODING: &str = "excel.csv.input_encoding";
    pub const QUEUE_ENABLED: &str = "excel.queue.enabled";
    pub const QUEUE_REMOTE_DISK: &str = "excel.queue.remote_disk";
    pub const QUEUE_MAX_RETRIES: &str = "excel.queue.max_retries";
    pub const QUEUE_WORKERS: &str = "excel.queue.workers";
    pub const TEMP_LOCAL_PATH: &str = "excel.temp.local_path";
    pub const TEMP_REMOTE_ROOT: &str = "excel.temp.remote_root";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从已有连接创建 ConfigManager（会确保 config_kv 表存在）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        let manager = Self { conn };
        manager.ensure_config_table()?;
        Ok(manager)
    }

    fn lock(&self) -> ImportResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ImportError::Configuration(format!("锁获取失败: {}", e)))
    }

    fn ensure_config_table(&self) -> ImportResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_kv (
                scope_id TEXT NOT NULL DEFAULT 'global',
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (scope_id, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入配置值（覆盖已有值）
    pub fn set_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 excel.* 配置（按键排序）
    pub fn get_config_snapshot(&self) -> ImportResult<BTreeMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' AND key LIKE 'excel.%' ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// 加载管道配置：默认值 + config_kv 覆写
    pub fn load_pipeline_config(&self) -> ImportResult<PipelineConfig> {
        let mut config = PipelineConfig::default();
        let snapshot = self.get_config_snapshot()?;

        for (key, value) in &snapshot {
            apply_override(&mut config, key, value)?;
        }

        debug!(overrides = snapshot.len(), "管道配置加载完成");
        config.validate()?;
        Ok(config)
    }
}

/// 将单个配置项应用到 PipelineConfig
fn apply_override(config: &mut PipelineConfig, key: &str, value: &str) -> ImportResult<()> {
    use config_keys::*;

    let raw = value.trim();
    match key {
        CHUNK_SIZE => config.chunk_size = parse_number(key, raw)?,
        FAILURE_POLICY => {
            config.failure_policy = FailurePolicy::parse(raw).ok_or_else(|| value_error(key, raw))?
        }
        HEADING_ROW => {
            config.heading_row_index = match raw {
                "" | "0" | "none" => None,
                _ => Some(parse_number(key, raw)?),
            }
        }
        HEADING_FORMATTER => {
            config.heading_formatter = match raw.to_ascii_lowercase().as_str() {
                "slug" => HeadingFormatter::Slug,
                "none" => HeadingFormatter::None,
                _ => return Err(value_error(key, raw)),
            }
        }
        // 分隔符/包围符不 trim（允许制表符）
        CSV_DELIMITER => config.csv.delimiter = parse_char(key, value)?.ok_or_else(|| value_error(key, value))?,
        CSV_ENCLOSURE => config.csv.enclosure = parse_char(key, value)?,
        CSV_LINE_ENDING => {
            config.csv.line_ending = value.replace("\\r", "\r").replace("\\n", "\n")
        }
        CSV_USE_BOM => config.csv.use_bom = parse_bool(key, raw)?,
        CSV_INCLUDE_SEPARATOR_LINE => config.csv.include_separator_line = parse_bool(key, raw)?,
        CSV_EXCEL_COMPATIBILITY => config.csv.excel_compatibility = parse_bool(key, raw)?,
        CSV_INPUT_ENCODING => config.csv.input_encoding = raw.to_string(),
        QUEUE_ENABLED => config.queue.enabled = parse_bool(key, raw)?,
        QUEUE_REMOTE_DISK => {
            config.queue.remote_disk = if raw.is_empty() {
                None
            } else {
                Some(raw.to_string())
            }
        }
        QUEUE_MAX_RETRIES => config.queue.max_retries = parse_number(key, raw)?,
        QUEUE_WORKERS => config.queue.workers = parse_number(key, raw)?,
        TEMP_LOCAL_PATH => config.temp.local_path = PathBuf::from(raw),
        TEMP_REMOTE_ROOT => config.temp.remote_root = Some(PathBuf::from(raw)),
        _ => warn!(config_key = key, "未知配置项，已忽略"),
    }
    Ok(())
}

fn value_error(key: &str, value: &str) -> ImportError {
    ImportError::Configuration(format!("配置值格式错误 (key: {}, value: {})", key, value))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> ImportResult<T> {
    raw.parse::<T>().map_err(|_| value_error(key, raw))
}

fn parse_bool(key: &str, raw: &str) -> ImportResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(value_error(key, raw)),
    }
}

fn parse_char(key: &str, raw: &str) -> ImportResult<Option<char>> {
    let unescaped = raw.replace("\\t", "\t");
    let mut chars = unescaped.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(None),
        (Some(c), None) => Ok(Some(c)),
        _ => Err(value_error(key, raw)),
    }
}
