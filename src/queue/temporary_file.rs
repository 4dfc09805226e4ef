// ==========================================
// 表格导入导出管道 - 临时文件存储
// ==========================================
// 职责: 在生产步骤与队列分块任务之间传递源文件
// 实现: LocalTempStorage（本地目录）/ DiskTempStorage（共享远程目录 + 本地缓存）
// 红线: 临时文件在最后一个引用它的任务结束前必须保持可读
// ==========================================

use crate::config::pipeline_config::PipelineConfig;
use crate::domain::task::TemporaryFile;
use crate::importer::error::{ImportError, ImportResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 生成临时文件键
pub fn temp_key(extension: &str) -> String {
    format!("excel-bridge-{}.{}", Uuid::new_v4(), extension)
}

fn storage_error(action: &str, target: &Path, err: io::Error) -> ImportError {
    ImportError::TempStorage(format!("{}失败 ({}): {}", action, target.display(), err))
}

fn check_key(key: &str) -> ImportResult<()> {
    if key.is_empty() || key.contains(|c: char| c == '/' || c == '\\') || key == "." || key == ".." {
        return Err(ImportError::TempStorage(format!("非法的临时文件键: {:?}", key)));
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> ImportResult<()> {
    fs::create_dir_all(dir).map_err(|e| storage_error("创建目录", dir, e))
}

fn remove_if_exists(path: &Path) -> ImportResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_error("删除文件", path, e)),
    }
}

// ==========================================
// TempStorage Trait
// ==========================================
pub trait TempStorage: Send + Sync {
    /// 保存字节内容
    fn store(&self, bytes: &[u8], key: &str) -> ImportResult<TemporaryFile>;

    /// 保存已有文件（默认读入内存后 store）
    fn store_path(&self, path: &Path, key: &str) -> ImportResult<TemporaryFile> {
        let bytes = fs::read(path)?;
        self.store(&bytes, key)
    }

    /// 获取本地可读路径
    fn fetch(&self, file: &TemporaryFile) -> ImportResult<PathBuf>;

    fn exists(&self, file: &TemporaryFile) -> bool;

    /// 删除（文件不存在视为成功）
    fn delete(&self, file: &TemporaryFile) -> ImportResult<()>;
}

// ==========================================
// LocalTempStorage - 本地临时目录
// ==========================================
#[derive(Debug, Clone)]
pub struct LocalTempStorage {
    root: PathBuf,
}

impl LocalTempStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TempStorage for LocalTempStorage {
    fn store(&self, bytes: &[u8], key: &str) -> ImportResult<TemporaryFile> {
        check_key(key)?;
        ensure_dir(&self.root)?;
        let path = self.root.join(key);
        fs::write(&path, bytes).map_err(|e| storage_error("写入临时文件", &path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "临时文件已保存");
        Ok(TemporaryFile::Local { path })
    }

    fn store_path(&self, source: &Path, key: &str) -> ImportResult<TemporaryFile> {
        check_key(key)?;
        ensure_dir(&self.root)?;
        let path = self.root.join(key);
        fs::copy(source, &path)?;
        debug!(path = %path.display(), "临时文件已保存");
        Ok(TemporaryFile::Local { path })
    }

    fn fetch(&self, file: &TemporaryFile) -> ImportResult<PathBuf> {
        match file {
            TemporaryFile::Local { path } if path.exists() => Ok(path.clone()),
            TemporaryFile::Local { path } => Err(ImportError::FileNotFound(format!(
                "临时文件不存在: {}",
                path.display()
            ))),
            TemporaryFile::Remote { disk, .. } => Err(ImportError::TempStorage(format!(
                "本地临时存储无法读取远程磁盘文件: {}",
                disk
            ))),
        }
    }

    fn exists(&self, file: &TemporaryFile) -> bool {
        file.local_path().exists()
    }

    fn delete(&self, file: &TemporaryFile) -> ImportResult<()> {
        remove_if_exists(file.local_path())
    }
}

// ==========================================
// DiskTempStorage - 共享远程目录 + 本地缓存
// ==========================================
// 远程目录是权威副本；本地缓存缺失时从远程重新拉取
#[derive(Debug, Clone)]
pub struct DiskTempStorage {
    disk: String,
    remote_root: PathBuf,
    local_root: PathBuf,
}

impl DiskTempStorage {
    pub fn new(
        disk: impl Into<String>,
        remote_root: impl Into<PathBuf>,
        local_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            disk: disk.into(),
            remote_root: remote_root.into(),
            local_root: local_root.into(),
        }
    }

    pub fn disk(&self) -> &str {
        &self.disk
    }

    fn remote_path(&self, key: &str) -> PathBuf {
        self.remote_root.join(key)
    }

    fn remote_key<'a>(&self, file: &'a TemporaryFile) -> ImportResult<&'a str> {
        match file {
            TemporaryFile::Remote { disk, key, .. } if *disk == self.disk => Ok(key),
            TemporaryFile::Remote { disk, .. } => Err(ImportError::TempStorage(format!(
                "磁盘不匹配: 期望 {}，实际 {}",
                self.disk, disk
            ))),
            TemporaryFile::Local { path } => Err(ImportError::TempStorage(format!(
                "不是远程磁盘文件: {}",
                path.display()
            ))),
        }
    }
}

impl TempStorage for DiskTempStorage {
    fn store(&self, bytes: &[u8], key: &str) -> ImportResult<TemporaryFile> {
        check_key(key)?;
        ensure_dir(&self.remote_root)?;
        ensure_dir(&self.local_root)?;

        let remote = self.remote_path(key);
        fs::write(&remote, bytes).map_err(|e| storage_error("写入远程磁盘", &remote, e))?;
        let local_path = self.local_root.join(key);
        fs::write(&local_path, bytes).map_err(|e| storage_error("写入本地缓存", &local_path, e))?;

        info!(disk = %self.disk, key, bytes = bytes.len(), "临时文件已上传远程磁盘");
        Ok(TemporaryFile::Remote {
            disk: self.disk.clone(),
            key: key.to_string(),
            local_path,
        })
    }

    fn fetch(&self, file: &TemporaryFile) -> ImportResult<PathBuf> {
        let key = self.remote_key(file)?;
        let local_path = file.local_path().to_path_buf();
        if local_path.exists() {
            return Ok(local_path);
        }

        let remote = self.remote_path(key);
        if !remote.exists() {
            return Err(ImportError::FileNotFound(format!(
                "远程磁盘文件不存在: {}://{}",
                self.disk, key
            )));
        }

        warn!(disk = %self.disk, key, "本地缓存缺失，从远程磁盘重新拉取");
        if let Some(parent) = local_path.parent() {
            ensure_dir(parent)?;
        }

        // 并发任务可能同时拉取：先写入独立文件再原子替换
        let staging = local_path.with_file_name(format!("{}.{}.part", key, Uuid::new_v4()));
        fs::copy(&remote, &staging).map_err(|e| storage_error("拉取远程文件", &remote, e))?;
        fs::rename(&staging, &local_path).map_err(|e| storage_error("替换本地缓存", &local_path, e))?;

        Ok(local_path)
    }

    fn exists(&self, file: &TemporaryFile) -> bool {
        self.remote_key(file)
            .map(|key| self.remote_path(key).exists())
            .unwrap_or(false)
    }

    fn delete(&self, file: &TemporaryFile) -> ImportResult<()> {
        let key = self.remote_key(file)?;
        remove_if_exists(&self.remote_path(key))?;
        remove_if_exists(file.local_path())?;
        debug!(disk = %self.disk, key, "临时文件已删除");
        Ok(())
    }
}

/// 按管道配置创建临时存储
pub fn temp_storage_from_config(config: &PipelineConfig) -> ImportResult<Arc<dyn TempStorage>> {
    match (&config.queue.remote_disk, &config.temp.remote_root) {
        (Some(disk), Some(remote_root)) => Ok(Arc::new(DiskTempStorage::new(
            disk.clone(),
            remote_root.clone(),
            config.temp.local_path.clone(),
        ))),
        (Some(disk), None) => Err(ImportError::Configuration(format!(
            "远程磁盘 {} 未配置 temp.remote_root",
            disk
        ))),
        (None, _) => Ok(Arc::new(LocalTempStorage::new(config.temp.local_path.clone()))),
    }
}
