pub mod dropbox;
pub mod fs;

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use dropbox::DropboxStorage;
pub use fs::FsStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程条目信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// 相对于命名空间的路径，`/` 分隔
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    /// 存储声明的内容哈希，缺失时不能证明内容相同
    pub content_hash: Option<String>,
}

/// 文件元数据（传给跳过判断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub is_dir: bool,
}

impl From<&FileInfo> for FileMeta {
    fn from(info: &FileInfo) -> Self {
        Self {
            size: info.size,
            is_dir: info.is_dir,
        }
    }
}

/// 存储抽象接口
///
/// 远程路径均为完整路径，如 `/proj/src/main.rs`。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出命名空间下的所有条目，命名空间不存在时返回 `SyncError::NotFound`
    async fn list_recursive(&self, namespace: &str) -> Result<Vec<FileInfo>>;

    /// 上传本地文件，覆盖已存在的远程文件，返回传输的字节数
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64>;

    /// 下载到本地，自动创建父目录，返回传输的字节数
    async fn download(&self, remote: &str, local: &Path) -> Result<u64>;

    /// 删除远程文件
    async fn delete(&self, remote: &str) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;

    /// 路径是否不区分大小写，为 true 时比较按大小写折叠后的路径配对
    fn case_insensitive(&self) -> bool {
        false
    }
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// 以本地目录充当远程存储
    Fs { root: String },
    Dropbox { token: String },
}

/// 根据配置创建存储实例
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config {
        StorageConfig::Fs { root } => {
            tracing::info!("初始化目录存储: {}", root);
            Ok(Arc::new(FsStorage::new(root)?) as Arc<dyn Storage>)
        }
        StorageConfig::Dropbox { token } => {
            if token.trim().is_empty() {
                return Err(SyncError::Backend("Dropbox 存储需要 token".to_string()));
            }
            tracing::info!("初始化 Dropbox 存储");
            Ok(Arc::new(DropboxStorage::new(token)?) as Arc<dyn Storage>)
        }
    }
}

/// 先写入同目录下的临时文件，提交时重命名，未提交则在 Drop 时清理
pub(crate) struct AtomicFile {
    target: PathBuf,
    temp: PathBuf,
    file: Option<tokio::fs::File>,
}

impl AtomicFile {
    pub async fn create(target: &Path) -> Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| SyncError::InvalidPath(target.display().to_string()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::InvalidPath(target.display().to_string()))?;
        let temp = parent.join(format!(".{}.tmp", file_name));

        let file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| SyncError::io(&temp, e))?;

        Ok(Self {
            target: target.to_path_buf(),
            temp,
            file: Some(file),
        })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)
                .await
                .map_err(|e| SyncError::io(&self.temp, e))?;
        }
        Ok(())
    }

    pub async fn commit(mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| SyncError::io(&self.temp, e))?;
            file.sync_all()
                .await
                .map_err(|e| SyncError::io(&self.temp, e))?;
        }
        tokio::fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| SyncError::io(&self.target, e))?;
        // 已重命名，Drop 时无需清理
        self.temp = PathBuf::new();
        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.temp.as_os_str().is_empty() {
            self.file.take();
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
