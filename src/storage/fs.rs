use super::{AtomicFile, FileInfo, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::core::hasher::{ContentHasher, BLOCK_SIZE};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// 以本地目录充当远程存储
pub struct FsStorage {
    operator: Operator,
    name: String,
}

impl FsStorage {
    pub fn new(root: &str) -> Result<Self> {
        use opendal::services::Fs;

        std::fs::create_dir_all(root).map_err(|e| SyncError::io(root, e))?;

        let builder = Fs::default().root(root);

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name: format!("fs:{}", root),
        })
    }

    /// 对象路径不带前导 `/`
    fn object_path(remote: &str) -> String {
        remote.trim_start_matches('/').to_string()
    }

    /// 按块读取对象并计算内容哈希
    async fn content_hash(&self, path: &str, size: u64) -> Result<String> {
        let mut hasher = ContentHasher::new();
        let mut offset = 0u64;
        while offset < size {
            let end = (offset + BLOCK_SIZE as u64).min(size);
            let data = self.operator.read_with(path).range(offset..end).await?;
            hasher.update(&data.to_vec());
            offset = end;
        }
        Ok(hasher.finalize())
    }
}

fn map_not_found(e: opendal::Error, path: &str) -> SyncError {
    if e.kind() == opendal::ErrorKind::NotFound {
        SyncError::NotFound(path.to_string())
    } else {
        e.into()
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn list_recursive(&self, namespace: &str) -> Result<Vec<FileInfo>> {
        let ns = namespace.trim_matches('/');
        let dir = if ns.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", ns)
        };

        if !ns.is_empty() {
            match self.operator.stat(&dir).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(SyncError::Backend(format!("不是目录: {}", namespace))),
                Err(e) => return Err(map_not_found(e, namespace)),
            }
        }

        let mut lister = self
            .operator
            .lister_with(&dir)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::Mode)
            .await
            .map_err(|e| map_not_found(e, namespace))?;

        let prefix = if ns.is_empty() { String::new() } else { dir.clone() };
        let mut files = Vec::new();

        while let Some(entry) = lister.try_next().await? {
            let full = entry.path().trim_start_matches('/').to_string();
            let Some(rel) = full.strip_prefix(&prefix) else {
                continue;
            };
            let rel = rel.trim_end_matches('/');

            // 跳过命名空间根目录
            if rel.is_empty() {
                continue;
            }

            let meta = entry.metadata();
            if meta.is_dir() {
                files.push(FileInfo {
                    path: rel.to_string(),
                    size: 0,
                    is_dir: true,
                    content_hash: None,
                });
                continue;
            }

            let size = meta.content_length();
            let content_hash = self.content_hash(&full, size).await?;

            files.push(FileInfo {
                path: rel.to_string(),
                size,
                is_dir: false,
                content_hash: Some(content_hash),
            });
        }

        debug!("{} 列出 {} 个条目: {}", self.name, files.len(), namespace);
        Ok(files)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let path = Self::object_path(remote);
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| SyncError::io(local, e))?;

        let mut writer = self.operator.writer(&path).await?;
        let mut total = 0u64;
        loop {
            let mut buf = Vec::with_capacity(BLOCK_SIZE);
            let n = (&mut file)
                .take(BLOCK_SIZE as u64)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| SyncError::io(local, e))?;
            if n == 0 {
                break;
            }
            total += n as u64;
            writer.write(buf).await?;
        }
        writer.close().await?;

        Ok(total)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let path = Self::object_path(remote);
        let meta = self
            .operator
            .stat(&path)
            .await
            .map_err(|e| map_not_found(e, remote))?;
        let size = meta.content_length();

        let mut out = AtomicFile::create(local).await?;
        let mut offset = 0u64;
        while offset < size {
            let end = (offset + BLOCK_SIZE as u64).min(size);
            let data = self.operator.read_with(&path).range(offset..end).await?;
            out.write_all(&data.to_vec()).await?;
            offset = end;
        }
        out.commit().await?;

        Ok(size)
    }

    async fn delete(&self, remote: &str) -> Result<()> {
        // 删除不存在的文件不会报错
        self.operator.delete(&Self::object_path(remote)).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
