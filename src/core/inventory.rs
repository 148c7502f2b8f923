use crate::core::path::RelativePath;
use crate::core::scanner::SkipFn;
use crate::error::Result;
use crate::storage::{FileInfo, FileMeta, Storage};
use std::collections::HashMap;
use tracing::{debug, info};

/// 远程快照：相对路径 -> 存储声明的元数据，构建后不再修改
pub type RemoteSnapshot = HashMap<RelativePath, FileInfo>;

pub struct RemoteInventory;

impl RemoteInventory {
    /// 递归列出命名空间下的文件，命名空间不存在时返回空快照
    pub async fn snapshot(
        storage: &dyn Storage,
        namespace: &str,
        skip: Option<&SkipFn>,
    ) -> Result<RemoteSnapshot> {
        info!("开始扫描远程存储: {}, namespace: {}", storage.name(), namespace);

        let entries = match storage.list_recursive(namespace).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => {
                info!("远程命名空间不存在，视为空: {}", namespace);
                return Ok(RemoteSnapshot::new());
            }
            Err(e) => return Err(e),
        };

        let mut snapshot = RemoteSnapshot::with_capacity(entries.len());
        let mut dir_count = 0;
        let mut skipped = 0;

        for entry in entries {
            if entry.is_dir {
                dir_count += 1;
                continue;
            }

            let path = RelativePath::parse(&entry.path)?;
            if let Some(skip) = skip {
                if skip(&path, &FileMeta::from(&entry)) {
                    debug!("跳过远程文件: {}", path);
                    skipped += 1;
                    continue;
                }
            }

            snapshot.insert(path, entry);
        }

        info!(
            "远程扫描完成: {} 个文件, {} 个目录, {} 个被跳过",
            snapshot.len(),
            dir_count,
            skipped
        );

        Ok(snapshot)
    }
}
