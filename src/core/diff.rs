//! 本地与远程的逐路径比较

use crate::core::inventory::{RemoteInventory, RemoteSnapshot};
use crate::core::path::RelativePath;
use crate::core::scanner::{DirectoryScanner, LocalEntry, SkipFn};
use crate::error::Result;
use crate::storage::{FileInfo, Storage};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// 单个路径的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffResult {
    /// 两侧内容相同
    Match,
    /// 两侧都存在但内容不同
    Mismatch,
    OnlyLocal,
    OnlyRemote,
}

/// 一条比较结果及两侧的元数据
#[derive(Debug, Clone)]
pub struct Diff {
    pub path: RelativePath,
    pub result: DiffResult,
    pub local: Option<LocalEntry>,
    pub remote: Option<FileInfo>,
}

/// 惰性比较流：本地条目按遍历顺序产出，之后才是仅远程存在的条目
///
/// 调用方停止拉取即中止遍历，不会再计算哈希。出错后流结束。
pub struct DiffWalk {
    local: std::vec::IntoIter<LocalEntry>,
    remote: RemoteSnapshot,
    /// 大小写折叠后的路径 -> 快照中的原始路径，仅用于不区分大小写的存储
    folded: Option<HashMap<String, RelativePath>>,
    seen: HashSet<RelativePath>,
    remote_only: Option<std::vec::IntoIter<RelativePath>>,
    include_matches: bool,
    failed: bool,
}

impl DiffWalk {
    fn new(
        local: Vec<LocalEntry>,
        remote: RemoteSnapshot,
        include_matches: bool,
        case_insensitive: bool,
    ) -> Self {
        let folded = case_insensitive.then(|| {
            remote
                .keys()
                .map(|p| (p.as_str().to_lowercase(), p.clone()))
                .collect()
        });
        Self {
            seen: HashSet::with_capacity(local.len()),
            local: local.into_iter(),
            remote,
            folded,
            remote_only: None,
            include_matches,
            failed: false,
        }
    }

    /// 本地路径在远程快照中对应的键
    fn remote_key(&self, path: &RelativePath) -> Option<RelativePath> {
        match &self.folded {
            Some(index) => index.get(&path.as_str().to_lowercase()).cloned(),
            None => self.remote.contains_key(path).then(|| path.clone()),
        }
    }

    pub async fn next(&mut self) -> Option<Result<Diff>> {
        if self.failed {
            return None;
        }

        while let Some(entry) = self.local.next() {
            let key = self.remote_key(&entry.path);
            if let Some(key) = &key {
                self.seen.insert(key.clone());
            }

            let Some(remote) = key.as_ref().and_then(|k| self.remote.get(k)) else {
                return Some(Ok(Diff {
                    path: entry.path.clone(),
                    result: DiffResult::OnlyLocal,
                    local: Some(entry),
                    remote: None,
                }));
            };

            // 大小只是预筛，大小相同必须比较哈希
            let result = if entry.size != remote.size {
                DiffResult::Mismatch
            } else {
                match &remote.content_hash {
                    None => DiffResult::Mismatch,
                    Some(declared) => match entry.content_hash().await {
                        Ok(hash) if &hash == declared => DiffResult::Match,
                        Ok(_) => DiffResult::Mismatch,
                        Err(e) => {
                            self.failed = true;
                            return Some(Err(e));
                        }
                    },
                }
            };

            debug!("比较 {}: {:?}", entry.path, result);

            if result == DiffResult::Match && !self.include_matches {
                continue;
            }

            return Some(Ok(Diff {
                path: entry.path.clone(),
                result,
                remote: Some(remote.clone()),
                local: Some(entry),
            }));
        }

        if self.remote_only.is_none() {
            let mut pending: Vec<RelativePath> = self
                .remote
                .keys()
                .filter(|p| !self.seen.contains(*p))
                .cloned()
                .collect();
            pending.sort();
            self.remote_only = Some(pending.into_iter());
        }

        let path = self.remote_only.as_mut()?.next()?;
        let remote = self.remote.get(&path).cloned();
        Some(Ok(Diff {
            path,
            result: DiffResult::OnlyRemote,
            local: None,
            remote,
        }))
    }
}

/// 比较引擎
pub struct DiffEngine {
    storage: Arc<dyn Storage>,
    skip: Option<SkipFn>,
    include_matches: bool,
}

impl DiffEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            skip: None,
            include_matches: true,
        }
    }

    pub fn with_skip(mut self, skip: Option<SkipFn>) -> Self {
        self.skip = skip;
        self
    }

    /// 是否产出 Match 结果
    pub fn include_matches(mut self, include: bool) -> Self {
        self.include_matches = include;
        self
    }

    /// 先获取远程快照，再扫描本地目录
    pub async fn diff(&self, local_root: &Path, namespace: &str) -> Result<DiffWalk> {
        let remote =
            RemoteInventory::snapshot(self.storage.as_ref(), namespace, self.skip.as_ref()).await?;

        let local = DirectoryScanner::new(local_root)
            .with_skip(self.skip.clone())
            .scan_async()
            .await?;

        Ok(DiffWalk::new(
            local,
            remote,
            self.include_matches,
            self.storage.case_insensitive(),
        ))
    }

    /// 回调形式，回调返回错误时立即中止
    pub async fn walk_diffs<F>(&self, local_root: &Path, namespace: &str, mut callback: F) -> Result<()>
    where
        F: FnMut(&RelativePath, DiffResult) -> Result<()>,
    {
        let mut walk = self.diff(local_root, namespace).await?;
        while let Some(diff) = walk.next().await {
            let diff = diff?;
            callback(&diff.path, diff.result)?;
        }
        Ok(())
    }
}
