use crate::core::diff::{Diff, DiffEngine, DiffResult};
use crate::core::path::RelativePath;
use crate::core::scanner::{ExcludeFilter, ScanConfig, SkipFn};
use crate::error::{Result, SyncError};
use crate::storage::Storage;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 同步方向，决定哪一侧为准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    /// 本地为准
    Push,
    /// 远程为准
    Pull,
}

/// 同步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncAction {
    None,
    Upload,
    Download,
    DeleteRemote,
    DeleteLocal,
}

impl SyncDirection {
    pub fn action_for(self, result: DiffResult) -> SyncAction {
        match (self, result) {
            (_, DiffResult::Match) => SyncAction::None,
            (SyncDirection::Push, DiffResult::Mismatch | DiffResult::OnlyLocal) => SyncAction::Upload,
            (SyncDirection::Push, DiffResult::OnlyRemote) => SyncAction::DeleteRemote,
            (SyncDirection::Pull, DiffResult::Mismatch | DiffResult::OnlyRemote) => {
                SyncAction::Download
            }
            (SyncDirection::Pull, DiffResult::OnlyLocal) => SyncAction::DeleteLocal,
        }
    }
}

/// 计划中的单个动作（预览用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    pub path: RelativePath,
    pub result: DiffResult,
    pub action: SyncAction,
}

/// 同步进度
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub direction: SyncDirection,
    pub current_file: String,
    pub action: SyncAction,
    pub actions_completed: u32,
    pub bytes_transferred: u64,
}

/// 同步报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub namespace: String,
    pub start_time: i64,
    pub end_time: i64,
    pub files_uploaded: u32,
    pub files_downloaded: u32,
    pub remote_deleted: u32,
    pub local_deleted: u32,
    pub files_unchanged: u32,
    pub bytes_transferred: u64,
}

impl SyncReport {
    fn record(&mut self, action: SyncAction, bytes: u64) {
        match action {
            SyncAction::None => self.files_unchanged += 1,
            SyncAction::Upload => self.files_uploaded += 1,
            SyncAction::Download => self.files_downloaded += 1,
            SyncAction::DeleteRemote => self.remote_deleted += 1,
            SyncAction::DeleteLocal => self.local_deleted += 1,
        }
        self.bytes_transferred += bytes;
    }

    /// 实际执行的动作数（不含未变化的文件）
    pub fn actions(&self) -> u32 {
        self.files_uploaded + self.files_downloaded + self.remote_deleted + self.local_deleted
    }
}

/// 同步引擎：顺序执行，遇到第一个错误立即停止
///
/// 已完成的动作不会回滚，重新运行会从头比较，只处理剩余的差异。
pub struct SyncEngine {
    storage: Arc<dyn Storage>,
    skip: Option<SkipFn>,
    progress_tx: Option<mpsc::Sender<SyncProgress>>,
}

impl SyncEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            skip: None,
            progress_tx: None,
        }
    }

    /// 使用排除规则过滤两侧文件
    pub fn with_config(storage: Arc<dyn Storage>, config: &ScanConfig) -> Self {
        Self::new(storage).with_skip(Some(ExcludeFilter::new(config).into_skip_fn()))
    }

    pub fn with_skip(mut self, skip: Option<SkipFn>) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<SyncProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn diff_engine(&self) -> DiffEngine {
        DiffEngine::new(self.storage.clone()).with_skip(self.skip.clone())
    }

    /// 本地为准：上传本地新增和修改的文件，删除远程多余的文件
    pub async fn push(&self, local_root: &Path, namespace: &str) -> Result<SyncReport> {
        info!("开始推送: {:?} -> {} {}", local_root, self.storage.name(), namespace);
        self.run(SyncDirection::Push, local_root, namespace).await
    }

    /// 远程为准：下载远程新增和修改的文件，删除本地多余的文件
    pub async fn pull(&self, local_root: &Path, namespace: &str) -> Result<SyncReport> {
        info!("开始拉取: {} {} -> {:?}", self.storage.name(), namespace, local_root);
        tokio::fs::create_dir_all(local_root)
            .await
            .map_err(|e| SyncError::io(local_root, e))?;
        self.run(SyncDirection::Pull, local_root, namespace).await
    }

    /// 只比较不执行，返回将要执行的动作
    pub async fn analyze(
        &self,
        local_root: &Path,
        namespace: &str,
        direction: SyncDirection,
    ) -> Result<Vec<PlannedAction>> {
        let mut walk = self.diff_engine().diff(local_root, namespace).await?;
        let mut plan = Vec::new();
        while let Some(diff) = walk.next().await {
            let diff = diff?;
            plan.push(PlannedAction {
                action: direction.action_for(diff.result),
                path: diff.path,
                result: diff.result,
            });
        }
        Ok(plan)
    }

    async fn run(
        &self,
        direction: SyncDirection,
        local_root: &Path,
        namespace: &str,
    ) -> Result<SyncReport> {
        let mut report = SyncReport {
            namespace: namespace.to_string(),
            start_time: chrono::Utc::now().timestamp(),
            ..Default::default()
        };

        let mut walk = self.diff_engine().diff(local_root, namespace).await?;
        while let Some(diff) = walk.next().await {
            let diff = diff?;
            let action = direction.action_for(diff.result);
            let bytes = self.apply(action, &diff, local_root, namespace).await?;
            report.record(action, bytes);

            if action != SyncAction::None {
                self.send_progress(SyncProgress {
                    direction,
                    current_file: diff.path.to_string(),
                    action,
                    actions_completed: report.actions(),
                    bytes_transferred: report.bytes_transferred,
                })
                .await;
            }
        }

        report.end_time = chrono::Utc::now().timestamp();
        info!(
            "同步完成: {} 上传, {} 下载, {} 远程删除, {} 本地删除, {} 未变化, {} 字节",
            report.files_uploaded,
            report.files_downloaded,
            report.remote_deleted,
            report.local_deleted,
            report.files_unchanged,
            report.bytes_transferred
        );

        Ok(report)
    }

    /// 执行单个动作，返回传输的字节数
    async fn apply(
        &self,
        action: SyncAction,
        diff: &Diff,
        local_root: &Path,
        namespace: &str,
    ) -> Result<u64> {
        let remote = diff.path.to_remote(namespace);
        let local = diff.path.to_local(local_root);

        match action {
            SyncAction::None => Ok(0),
            SyncAction::Upload => {
                debug!("上传: {} -> {}", diff.path, remote);
                self.storage.upload(&local, &remote).await
            }
            SyncAction::Download => {
                debug!("下载: {} -> {:?}", remote, local);
                self.storage.download(&remote, &local).await
            }
            SyncAction::DeleteRemote => {
                debug!("删除远程: {}", remote);
                self.storage.delete(&remote).await?;
                Ok(0)
            }
            SyncAction::DeleteLocal => {
                debug!("删除本地: {:?}", local);
                match tokio::fs::remove_file(&local).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!("本地文件已不存在: {:?}", local);
                    }
                    Err(e) => return Err(SyncError::io(&local, e)),
                }
                prune_empty_parents(&local, local_root).await;
                Ok(0)
            }
        }
    }

    /// 发送进度更新
    async fn send_progress(&self, progress: SyncProgress) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress).await;
        }
    }
}

/// 删除文件后清理变空的父目录，不越过同步根
async fn prune_empty_parents(file: &Path, root: &Path) {
    let mut dir = file.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        // 目录非空时删除失败，停止向上
        if tokio::fs::remove_dir(current).await.is_err() {
            break;
        }
        dir = current.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_policy() {
        let push = SyncDirection::Push;
        assert_eq!(push.action_for(DiffResult::Match), SyncAction::None);
        assert_eq!(push.action_for(DiffResult::Mismatch), SyncAction::Upload);
        assert_eq!(push.action_for(DiffResult::OnlyLocal), SyncAction::Upload);
        assert_eq!(push.action_for(DiffResult::OnlyRemote), SyncAction::DeleteRemote);
    }

    #[test]
    fn test_pull_policy() {
        let pull = SyncDirection::Pull;
        assert_eq!(pull.action_for(DiffResult::Match), SyncAction::None);
        assert_eq!(pull.action_for(DiffResult::Mismatch), SyncAction::Download);
        assert_eq!(pull.action_for(DiffResult::OnlyRemote), SyncAction::Download);
        assert_eq!(pull.action_for(DiffResult::OnlyLocal), SyncAction::DeleteLocal);
    }

    #[test]
    fn test_report_counts() {
        let mut report = SyncReport::default();
        report.record(SyncAction::Upload, 10);
        report.record(SyncAction::None, 0);
        report.record(SyncAction::DeleteRemote, 0);
        assert_eq!(report.actions(), 2);
        assert_eq!(report.files_unchanged, 1);
        assert_eq!(report.bytes_transferred, 10);
    }

    #[tokio::test]
    async fn test_prune_empty_parents_stops_at_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("a/keep.txt"), b"k").unwrap();

        prune_empty_parents(&nested.join("gone.txt"), root.path()).await;

        assert!(!root.path().join("a/b").exists());
        assert!(root.path().join("a").exists());
        assert!(root.path().exists());
    }
}
