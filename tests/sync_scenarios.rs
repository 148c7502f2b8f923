use async_trait::async_trait;
use projsync_lib::core::{PlannedAction, ScanConfig, SyncAction};
use projsync_lib::storage::{FileInfo, FsStorage};
use projsync_lib::{DiffResult, Result, Storage, SyncDirection, SyncEngine, SyncError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const NS: &str = "/proj";

struct Setup {
    local: TempDir,
    remote: TempDir,
    storage: Arc<dyn Storage>,
}

impl Setup {
    fn new() -> Self {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsStorage::new(remote.path().to_str().unwrap()).unwrap());
        Self {
            local,
            remote,
            storage,
        }
    }

    fn local_root(&self) -> &Path {
        self.local.path()
    }

    fn remote_root(&self) -> std::path::PathBuf {
        self.remote.path().join("proj")
    }

    fn engine(&self) -> SyncEngine {
        SyncEngine::new(self.storage.clone())
    }
}

fn write(root: &Path, rel: &str, data: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// 目录下所有文件：相对路径 -> 内容
fn tree(root: &Path) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if !root.exists() {
        return out;
    }
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_str()
                .unwrap()
                .replace('\\', "/");
            out.insert(rel, std::fs::read_to_string(entry.path()).unwrap());
        }
    }
    out
}

fn actions(plan: &[PlannedAction]) -> BTreeMap<String, (DiffResult, SyncAction)> {
    plan.iter()
        .map(|p| (p.path.to_string(), (p.result, p.action)))
        .collect()
}

#[tokio::test]
async fn test_push_makes_remote_match_local() {
    let s = Setup::new();
    write(s.local_root(), "a.txt", "new contents");
    write(s.local_root(), "b/c.txt", "2");
    write(&s.remote_root(), "a.txt", "old");
    write(&s.remote_root(), "d.txt", "stale");

    let report = s.engine().push(s.local_root(), NS).await.unwrap();

    assert_eq!(tree(&s.remote_root()), tree(s.local_root()));
    assert_eq!(report.files_uploaded, 2);
    assert_eq!(report.remote_deleted, 1);
    assert_eq!(report.bytes_transferred, 13);
}

#[tokio::test]
async fn test_pull_makes_local_match_remote() {
    let s = Setup::new();
    write(&s.remote_root(), "a.txt", "remote");
    write(&s.remote_root(), "docs/new.md", "# new");
    write(s.local_root(), "a.txt", "local!");
    write(s.local_root(), "old/extra.txt", "gone soon");

    let report = s.engine().pull(s.local_root(), NS).await.unwrap();

    assert_eq!(tree(s.local_root()), tree(&s.remote_root()));
    assert_eq!(report.files_downloaded, 2);
    assert_eq!(report.local_deleted, 1);
    // 删除后空目录一并清理
    assert!(!s.local_root().join("old").exists());
}

#[tokio::test]
async fn test_pull_creates_missing_local_root() {
    let s = Setup::new();
    write(&s.remote_root(), "x/y.txt", "y");
    let target = s.local_root().join("fresh");

    s.engine().pull(&target, NS).await.unwrap();

    assert_eq!(tree(&target).get("x/y.txt").map(String::as_str), Some("y"));
}

#[tokio::test]
async fn test_same_size_different_hash_is_mismatch() {
    let s = Setup::new();
    write(s.local_root(), "a.txt", "hello");
    write(&s.remote_root(), "a.txt", "world");

    let plan = s
        .engine()
        .analyze(s.local_root(), NS, SyncDirection::Push)
        .await
        .unwrap();
    assert_eq!(
        actions(&plan)["a.txt"],
        (DiffResult::Mismatch, SyncAction::Upload)
    );

    s.engine().push(s.local_root(), NS).await.unwrap();
    assert_eq!(tree(&s.remote_root())["a.txt"], "hello");
}

#[tokio::test]
async fn test_skip_filter_applies_to_both_sides() {
    let s = Setup::new();
    write(s.local_root(), "src/main.rs", "fn main() {}");
    write(s.local_root(), ".git/HEAD", "ref: refs/heads/main");
    write(&s.remote_root(), "build.tmp", "scratch");

    let config = ScanConfig {
        exclude_patterns: vec![".git/**".into(), "*.tmp".into()],
        max_file_size: 0,
    };
    let engine = SyncEngine::with_config(s.storage.clone(), &config);

    let plan = engine
        .analyze(s.local_root(), NS, SyncDirection::Push)
        .await
        .unwrap();
    let planned = actions(&plan);
    assert_eq!(planned.len(), 1);
    assert!(planned.contains_key("src/main.rs"));

    engine.push(s.local_root(), NS).await.unwrap();
    let remote = tree(&s.remote_root());
    assert!(remote.contains_key("build.tmp"));
    assert!(!remote.contains_key(".git/HEAD"));
    assert!(remote.contains_key("src/main.rs"));
}

#[tokio::test]
async fn test_absent_namespace_uploads_everything() {
    let s = Setup::new();
    write(s.local_root(), "one.txt", "1");
    write(s.local_root(), "two/three.txt", "3");

    let plan = s
        .engine()
        .analyze(s.local_root(), NS, SyncDirection::Push)
        .await
        .unwrap();
    assert!(plan.iter().all(|p| p.result == DiffResult::OnlyLocal));
    assert_eq!(plan.len(), 2);

    let report = s.engine().push(s.local_root(), NS).await.unwrap();
    assert_eq!(report.files_uploaded, 2);
    assert_eq!(tree(&s.remote_root()), tree(s.local_root()));
}

#[tokio::test]
async fn test_push_is_idempotent() {
    let s = Setup::new();
    write(s.local_root(), "a.txt", "a");
    write(s.local_root(), "deep/er/b.bin", "bbbb");
    write(&s.remote_root(), "c.txt", "c");

    s.engine().push(s.local_root(), NS).await.unwrap();

    let plan = s
        .engine()
        .analyze(s.local_root(), NS, SyncDirection::Push)
        .await
        .unwrap();
    assert_eq!(plan.len(), 2);
    assert!(plan
        .iter()
        .all(|p| p.result == DiffResult::Match && p.action == SyncAction::None));

    let report = s.engine().push(s.local_root(), NS).await.unwrap();
    assert_eq!(report.actions(), 0);
    assert_eq!(report.files_unchanged, 2);
}

#[tokio::test]
async fn test_pull_then_push_converges() {
    let s = Setup::new();
    write(&s.remote_root(), "r1.txt", "remote one");
    write(&s.remote_root(), "nested/r2.txt", "remote two");
    write(s.local_root(), "l1.txt", "local one");

    s.engine().pull(s.local_root(), NS).await.unwrap();
    let report = s.engine().push(s.local_root(), NS).await.unwrap();

    assert_eq!(report.actions(), 0);
    assert_eq!(tree(s.local_root()), tree(&s.remote_root()));
}

#[tokio::test]
async fn test_progress_events() {
    let s = Setup::new();
    write(s.local_root(), "a.txt", "a");
    write(s.local_root(), "b.txt", "b");

    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let engine = s.engine().with_progress(tx);
    engine.push(s.local_root(), NS).await.unwrap();
    drop(engine);

    let mut files = Vec::new();
    while let Some(progress) = rx.recv().await {
        assert_eq!(progress.action, SyncAction::Upload);
        files.push(progress.current_file);
    }
    assert_eq!(files, vec!["a.txt", "b.txt"]);
}

/// 第一次上传指定文件时失败
struct FlakyStorage {
    inner: FsStorage,
    fail_on: &'static str,
    tripped: AtomicBool,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn list_recursive(&self, namespace: &str) -> Result<Vec<FileInfo>> {
        self.inner.list_recursive(namespace).await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        if remote.ends_with(self.fail_on) && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Backend(format!("injected failure: {}", remote)));
        }
        self.inner.upload(local, remote).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        self.inner.download(remote, local).await
    }

    async fn delete(&self, remote: &str) -> Result<()> {
        self.inner.delete(remote).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test]
async fn test_failure_stops_push_and_rerun_finishes() {
    let s = Setup::new();
    write(s.local_root(), "a.txt", "a");
    write(s.local_root(), "b.txt", "b");
    write(s.local_root(), "c.txt", "c");

    let storage = Arc::new(FlakyStorage {
        inner: FsStorage::new(s.remote.path().to_str().unwrap()).unwrap(),
        fail_on: "b.txt",
        tripped: AtomicBool::new(false),
    });
    let engine = SyncEngine::new(storage);

    let err = engine.push(s.local_root(), NS).await.unwrap_err();
    assert!(matches!(err, SyncError::Backend(_)));

    // 失败之前的动作保留，之后的动作未执行
    let partial = tree(&s.remote_root());
    assert!(partial.contains_key("a.txt"));
    assert!(!partial.contains_key("b.txt"));
    assert!(!partial.contains_key("c.txt"));

    let report = engine.push(s.local_root(), NS).await.unwrap();
    assert_eq!(report.files_uploaded, 2);
    assert_eq!(report.files_unchanged, 1);
    assert_eq!(tree(&s.remote_root()), tree(s.local_root()));
}

#[tokio::test]
async fn test_local_walk_error_aborts() {
    let s = Setup::new();
    write(&s.remote_root(), "a.txt", "a");

    let missing = s.local_root().join("does-not-exist");
    let result = s.engine().push(&missing, NS).await;
    assert!(result.is_err());
    // 远程未被修改
    assert_eq!(tree(&s.remote_root()).len(), 1);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_unmappable_local_names_do_not_block_sync() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let s = Setup::new();
    write(s.local_root(), "ok.txt", "fine");
    write(s.local_root(), "dir/a\\b.txt", "backslash");
    std::fs::write(
        s.local_root().join(OsStr::from_bytes(b"bad\xff.txt")),
        "latin1",
    )
    .unwrap();

    let report = s.engine().push(s.local_root(), NS).await.unwrap();
    assert_eq!(report.files_uploaded, 1);
    assert_eq!(
        std::fs::read_to_string(s.remote_root().join("ok.txt")).unwrap(),
        "fine"
    );

    // 再次推送不再有动作
    let report = s.engine().push(s.local_root(), NS).await.unwrap();
    assert_eq!(report.actions(), 0);

    // 拉取不会删除被跳过的本地文件
    s.engine().pull(s.local_root(), NS).await.unwrap();
    assert!(s.local_root().join("dir/a\\b.txt").exists());
    assert!(s.local_root().join(OsStr::from_bytes(b"bad\xff.txt")).exists());
}
