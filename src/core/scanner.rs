use crate::core::hasher::hash_file_async;
use crate::core::path::RelativePath;
use crate::error::{Result, SyncError};
use crate::storage::FileMeta;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 跳过判断：返回 true 的路径不参与同步（本地与远程两侧都会调用）
pub type SkipFn = Arc<dyn Fn(&RelativePath, &FileMeta) -> bool + Send + Sync>;

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 最大文件大小（0 表示不限制）
    pub max_file_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: default_exclude_patterns(),
            max_file_size: 0,
        }
    }
}

/// 版本控制元数据等默认排除项
pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git/**".to_string(),
        ".svn/**".to_string(),
        ".hg/**".to_string(),
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
    ]
}

enum Pattern {
    /// `prefix/**/suffix` 形式
    Globstar { prefix: String, suffix: String },
    Wildcard(Regex),
    Exact(String),
}

impl Pattern {
    fn compile(pattern: &str) -> Self {
        let pattern = pattern.to_lowercase();

        if let Some((prefix, suffix)) = pattern.split_once("**") {
            if !suffix.contains("**") {
                return Pattern::Globstar {
                    prefix: prefix.trim_end_matches('/').to_string(),
                    suffix: suffix.trim_start_matches('/').to_string(),
                };
            }
        }

        if pattern.contains('*') || pattern.contains('?') {
            let escaped = regex::escape(&pattern)
                .replace("\\*", "[^/]*")
                .replace("\\?", "[^/]");
            // 不含 `/` 的模式匹配任意层级的文件名
            let anchored = if pattern.contains('/') {
                format!("^{}$", escaped)
            } else {
                format!("(^|/){}$", escaped)
            };
            if let Ok(re) = Regex::new(&anchored) {
                return Pattern::Wildcard(re);
            }
        }

        Pattern::Exact(pattern)
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Globstar { prefix, suffix } => {
                if prefix.is_empty() && suffix.is_empty() {
                    return true;
                }
                if !prefix.is_empty()
                    && !(path.starts_with(&format!("{}/", prefix))
                        || path.contains(&format!("/{}/", prefix)))
                {
                    return false;
                }
                suffix.is_empty() || path.ends_with(suffix.as_str())
            }
            Pattern::Wildcard(re) => re.is_match(path),
            Pattern::Exact(p) => path == p || path.ends_with(&format!("/{}", p)),
        }
    }
}

/// 由排除规则编译出的过滤器
pub struct ExcludeFilter {
    patterns: Vec<Pattern>,
    max_file_size: u64,
}

impl ExcludeFilter {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            patterns: config
                .exclude_patterns
                .iter()
                .map(|p| Pattern::compile(p))
                .collect(),
            max_file_size: config.max_file_size,
        }
    }

    /// 检查路径是否应该被排除
    pub fn should_exclude(&self, path: &RelativePath, meta: &FileMeta) -> bool {
        if self.max_file_size > 0 && meta.size > self.max_file_size {
            return true;
        }
        let lower = path.as_str().to_lowercase();
        self.patterns.iter().any(|p| p.matches(&lower))
    }

    pub fn into_skip_fn(self) -> SkipFn {
        Arc::new(move |path: &RelativePath, meta: &FileMeta| self.should_exclude(path, meta))
    }
}

/// 本地扫描到的文件
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub path: RelativePath,
    pub abs_path: PathBuf,
    pub size: u64,
}

impl LocalEntry {
    /// 按需计算内容哈希（只在大小相同需要比较时调用）
    pub async fn content_hash(&self) -> Result<String> {
        hash_file_async(&self.abs_path).await
    }
}

/// 本地目录扫描器
pub struct DirectoryScanner {
    root: PathBuf,
    skip: Option<SkipFn>,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            skip: None,
        }
    }

    pub fn with_skip(mut self, skip: Option<SkipFn>) -> Self {
        self.skip = skip;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 递归列出所有普通文件，遇到任何错误立即返回
    pub fn scan(&self) -> Result<Vec<LocalEntry>> {
        debug!("开始扫描本地目录: {:?}", self.root);

        let mut entries = Vec::new();
        let mut skipped = 0usize;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1);

        for entry in walker {
            let entry = entry?;

            // 目录和符号链接都不参与同步
            if !entry.file_type().is_file() {
                continue;
            }

            let path = match RelativePath::from_local(&self.root, entry.path()) {
                Ok(path) => path,
                Err(SyncError::NonUtf8Path(p)) => {
                    warn!("文件名不是 UTF-8，跳过: {:?}", p);
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            // 远程路径把 `\` 当作分隔符，这类名字无法原样往返
            if path.as_str().contains('\\') {
                warn!("文件名含反斜杠，跳过: {:?}", entry.path());
                skipped += 1;
                continue;
            }
            let metadata = entry.metadata()?;
            let meta = FileMeta {
                size: metadata.len(),
                is_dir: false,
            };

            if let Some(skip) = &self.skip {
                if skip(&path, &meta) {
                    debug!("跳过文件: {}", path);
                    skipped += 1;
                    continue;
                }
            }

            entries.push(LocalEntry {
                path,
                abs_path: entry.into_path(),
                size: meta.size,
            });
        }

        info!(
            "本地扫描完成: {:?}, {} 个文件, {} 个被跳过",
            self.root,
            entries.len(),
            skipped
        );

        Ok(entries)
    }

    /// 在阻塞线程池中执行扫描
    pub async fn scan_async(self) -> Result<Vec<LocalEntry>> {
        tokio::task::spawn_blocking(move || self.scan()).await?
    }
}
