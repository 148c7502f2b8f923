//! 相对路径 - 本地与远程两侧的统一连接键

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// 相对于同步根的路径，只使用 `/` 分隔，不含首尾分隔符和 `.`/`..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelativePath(String);

impl RelativePath {
    /// 解析 `/` 分隔的相对路径字符串，`\` 是文件名的一部分
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(SyncError::InvalidPath(raw.to_string())),
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(SyncError::InvalidPath(raw.to_string()));
        }
        Ok(Self(segments.join("/")))
    }

    /// 由本地根目录和其下的文件路径构造
    ///
    /// 每个 `Normal` 组件原样成为一段，Unix 上文件名里的 `\` 不会被拆开。
    /// 文件名不是 UTF-8 时返回 [`SyncError::NonUtf8Path`]。
    pub fn from_local(root: &Path, path: &Path) -> Result<Self> {
        let rel = path
            .strip_prefix(root)
            .map_err(|_| SyncError::InvalidPath(path.display().to_string()))?;

        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => segments.push(
                    s.to_str()
                        .ok_or_else(|| SyncError::NonUtf8Path(path.to_path_buf()))?,
                ),
                Component::CurDir => continue,
                _ => return Err(SyncError::InvalidPath(path.display().to_string())),
            }
        }
        if segments.is_empty() {
            return Err(SyncError::InvalidPath(path.display().to_string()));
        }
        Ok(Self(segments.join("/")))
    }

    /// 由远程命名空间和完整远程路径构造，命名空间前缀不区分大小写
    pub fn from_remote(namespace: &str, full: &str) -> Result<Self> {
        let prefix = namespace.trim_matches('/');
        let full_trimmed = full.trim_start_matches('/');

        if prefix.is_empty() {
            return Self::parse(full_trimmed);
        }

        let head = full_trimmed.get(..prefix.len());
        let rest = full_trimmed.get(prefix.len()..);
        match (head, rest) {
            (Some(head), Some(rest))
                if head.eq_ignore_ascii_case(prefix) && (rest.is_empty() || rest.starts_with('/')) =>
            {
                Self::parse(rest)
            }
            _ => Err(SyncError::InvalidPath(full.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_local(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }

    /// 拼接远程完整路径，如 `/proj` + `a/b.txt` -> `/proj/a/b.txt`
    pub fn to_remote(&self, namespace: &str) -> String {
        let ns = namespace.trim_matches('/');
        if ns.is_empty() {
            format!("/{}", self.0)
        } else {
            format!("/{}/{}", ns, self.0)
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(RelativePath::parse("a/b.txt").unwrap().as_str(), "a/b.txt");
        assert_eq!(RelativePath::parse("/a//b.txt/").unwrap().as_str(), "a/b.txt");
        assert_eq!(RelativePath::parse("a\\b.txt").unwrap().as_str(), "a\\b.txt");
        assert_eq!(RelativePath::parse("./a/./b").unwrap().as_str(), "a/b");
        assert!(RelativePath::parse("a/../b").is_err());
        assert!(RelativePath::parse("/").is_err());
    }

    #[test]
    fn test_local_and_remote_agree() {
        let root = Path::new("/home/u/proj");
        let local = RelativePath::from_local(root, &root.join("src").join("main.rs")).unwrap();
        let remote = RelativePath::from_remote("/proj", "/proj/src/main.rs").unwrap();
        assert_eq!(local, remote);
        assert_eq!(local.to_local(root), root.join("src").join("main.rs"));
        assert_eq!(local.to_remote("/proj"), "/proj/src/main.rs");
    }

    #[test]
    fn test_remote_prefix_case_insensitive() {
        let p = RelativePath::from_remote("/Proj", "/proj/a.txt").unwrap();
        assert_eq!(p.as_str(), "a.txt");
        assert!(RelativePath::from_remote("/proj", "/project/a.txt").is_err());
        assert!(RelativePath::from_remote("/proj", "/other/a.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_backslash_stays_in_segment() {
        let root = Path::new("/home/u/proj");
        let file = root.join("dir").join("a\\b.txt");
        let key = RelativePath::from_local(root, &file).unwrap();
        assert_eq!(key.as_str(), "dir/a\\b.txt");
        assert_eq!(key.to_local(root), file);
        assert_eq!(key.to_remote("/proj"), "/proj/dir/a\\b.txt");
        assert_eq!(RelativePath::from_remote("/proj", "/proj/dir/a\\b.txt").unwrap(), key);
    }

    #[cfg(unix)]
    #[test]
    fn test_local_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = Path::new("/home/u/proj");
        let file = root.join(OsStr::from_bytes(b"bad\xff.txt"));
        let err = RelativePath::from_local(root, &file).unwrap_err();
        assert!(matches!(err, SyncError::NonUtf8Path(p) if p == file));
    }

    #[test]
    fn test_root_namespace() {
        let p = RelativePath::from_remote("/", "/a/b").unwrap();
        assert_eq!(p.as_str(), "a/b");
        assert_eq!(p.to_remote(""), "/a/b");
    }
}
