//! 错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 同步过程中的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 本地文件系统错误（不重试，直接中止）
    #[error("本地 IO 错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("遍历目录失败: {0}")]
    Walk(#[from] walkdir::Error),

    /// 远程路径不存在
    #[error("远程路径不存在: {0}")]
    NotFound(String),

    #[error("存储后端错误: {0}")]
    Backend(String),

    #[error("存储操作失败: {0}")]
    Opendal(#[from] opendal::Error),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("无效路径: {0}")]
    InvalidPath(String),

    /// 本地文件名不是合法 UTF-8，无法映射到远程路径
    #[error("文件名不是 UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),

    #[error("无效的过滤表达式: {0}")]
    Filter(#[from] regex::Error),

    #[error("项目不存在: {0}")]
    NoSuchProject(String),

    #[error("配置缺失: {0}")]
    Config(String),

    #[error("后台任务失败: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// 外部协作方（启动 shell、备份程序）返回的错误
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl SyncError {
    /// 为 IO 错误附加路径
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound(_) => true,
            SyncError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            SyncError::Opendal(e) => e.kind() == opendal::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(SyncError::NotFound("/proj".into()).is_not_found());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(SyncError::io("/tmp/x", io).is_not_found());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(!SyncError::io("/tmp/x", denied).is_not_found());
        assert!(!SyncError::Backend("boom".into()).is_not_found());
    }
}
