use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod project;
pub mod storage;

pub use crate::core::{
    DiffEngine, DiffResult, DirectoryScanner, RelativePath, RemoteInventory, SyncDirection,
    SyncEngine, SyncReport,
};
pub use error::{Result, SyncError};
pub use project::ProjectRepository;
pub use storage::{create_storage, Storage, StorageConfig};

use crate::config::{BackupConfig, RepositoryConfig, SyncSettings};

/// 应用上下文：从配置目录加载配置并组装存储、同步引擎和项目仓库
pub struct AppContext {
    pub config_dir: PathBuf,
    pub settings: SyncSettings,
    pub repositories: RepositoryConfig,
    pub backup: BackupConfig,
}

impl AppContext {
    /// 默认配置目录
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("projsync"))
            .unwrap_or_else(|| PathBuf::from(".projsync"))
    }

    pub fn load(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).map_err(|e| SyncError::io(config_dir, e))?;
        tracing::debug!("加载配置: {:?}", config_dir);

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            settings: SyncSettings::load(config_dir),
            repositories: RepositoryConfig::load(config_dir),
            backup: BackupConfig::load(config_dir),
        })
    }

    /// 保存所有配置
    pub fn save(&self) -> Result<()> {
        let dir = &self.config_dir;
        self.settings.save(dir).map_err(|e| SyncError::io(dir, e))?;
        self.repositories.save(dir).map_err(|e| SyncError::io(dir, e))?;
        self.backup.save(dir).map_err(|e| SyncError::io(dir, e))?;
        Ok(())
    }

    pub fn storage(&self) -> Result<Arc<dyn Storage>> {
        let config = self
            .settings
            .storage
            .as_ref()
            .ok_or_else(|| SyncError::Config("未配置远程存储".to_string()))?;
        create_storage(config)
    }

    /// 按配置的排除规则创建同步引擎
    pub fn engine(&self) -> Result<SyncEngine> {
        Ok(SyncEngine::with_config(
            self.storage()?,
            &self.settings.scan_config(),
        ))
    }

    /// 按名称打开项目仓库，未指定时使用默认仓库
    pub fn repository(&self, name: Option<&str>) -> Result<ProjectRepository> {
        let base = self.repositories.resolve(name).ok_or_else(|| {
            SyncError::Config(format!("项目仓库 {}", name.unwrap_or("(默认)")))
        })?;
        Ok(ProjectRepository::new(base))
    }

    pub async fn push(&self, project: &str, repository: Option<&str>) -> Result<SyncReport> {
        let engine = self.engine()?;
        self.repository(repository)?.push(project, &engine).await
    }

    pub async fn pull(&self, project: &str, repository: Option<&str>) -> Result<SyncReport> {
        let engine = self.engine()?;
        self.repository(repository)?.pull(project, &engine).await
    }
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("USERPROFILE").ok().map(PathBuf::from)
        } else {
            std::env::var("HOME").ok().map(PathBuf::from)
        }
    }

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home_dir().map(|h| h.join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".config")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_requires_storage() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::load(dir.path()).unwrap();
        assert!(matches!(ctx.storage(), Err(SyncError::Config(_))));
        assert!(matches!(ctx.repository(None), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_context_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();

        let mut ctx = AppContext::load(dir.path()).unwrap();
        ctx.settings.storage = Some(StorageConfig::Fs {
            root: remote.path().display().to_string(),
        });
        ctx.repositories.add("main", "/home/u/projects");
        ctx.save().unwrap();

        let ctx = AppContext::load(dir.path()).unwrap();
        assert!(ctx.storage().is_ok());
        assert_eq!(
            ctx.repository(None).unwrap().base(),
            Path::new("/home/u/projects")
        );
    }
}
