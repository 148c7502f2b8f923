//! 项目仓库：基础目录下的每个子目录是一个项目，远程命名空间为 `/<项目名>`

pub mod collaborators;

pub use collaborators::{BackupService, Confirm, ProcessLauncher};

use crate::core::engine::{SyncEngine, SyncReport};
use crate::error::{Result, SyncError};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ProjectRepository {
    base: PathBuf,
    confirm: Option<Arc<dyn Confirm>>,
}

impl ProjectRepository {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            confirm: None,
        }
    }

    /// 覆盖、删除前需要确认
    pub fn interactive(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn non_interactive(&self) -> Self {
        Self::new(self.base.clone())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// 项目名只能是单个路径段
    fn check_name(name: &str) -> Result<()> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(SyncError::InvalidPath(name.to_string()));
        }
        Ok(())
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    /// 项目 ID：`"Project##" + name` 的 SHA-256 十六进制
    pub fn id(name: &str) -> String {
        let digest = Sha256::digest(format!("Project##{}", name).as_bytes());
        format!("{:x}", digest)
    }

    pub fn hist_file(name: &str, home: &Path) -> PathBuf {
        home.join(".proj").join("hist").join(Self::id(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_dir()
    }

    fn confirmed(&self, prompt: &str) -> bool {
        match &self.confirm {
            Some(confirm) => confirm.confirm(prompt),
            None => true,
        }
    }

    /// 创建空项目，已存在时（确认后）先清空。取消时返回 false
    pub fn create(&self, name: &str) -> Result<bool> {
        Self::check_name(name)?;
        let folder = self.path(name);
        debug!("创建项目 {} 于 {:?}", name, folder);

        if folder.exists() {
            if !self.confirmed(&format!("{} 已存在，是否覆盖?", name)) {
                return Ok(false);
            }
            debug!("删除 {:?}", folder);
            std::fs::remove_dir_all(&folder).map_err(|e| SyncError::io(&folder, e))?;
        }

        std::fs::create_dir_all(&folder).map_err(|e| SyncError::io(&folder, e))?;
        set_project_permissions(&folder)?;
        Ok(true)
    }

    /// 删除项目目录。取消时返回 false
    pub fn delete(&self, name: &str) -> Result<bool> {
        Self::check_name(name)?;
        let folder = self.path(name);

        if !self.confirmed(&format!("确定要删除 {} 吗?", name)) {
            return Ok(false);
        }

        debug!("删除项目 {} 于 {:?}", name, folder);
        match std::fs::remove_dir_all(&folder) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(SyncError::io(&folder, e)),
        }
    }

    /// 列出名称匹配所有过滤表达式的项目，按名称排序
    pub fn list(&self, filters: &[&str]) -> Result<Vec<String>> {
        let filters = filters
            .iter()
            .map(|f| Regex::new(f))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let entries = std::fs::read_dir(&self.base).map_err(|e| SyncError::io(&self.base, e))?;
        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.base, e))?;
            let file_type = entry.file_type().map_err(|e| SyncError::io(entry.path(), e))?;
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if filters.iter().all(|re| re.is_match(&name)) {
                matches.push(name);
            }
        }

        matches.sort();
        Ok(matches)
    }

    /// 进入项目 shell 时设置的环境变量
    pub fn visit_env(&self, name: &str, home: &Path) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "PROJ_CURRENT_PROJECT_BASE".to_string(),
            self.path(name).display().to_string(),
        );
        env.insert("PROJ_CURRENT_PROJECT_NAME".to_string(), name.to_string());
        env.insert(
            "HISTFILE".to_string(),
            Self::hist_file(name, home).display().to_string(),
        );
        env.insert("fish_history".to_string(), Self::id(name));
        env
    }

    pub fn visit(&self, name: &str, home: &Path, launcher: &dyn ProcessLauncher) -> Result<()> {
        Self::check_name(name)?;
        if !self.exists(name) {
            return Err(SyncError::NoSuchProject(name.to_string()));
        }
        launcher.launch(&self.path(name), &self.visit_env(name, home))?;
        Ok(())
    }

    /// 远程命名空间
    pub fn namespace(name: &str) -> String {
        format!("/{}", name)
    }

    /// 以本地为准同步到远程
    pub async fn push(&self, name: &str, engine: &SyncEngine) -> Result<SyncReport> {
        Self::check_name(name)?;
        if !self.exists(name) {
            return Err(SyncError::NoSuchProject(name.to_string()));
        }
        info!("推送项目: {}", name);
        engine.push(&self.path(name), &Self::namespace(name)).await
    }

    /// 以远程为准同步到本地，本地项目不存在时自动创建
    pub async fn pull(&self, name: &str, engine: &SyncEngine) -> Result<SyncReport> {
        Self::check_name(name)?;
        let folder = self.path(name);
        if !folder.exists() {
            std::fs::create_dir_all(&folder).map_err(|e| SyncError::io(&folder, e))?;
            set_project_permissions(&folder)?;
        }
        info!("拉取项目: {}", name);
        engine.pull(&folder, &Self::namespace(name)).await
    }

    pub fn backup(
        &self,
        name: &str,
        service: &dyn BackupService,
        repositories: &[String],
    ) -> Result<()> {
        Self::check_name(name)?;
        if !self.exists(name) {
            return Err(SyncError::NoSuchProject(name.to_string()));
        }
        service.backup(&self.path(name), repositories)?;
        Ok(())
    }

    /// 从备份恢复，项目已存在时需要确认。取消时返回 false
    pub fn restore(
        &self,
        name: &str,
        service: &dyn BackupService,
        repository: &str,
    ) -> Result<bool> {
        Self::check_name(name)?;
        if self.exists(name)
            && !self.confirmed(&format!("项目 {} 已存在，确定要从备份恢复吗?", name))
        {
            return Ok(false);
        }
        service.restore(&self.path(name), repository)?;
        Ok(true)
    }
}

#[cfg(unix)]
fn set_project_permissions(folder: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(folder, std::fs::Permissions::from_mode(0o775))
        .map_err(|e| SyncError::io(folder, e))
}

#[cfg(not(unix))]
fn set_project_permissions(_folder: &Path) -> Result<()> {
    Ok(())
}
