//! 应用配置模块
//!
//! 所有配置保存在配置目录下的 `config.json` 中，每个模块占用一个顶层字段，
//! 读写时互不覆盖。

use crate::core::scanner::{default_exclude_patterns, ScanConfig};
use crate::storage::StorageConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// 读取配置中的一个字段，文件或字段缺失、格式错误时返回默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, key: &str) -> T {
    let config_file = config_dir.join(CONFIG_FILE);
    fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get(key).cloned())
        .and_then(|section| serde_json::from_value::<T>(section).ok())
        .unwrap_or_default()
}

/// 写入配置中的一个字段，保留其它字段
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value).map_err(invalid_data)?;

    let content = serde_json::to_string_pretty(&config).map_err(invalid_data)?;
    fs::write(&config_file, content)
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// 同步配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 远程存储，未配置时无法同步
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    /// 排除规则（两侧都生效）
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// 最大文件大小（0 表示不限制）
    #[serde(default)]
    pub max_file_size: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            storage: None,
            exclude_patterns: default_exclude_patterns(),
            max_file_size: 0,
        }
    }
}

impl SyncSettings {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "sync")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "sync", self)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            exclude_patterns: self.exclude_patterns.clone(),
            max_file_size: self.max_file_size,
        }
    }
}

/// 项目仓库配置：名称 -> 本地基础目录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default)]
    pub repositories: BTreeMap<String, PathBuf>,
    /// 未指定仓库时使用的默认仓库
    #[serde(default)]
    pub primary: Option<String>,
}

impl RepositoryConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "repositories")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "repositories", self)
    }

    /// 添加仓库，第一个仓库自动成为默认仓库
    pub fn add(&mut self, name: &str, base: impl Into<PathBuf>) {
        self.repositories.insert(name.to_string(), base.into());
        if self.primary.is_none() {
            self.primary = Some(name.to_string());
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PathBuf> {
        let removed = self.repositories.remove(name);
        if self.primary.as_deref() == Some(name) {
            self.primary = self.repositories.keys().next().cloned();
        }
        removed
    }

    pub fn set_primary(&mut self, name: &str) -> bool {
        if self.repositories.contains_key(name) {
            self.primary = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// 按名称查找仓库目录，未指定名称时使用默认仓库
    pub fn resolve(&self, name: Option<&str>) -> Option<&Path> {
        let name = name.or(self.primary.as_deref())?;
        self.repositories.get(name).map(PathBuf::as_path)
    }
}

/// 备份配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// 备份仓库地址
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl BackupConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "backup")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "backup", self)
    }
}
