//! 项目仓库依赖的外部协作方

use std::collections::BTreeMap;
use std::path::Path;

/// 在项目目录中启动交互式 shell
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, working_dir: &Path, env: &BTreeMap<String, String>) -> anyhow::Result<()>;
}

/// 外部备份程序
pub trait BackupService: Send + Sync {
    fn backup(&self, folder: &Path, repositories: &[String]) -> anyhow::Result<()>;

    fn restore(&self, folder: &Path, repository: &str) -> anyhow::Result<()>;
}

/// 交互确认，返回 false 表示取消
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}
