//! 日志模块 - 提供文件日志和大小管理功能

use crate::config::{load_section, save_section};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "projsync.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "log")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl RotatingFile {
    fn open(path: &Path, max_size: u64) -> io::Result<Self> {
        // 现有文件超过限制时先轮转
        let existing = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            rotate(path)?;
        }
        let written = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            max_size,
            written,
            writer: Some(BufWriter::new(file)),
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > self.max_size {
            if let Some(mut w) = self.writer.take() {
                let _ = w.flush();
            }
            rotate(&self.path)?;
            *self = Self::open(&self.path, self.max_size)?;
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件不可用"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 当前日志改名为 `.old`，覆盖上一份备份
fn rotate(path: &Path) -> io::Result<()> {
    let backup = path.with_extension("log.old");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    if path.exists() {
        fs::rename(path, &backup)?;
    }
    Ok(())
}

/// 带大小限制的日志写入器
#[derive(Clone)]
pub struct SizeRotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let max_size = u64::from(max_size_mb) * 1024 * 1024;
        let file = RotatingFile::open(&log_dir.join(LOG_FILE), max_size)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RotatingFile> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 单次日志事件的写入句柄
pub struct LogWriter {
    inner: SizeRotatingWriter,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.lock().writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.clone(),
        }
    }
}

/// 初始化日志系统，日志文件写在 `log_dir` 下
pub fn init_logging(log_dir: &Path) {
    let config = LogConfig::load(log_dir);

    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let mut env_filter = EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let file_layer = match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(writer) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        ),
        Err(e) => {
            eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
            None
        }
    };

    // debug 模式下同时输出到控制台
    let console_layer = cfg!(debug_assertions).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}
