//! 内容哈希 - 与远程存储声明的 content_hash 兼容
//!
//! 将数据按 4 MiB 分块，逐块计算 SHA-256，再对所有块摘要的拼接计算一次
//! SHA-256，结果以小写十六进制表示。

use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// 分块大小（字节）
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// 流式内容哈希器，内存占用与文件大小无关
#[derive(Clone, Default)]
pub struct ContentHasher {
    overall: Sha256,
    block: Sha256,
    block_len: usize,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加数据，跨块边界的切片会被拆开
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = BLOCK_SIZE - self.block_len;
            let take = room.min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];

            if self.block_len == BLOCK_SIZE {
                self.flush_block();
            }
        }
    }

    fn flush_block(&mut self) {
        let digest = self.block.finalize_reset();
        self.overall.update(digest);
        self.block_len = 0;
    }

    pub fn finalize(mut self) -> String {
        if self.block_len > 0 {
            self.flush_block();
        }
        format!("{:x}", self.overall.finalize())
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 计算任意读取器的内容哈希
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = ContentHasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// 计算本地文件的内容哈希
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    hash_reader(io::BufReader::with_capacity(1024 * 1024, file)).map_err(|e| SyncError::io(path, e))
}

/// 在阻塞线程池中计算文件哈希
pub async fn hash_file_async(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path)).await?
}
