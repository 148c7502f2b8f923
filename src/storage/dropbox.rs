//! Dropbox 存储 - 基于 HTTP API v2

use super::{AtomicFile, FileInfo, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::core::path::RelativePath;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";

/// 超过此大小的文件使用上传会话分块上传
pub const UPLOAD_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Serialize)]
struct ListFolderArg<'a> {
    path: &'a str,
    recursive: bool,
    include_deleted: bool,
    include_media_info: bool,
}

#[derive(Serialize)]
struct ListFolderContinueArg<'a> {
    cursor: &'a str,
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
enum Metadata {
    File {
        path_display: String,
        size: u64,
        content_hash: Option<String>,
    },
    Folder {
        path_display: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Serialize)]
struct PathArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct CommitInfo<'a> {
    path: &'a str,
    mode: &'static str,
    autorename: bool,
    client_modified: String,
    mute: bool,
}

#[derive(Serialize)]
struct UploadSessionStartArg {
    close: bool,
}

#[derive(Deserialize)]
struct UploadSessionStartResult {
    session_id: String,
}

#[derive(Serialize)]
struct UploadSessionCursor<'a> {
    session_id: &'a str,
    offset: u64,
}

#[derive(Serialize)]
struct UploadSessionAppendArg<'a> {
    cursor: UploadSessionCursor<'a>,
    close: bool,
}

#[derive(Serialize)]
struct UploadSessionFinishArg<'a> {
    cursor: UploadSessionCursor<'a>,
    commit: CommitInfo<'a>,
}

#[derive(Deserialize)]
struct ApiError {
    error_summary: String,
}

pub struct DropboxStorage {
    client: Client,
    token: String,
    api_url: String,
    content_url: String,
    chunk_size: u64,
}

impl DropboxStorage {
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            token: token.to_string(),
            api_url: API_URL.to_string(),
            content_url: CONTENT_URL.to_string(),
            chunk_size: UPLOAD_CHUNK_SIZE,
        })
    }

    /// 替换 API 地址（用于代理或测试服务器）
    pub fn with_endpoints(mut self, api_url: &str, content_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self.content_url = content_url.trim_end_matches('/').to_string();
        self
    }

    /// 分块上传的块大小，超过它的文件走上传会话
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn rpc<A: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: &A,
        path: &str,
    ) -> Result<R> {
        let resp = self
            .client
            .post(format!("{}/{}", self.api_url, endpoint))
            .bearer_auth(&self.token)
            .json(arg)
            .send()
            .await?;
        let resp = check_status(resp, path).await?;
        Ok(resp.json().await?)
    }

    fn content_request<A: Serialize>(&self, endpoint: &str, arg: &A) -> Result<RequestBuilder> {
        Ok(self
            .client
            .post(format!("{}/{}", self.content_url, endpoint))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", header_json(arg)?))
    }

    async fn upload_chunk<A: Serialize>(
        &self,
        endpoint: &str,
        arg: &A,
        body: impl Into<reqwest::Body>,
        path: &str,
    ) -> Result<Response> {
        let resp = self
            .content_request(endpoint, arg)?
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        check_status(resp, path).await
    }

    fn commit_info(remote: &str) -> CommitInfo<'_> {
        CommitInfo {
            path: remote,
            mode: "overwrite",
            autorename: false,
            client_modified: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            mute: true,
        }
    }

    async fn upload_session(
        &self,
        file: &mut tokio::fs::File,
        local: &Path,
        remote: &str,
        size: u64,
    ) -> Result<()> {
        let first = read_chunk(file, local, self.chunk_size).await?;
        expect_len(&first, self.chunk_size, local)?;
        let mut written = first.len() as u64;
        let resp = self
            .upload_chunk(
                "files/upload_session/start",
                &UploadSessionStartArg { close: false },
                first,
                remote,
            )
            .await?;
        let session: UploadSessionStartResult = resp.json().await?;
        debug!("上传会话开始: {} ({} 字节)", remote, size);

        while size - written > self.chunk_size {
            let chunk = read_chunk(file, local, self.chunk_size).await?;
            expect_len(&chunk, self.chunk_size, local)?;
            let len = chunk.len() as u64;
            let arg = UploadSessionAppendArg {
                cursor: UploadSessionCursor {
                    session_id: &session.session_id,
                    offset: written,
                },
                close: false,
            };
            self.upload_chunk("files/upload_session/append_v2", &arg, chunk, remote)
                .await?;
            written += len;
        }

        let last = read_chunk(file, local, self.chunk_size).await?;
        expect_len(&last, size - written, local)?;
        let arg = UploadSessionFinishArg {
            cursor: UploadSessionCursor {
                session_id: &session.session_id,
                offset: written,
            },
            commit: Self::commit_info(remote),
        };
        self.upload_chunk("files/upload_session/finish", &arg, last, remote)
            .await?;
        Ok(())
    }
}

async fn read_chunk(file: &mut tokio::fs::File, local: &Path, limit: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit as usize);
    (&mut *file)
        .take(limit)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| SyncError::io(local, e))?;
    Ok(buf)
}

/// 读到的块长度与开始上传时的文件大小不符，说明文件在上传过程中被修改
fn expect_len(chunk: &[u8], expected: u64, local: &Path) -> Result<()> {
    if chunk.len() as u64 == expected {
        return Ok(());
    }
    Err(SyncError::io(
        local,
        std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("上传过程中文件被修改: 预期 {} 字节, 读到 {}", expected, chunk.len()),
        ),
    ))
}

/// 非 2xx 响应转为错误，409 的 not_found 摘要视为 NotFound
async fn check_status(resp: Response, path: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
            if is_not_found(&err.error_summary) {
                return Err(SyncError::NotFound(path.to_string()));
            }
            return Err(SyncError::Backend(format!("{}: {}", path, err.error_summary)));
        }
    }

    Err(SyncError::Backend(format!(
        "Dropbox 请求失败 ({}) {}: {}",
        status, path, body
    )))
}

fn is_not_found(summary: &str) -> bool {
    summary.starts_with("path/not_found") || summary.starts_with("path_lookup/not_found")
}

/// Dropbox 的根目录用空字符串表示
fn api_path(remote: &str) -> String {
    let trimmed = remote.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// HTTP 头里的 JSON 只能是 ASCII，非 ASCII 字符转义为 `\uXXXX`
fn header_json<T: Serialize>(arg: &T) -> Result<String> {
    let raw = serde_json::to_string(arg)?;
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04x}", unit);
            }
        }
    }
    Ok(out)
}

fn to_file_info(namespace: &str, entry: Metadata) -> Result<Option<FileInfo>> {
    let (path_display, size, is_dir, content_hash) = match entry {
        Metadata::File {
            path_display,
            size,
            content_hash,
        } => (path_display, size, false, content_hash),
        Metadata::Folder { path_display } => (path_display, 0, true, None),
        Metadata::Other => return Ok(None),
    };

    // 命名空间自身的目录条目
    if is_dir && api_path(&path_display).eq_ignore_ascii_case(&api_path(namespace)) {
        return Ok(None);
    }

    let rel = RelativePath::from_remote(namespace, &path_display)?;
    Ok(Some(FileInfo {
        path: rel.to_string(),
        size,
        is_dir,
        content_hash,
    }))
}

#[async_trait]
impl Storage for DropboxStorage {
    async fn list_recursive(&self, namespace: &str) -> Result<Vec<FileInfo>> {
        let path = api_path(namespace);
        let mut page: ListFolderResult = self
            .rpc(
                "files/list_folder",
                &ListFolderArg {
                    path: &path,
                    recursive: true,
                    include_deleted: false,
                    include_media_info: false,
                },
                namespace,
            )
            .await?;

        let mut files = Vec::new();
        loop {
            for entry in page.entries {
                if let Some(info) = to_file_info(namespace, entry)? {
                    files.push(info);
                }
            }
            if !page.has_more {
                break;
            }
            page = self
                .rpc(
                    "files/list_folder/continue",
                    &ListFolderContinueArg {
                        cursor: &page.cursor,
                    },
                    namespace,
                )
                .await?;
        }

        debug!("Dropbox 列出 {} 个条目: {}", files.len(), namespace);
        Ok(files)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let remote = api_path(remote);
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| SyncError::io(local, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| SyncError::io(local, e))?
            .len();

        if size > self.chunk_size {
            self.upload_session(&mut file, local, &remote, size).await?;
        } else {
            let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
            self.upload_chunk("files/upload", &Self::commit_info(&remote), body, &remote)
                .await?;
        }

        Ok(size)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let remote = api_path(remote);
        let resp = self
            .content_request("files/download", &PathArg { path: &remote })?
            .send()
            .await?;
        let resp = check_status(resp, &remote).await?;

        let mut out = AtomicFile::create(local).await?;
        let mut total = 0u64;
        let mut stream = Box::pin(resp.bytes_stream());
        while let Some(chunk) = stream.try_next().await? {
            out.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        out.commit().await?;

        Ok(total)
    }

    async fn delete(&self, remote: &str) -> Result<()> {
        let path = api_path(remote);
        match self
            .rpc::<_, serde_json::Value>("files/delete_v2", &PathArg { path: &path }, remote)
            .await
        {
            Ok(_) => Ok(()),
            Err(SyncError::NotFound(_)) => {
                warn!("远程文件已不存在: {}", remote);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "dropbox"
    }

    fn case_insensitive(&self) -> bool {
        true
    }
}
