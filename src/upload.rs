//! multipart 文件上传处理器。

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::HeaderMap;
use axum::response::Json as JsonResponse;
use futures_util::stream::StreamExt;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::atomic::AtomicFile;
use crate::config::{UPLOAD_FIELD_NAME, UPLOAD_PATH_HEADER};
use crate::error::{ApiError, MSG_INVALID_PATH, STATUS_OK};
use crate::storage::Storage;

const MSG_MISSING_TARGET: &str = "缺少存储路径";
const MSG_RECEIVE_FAILED: &str = "接收文件失败";
const MSG_MKDIR_FAILED: &str = "创建目录失败";
const MSG_CREATE_FAILED: &str = "创建文件失败";
const MSG_COPY_FAILED: &str = "文件复制失败";
const MSG_UPLOAD_SUCCESS: &str = "文件上传成功";

#[derive(Debug, Default)]
pub struct UploadOptions {
    /// 先写入同目录临时文件，完成后再重命名到目标位置。
    pub atomic: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub status: u8,
    pub message: String,
    pub file_path: String,
}

/// 将 `file` 字段写入 `X-FormFile-Path` 指定的位置，必要时创建父目录。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(options): Extension<Arc<UploadOptions>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let path = headers
        .get(UPLOAD_PATH_HEADER)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            warn!("upload without target path header");
            ApiError::BadRequest(MSG_MISSING_TARGET.into())
        })?
        .to_string();

    let target = storage.resolve(&path).map_err(|err| {
        warn!(path, error = %err, "upload path rejected");
        ApiError::BadRequest(MSG_INVALID_PATH.into())
    })?;

    let mut multipart = multipart.map_err(|err| {
        warn!(path, error = %err, "upload body is not multipart");
        ApiError::BadRequest(MSG_RECEIVE_FAILED.into())
    })?;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(path, error = %err, "failed to read multipart field");
        ApiError::BadRequest(MSG_RECEIVE_FAILED.into())
    })? {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            debug!(path, name = ?field.name(), "skipping multipart field");
            continue;
        }
        return store_field(&storage, &options, path, target, field).await;
    }

    warn!(path, "upload without file field");
    Err(ApiError::BadRequest(MSG_RECEIVE_FAILED.into()))
}

async fn store_field(
    storage: &Storage,
    options: &UploadOptions,
    path: String,
    target: PathBuf,
    mut field: Field<'_>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    if storage.is_root(&target) {
        error!(path, "upload target is the storage root");
        return Err(ApiError::Internal(MSG_CREATE_FAILED.into()));
    }

    if let Some(parent) = target.parent() {
        match fs::metadata(parent).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                error!(path, "parent path exists but is not a directory");
                return Err(ApiError::Internal(MSG_MKDIR_FAILED.into()));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(parent).await.map_err(|err| {
                    error!(path, error = %err, "failed to create parent directory");
                    ApiError::Internal(MSG_MKDIR_FAILED.into())
                })?;
            }
            Err(err) => {
                error!(path, error = %err, "failed to stat parent directory");
                return Err(ApiError::Internal(MSG_MKDIR_FAILED.into()));
            }
        }
    }

    let written = if options.atomic {
        let mut atomic = AtomicFile::new(&target).await.map_err(|err| {
            error!(path, error = %err, "failed to create temp file");
            ApiError::Internal(MSG_CREATE_FAILED.into())
        })?;
        let written = match copy_field(&mut field, atomic.file_mut()).await {
            Ok(written) => written,
            Err(err) => {
                atomic.cleanup().await;
                error!(path, error = %err, "upload copy failed");
                return Err(ApiError::Internal(MSG_COPY_FAILED.into()));
            }
        };
        atomic.finalize().await.map_err(|err| {
            error!(path, error = %err, "failed to move upload into place");
            ApiError::Internal(MSG_COPY_FAILED.into())
        })?;
        written
    } else {
        let mut file = File::create(&target).await.map_err(|err| {
            error!(path, error = %err, "failed to create file");
            ApiError::Internal(MSG_CREATE_FAILED.into())
        })?;
        copy_field(&mut field, &mut file).await.map_err(|err| {
            error!(path, error = %err, "upload copy failed");
            ApiError::Internal(MSG_COPY_FAILED.into())
        })?
    };

    info!(path, size = written, atomic = options.atomic, "upload complete");
    Ok(JsonResponse(UploadResponse {
        status: STATUS_OK,
        message: MSG_UPLOAD_SUCCESS.to_string(),
        file_path: path,
    }))
}

/// 将 multipart 字段的全部数据写入 `writer`，返回写入的字节数。
async fn copy_field<W>(field: &mut Field<'_>, writer: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut total: u64 = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|err| io::Error::other(err.to_string()))?;
        if !chunk.is_empty() {
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
    }
    writer.flush().await?;
    Ok(total)
}
