//! 目录列表与删除处理器。

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{
    ApiError, Envelope, MSG_INVALID_PATH, MSG_MISSING_PARAMS, STATUS_FAILED, STATUS_OK,
};
use crate::storage::{DirectoryEntry, Storage, StorageError};

const MSG_LIST_SUCCESS: &str = "success";
const MSG_DIR_MISSING: &str = "该目录不存在";
const MSG_LIST_FAILED: &str = "无法列出目录内容";
const MSG_MISSING_PATH: &str = "缺少路径参数";
const MSG_ENTRY_MISSING: &str = "文件或目录不存在";
const MSG_STAT_FAILED: &str = "无法获取文件或目录信息";
const MSG_DELETE_FAILED: &str = "删除失败";
const MSG_DELETE_SUCCESS: &str = "删除成功";

#[derive(Deserialize)]
pub(crate) struct ListRequest {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct DeleteRequest {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ListResponse {
    pub status: u8,
    pub message: String,
    pub content: Vec<DirectoryEntry>,
}

impl ListResponse {
    fn failure(code: StatusCode, message: &str) -> Response {
        (
            code,
            JsonResponse(ListResponse {
                status: STATUS_FAILED,
                message: message.to_string(),
                content: Vec::new(),
            }),
        )
            .into_response()
    }
}

/// 列出目录的直接子项；目录不存在时按空结果返回 200。
pub async fn list_files(Extension(storage): Extension<Arc<Storage>>, body: Bytes) -> Response {
    let path = match serde_json::from_slice::<ListRequest>(&body) {
        Ok(request) => request.path.unwrap_or_default(),
        Err(err) => {
            warn!(error = %err, "list request body rejected");
            return ListResponse::failure(StatusCode::BAD_REQUEST, MSG_MISSING_PARAMS);
        }
    };

    let target = match storage.resolve(&path) {
        Ok(target) => target,
        Err(err) => {
            warn!(path, error = %err, "list path rejected");
            return ListResponse::failure(StatusCode::BAD_REQUEST, MSG_INVALID_PATH);
        }
    };

    if let Err(err) = storage.stat(&target).await {
        if err.is_not_found() {
            info!(path, "list target does not exist");
            return (
                StatusCode::OK,
                JsonResponse(ListResponse {
                    status: STATUS_FAILED,
                    message: MSG_DIR_MISSING.to_string(),
                    content: Vec::new(),
                }),
            )
                .into_response();
        }
        error!(path, error = %err, "list stat failed");
        return ListResponse::failure(StatusCode::INTERNAL_SERVER_ERROR, MSG_LIST_FAILED);
    }

    match storage.list_dir(&target).await {
        Ok(entries) => {
            info!(path, count = entries.len(), "list files");
            JsonResponse(ListResponse {
                status: STATUS_OK,
                message: MSG_LIST_SUCCESS.to_string(),
                content: entries,
            })
            .into_response()
        }
        Err(err) => {
            error!(path, error = %err, "list directory failed");
            ListResponse::failure(StatusCode::INTERNAL_SERVER_ERROR, MSG_LIST_FAILED)
        }
    }
}

/// 递归删除文件或目录；目标不存在时返回 200 与 status 0。
pub async fn delete_entry(
    Extension(storage): Extension<Arc<Storage>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = serde_json::from_slice::<DeleteRequest>(&body)
        .map_err(|err| {
            warn!(error = %err, "delete request body rejected");
            ApiError::BadRequest(MSG_MISSING_PARAMS.into())
        })?
        .path
        .unwrap_or_default();

    if path.is_empty() {
        warn!("delete request without path");
        return Err(ApiError::BadRequest(MSG_MISSING_PATH.into()));
    }

    let target = storage.resolve(&path).map_err(|err| {
        warn!(path, error = %err, "delete path rejected");
        ApiError::BadRequest(MSG_INVALID_PATH.into())
    })?;
    if storage.is_root(&target) {
        warn!(path, "refusing to delete storage root");
        return Err(ApiError::BadRequest(MSG_MISSING_PATH.into()));
    }

    if let Err(err) = storage.stat(&target).await {
        if err.is_not_found() {
            info!(path, "delete target does not exist");
            return Ok(JsonResponse(Envelope::failure(MSG_ENTRY_MISSING)).into_response());
        }
        error!(path, error = %err, "delete stat failed");
        return Err(ApiError::Internal(MSG_STAT_FAILED.into()));
    }

    storage
        .remove_all(&target)
        .await
        .map_err(|err: StorageError| {
            error!(path, error = %err, "delete failed");
            ApiError::Internal(MSG_DELETE_FAILED.into())
        })?;

    info!(path, "delete entry");
    Ok(JsonResponse(Envelope::success(MSG_DELETE_SUCCESS)).into_response())
}
