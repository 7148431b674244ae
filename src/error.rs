//! 统一的 JSON 响应信封与 API 错误类型。

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub const STATUS_OK: u8 = 1;
pub const STATUS_FAILED: u8 = 0;

pub const MSG_INVALID_TOKEN: &str = "Invalid token";
pub const MSG_INVALID_PATH: &str = "非法路径";
pub const MSG_MISSING_PARAMS: &str = "缺少必要参数";
pub const MSG_NOT_FOUND: &str = "资源文件不存在";
pub const MSG_SERVER_ERROR: &str = "服务器错误，请稍后重试";

/// `{status, message}` 响应体。
#[derive(Serialize, Debug)]
pub struct Envelope {
    pub status: u8,
    pub message: String,
}

impl Envelope {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAILED,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Internal(String),
    PreconditionFailed,
    RangeNotSatisfiable(u64),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Internal(msg) => msg,
            ApiError::Unauthorized => MSG_INVALID_TOKEN,
            ApiError::PreconditionFailed => "precondition failed",
            ApiError::RangeNotSatisfiable(_) => "range not satisfiable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let ApiError::RangeNotSatisfiable(size) = self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            headers.insert(header::CONTENT_RANGE, value);
        }
        (
            self.status_code(),
            headers,
            Json(Envelope::failure(self.message())),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn error_renders_failure_envelope() {
        let response = ApiError::NotFound(MSG_NOT_FOUND.into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response.into_body().collect().await.expect("body").to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["status"], 0);
        assert_eq!(value["message"], MSG_NOT_FOUND);
    }

    #[test]
    fn range_error_carries_content_range() {
        let response = ApiError::RangeNotSatisfiable(42).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */42"
        );
    }
}
