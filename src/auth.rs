//! 静态 token 校验中间件。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{Request, header};
use axum::{middleware, response::Response};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;

/// 启动时加载的访问 token，进程内只读。
#[derive(Debug)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// 常量时间比较，长度不同直接拒绝。
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// 认证中间件：`Authorization` 头必须与 token 完全一致。
pub async fn require_token(
    Extension(token): Extension<Arc<AccessToken>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
        .unwrap_or_default();

    if token.matches(provided) {
        return Ok(next.run(req).await);
    }

    warn!(
        method = %req.method(),
        path = req.uri().path(),
        has_header = req.headers().contains_key(header::AUTHORIZATION),
        "rejected request with invalid token"
    );
    Err(ApiError::Unauthorized)
}
