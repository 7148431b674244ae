//! ETag 计算与下载的条件请求判断。

use axum::http::{HeaderMap, header};
use httpdate::parse_http_date;
use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ApiError;

/// 条件请求的判断结果。
#[derive(Debug, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    NotModified,
}

/// 根据文件元数据生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// 依次校验 If-Match / If-Unmodified-Since 与 If-None-Match / If-Modified-Since。
pub fn evaluate_preconditions(
    headers: &HeaderMap,
    etag: &str,
    modified: Option<SystemTime>,
) -> Result<Precondition, ApiError> {
    if let Some(value) = header_str(headers, header::IF_MATCH) {
        if value.trim() != "*" && !strong_etag_matches(value, etag) {
            return Err(ApiError::PreconditionFailed);
        }
    } else if let Some(since) = header_date_secs(headers, header::IF_UNMODIFIED_SINCE)
        && let Some(modified) = modified.and_then(unix_secs)
        && modified > since
    {
        return Err(ApiError::PreconditionFailed);
    }

    if let Some(value) = header_str(headers, header::IF_NONE_MATCH) {
        if value.trim() == "*" || etag_matches(value, etag) {
            return Ok(Precondition::NotModified);
        }
    } else if let Some(since) = header_date_secs(headers, header::IF_MODIFIED_SINCE)
        && let Some(modified) = modified.and_then(unix_secs)
        && modified <= since
    {
        return Ok(Precondition::NotModified);
    }

    Ok(Precondition::Proceed)
}

/// `If-Range` 缺失或与当前版本一致时才处理 Range。
pub fn if_range_matches(headers: &HeaderMap, etag: &str, modified: Option<SystemTime>) -> bool {
    let Some(value) = header_str(headers, header::IF_RANGE) else {
        return true;
    };
    let value = value.trim();
    if value.starts_with('"') {
        return !etag.starts_with("W/") && value == etag;
    }
    if value.starts_with("W/") {
        return false;
    }
    match (parse_http_date(value).ok().and_then(unix_secs), modified.and_then(unix_secs)) {
        (Some(date), Some(modified)) => date == modified,
        _ => false,
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_date_secs(headers: &HeaderMap, name: header::HeaderName) -> Option<u64> {
    header_str(headers, name)
        .and_then(|value| parse_http_date(value).ok())
        .and_then(unix_secs)
}

fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// If-Match 使用强比较，弱 ETag 永不匹配。
fn strong_etag_matches(header_value: &str, current: &str) -> bool {
    !current.starts_with("W/") && etag_matches(header_value, current)
}

fn etag_matches(header_value: &str, current: &str) -> bool {
    header_value
        .split(',')
        .map(|item| item.trim())
        .any(|item| item == current)
}
