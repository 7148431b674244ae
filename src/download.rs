//! 文件下载，支持 Range 与条件请求。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::conditional::{
    Precondition, etag_from_metadata, evaluate_preconditions, if_range_matches,
};
use crate::error::{ApiError, MSG_INVALID_PATH, MSG_NOT_FOUND, MSG_SERVER_ERROR};
use crate::storage::Storage;

/// `GET /get/{*path}`
pub async fn download_file(
    Path(path): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    serve_file(&storage, &path, &request_headers).await
}

/// `GET /get/`，指向存储根目录，目录不可下载。
pub async fn download_root(
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    serve_file(&storage, "", &request_headers).await
}

async fn serve_file(
    storage: &Storage,
    path: &str,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let target = storage.resolve(path).map_err(|err| {
        warn!(path, error = %err, "download path rejected");
        ApiError::BadRequest(MSG_INVALID_PATH.into())
    })?;

    let metadata = match storage.stat(&target).await {
        Ok(metadata) => metadata,
        Err(err) if err.is_not_found() => {
            warn!(path, "download target does not exist");
            return Err(ApiError::NotFound(MSG_NOT_FOUND.into()));
        }
        Err(err) => {
            error!(path, error = %err, "download stat failed");
            return Err(ApiError::Internal(MSG_SERVER_ERROR.into()));
        }
    };
    if metadata.is_dir() {
        warn!(path, "download target is a directory");
        return Err(ApiError::NotFound(MSG_NOT_FOUND.into()));
    }

    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let etag = etag_from_metadata(&metadata);
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_bytes(format!("attachment; filename={file_name}").as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    if let Some(modified) = modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }
    response_headers.insert(header::ETAG, header_value(&etag)?);

    if evaluate_preconditions(request_headers, &etag, modified)? == Precondition::NotModified {
        debug!(path, "download not modified");
        response_headers.remove(header::CONTENT_TYPE);
        response_headers.remove(header::CONTENT_DISPOSITION);
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let range = if if_range_matches(request_headers, &etag, modified) {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let mut file = File::open(&target).await.map_err(|err| {
        error!(path, error = %err, "failed to open file for download");
        ApiError::Internal(MSG_SERVER_ERROR.into())
    })?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(path, start, end, length, "download range request accepted");
        file.seek(SeekFrom::Start(start)).await.map_err(|err| {
            error!(path, error = %err, "failed to seek file for download");
            ApiError::Internal(MSG_SERVER_ERROR.into())
        })?;
        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{file_size}"))?,
        );
        response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
        let stream = ReaderStream::new(file.take(length));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);
    info!(path, size = file_size, "download full file");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal(MSG_SERVER_ERROR.into()))
}

/// 解析单段 `Range: bytes=` 头；多段请求忽略，按整文件返回。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let unsatisfiable = || ApiError::RangeNotSatisfiable(file_size);
    let value = value.to_str().map_err(|_| unsatisfiable())?;
    let Some(range) = value.trim().strip_prefix("bytes=") else {
        return Err(unsatisfiable());
    };
    if range.contains(',') {
        return Ok(None);
    }
    if file_size == 0 {
        return Err(unsatisfiable());
    }

    let (start_part, end_part) = range.split_once('-').ok_or_else(unsatisfiable)?;
    let (start_part, end_part) = (start_part.trim(), end_part.trim());
    let last = file_size - 1;

    let (start, end) = if start_part.is_empty() {
        let suffix: u64 = end_part.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        (file_size.saturating_sub(suffix), last)
    } else {
        let start: u64 = start_part.parse().map_err(|_| unsatisfiable())?;
        let end: u64 = if end_part.is_empty() {
            last
        } else {
            end_part.parse().map_err(|_| unsatisfiable())?
        };
        (start, end.min(last))
    };

    if start > end || start >= file_size {
        return Err(unsatisfiable());
    }

    Ok(Some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tempfile::tempdir;

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("data");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Arc::new(Storage::new(root)))
    }

    fn range(value: &'static str, size: u64) -> Result<Option<(u64, u64)>, ApiError> {
        parse_range(Some(&HeaderValue::from_static(value)), size)
    }

    #[test]
    fn parses_single_ranges() {
        assert!(matches!(range("bytes=0-4", 10), Ok(Some((0, 4)))));
        assert!(matches!(range("bytes=5-", 10), Ok(Some((5, 9)))));
        assert!(matches!(range("bytes=-3", 10), Ok(Some((7, 9)))));
        assert!(matches!(range("bytes=-30", 10), Ok(Some((0, 9)))));
        assert!(matches!(range("bytes=8-100", 10), Ok(Some((8, 9)))));
    }

    #[test]
    fn rejects_unsatisfiable_ranges() {
        assert!(matches!(
            range("bytes=10-", 10),
            Err(ApiError::RangeNotSatisfiable(10))
        ));
        assert!(matches!(
            range("bytes=5-2", 10),
            Err(ApiError::RangeNotSatisfiable(_))
        ));
        assert!(matches!(
            range("items=0-1", 10),
            Err(ApiError::RangeNotSatisfiable(_))
        ));
        assert!(matches!(
            range("bytes=0-1", 0),
            Err(ApiError::RangeNotSatisfiable(0))
        ));
    }

    #[test]
    fn multiple_ranges_fall_back_to_full_body() {
        assert!(matches!(range("bytes=0-1,4-5", 10), Ok(None)));
    }

    #[tokio::test]
    async fn serves_file_with_attachment_headers() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("hello.txt"), b"hello").expect("write");

        let response = download_file(
            Path("hello.txt".to_string()),
            HeaderMap::new(),
            Extension(storage),
        )
        .await
        .expect("download");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=hello.txt"
        );
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn serves_partial_content() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("digits.txt"), b"0123456789").expect("write");

        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-5"));
        let response = download_file(
            Path("digits.txt".to_string()),
            request_headers,
            Extension(storage),
        )
        .await
        .expect("download");

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"2345");
    }

    #[tokio::test]
    async fn matching_etag_is_not_modified() {
        let (_temp, storage) = make_storage();
        std::fs::write(storage.root_path().join("a.bin"), b"abc").expect("write");

        let first = download_file(
            Path("a.bin".to_string()),
            HeaderMap::new(),
            Extension(storage.clone()),
        )
        .await
        .expect("download");
        let etag = first.headers()[header::ETAG].clone();

        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::IF_NONE_MATCH, etag);
        let second = download_file(
            Path("a.bin".to_string()),
            request_headers,
            Extension(storage),
        )
        .await
        .expect("download");
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn directories_and_missing_files_are_not_found() {
        let (_temp, storage) = make_storage();
        std::fs::create_dir(storage.root_path().join("docs")).expect("mkdir");

        let result = download_file(
            Path("docs".to_string()),
            HeaderMap::new(),
            Extension(storage.clone()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let result = download_file(
            Path("missing.txt".to_string()),
            HeaderMap::new(),
            Extension(storage.clone()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let result = download_root(HeaderMap::new(), Extension(storage)).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (temp, storage) = make_storage();
        std::fs::write(temp.path().join("secret.txt"), b"secret").expect("write");

        let result = download_file(
            Path("../secret.txt".to_string()),
            HeaderMap::new(),
            Extension(storage),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
