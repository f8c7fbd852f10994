use std::path::{Component, Path as FsPath, PathBuf};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;
use vidstream_core::error::ApiError;

use crate::error::AppError;
use crate::state::AppState;

/// Parse an HTTP Range header per RFC 7233.
/// Only supports single byte ranges: `bytes=start-end`, `bytes=start-` or `bytes=-suffix`.
#[derive(Debug)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

pub fn parse_range_header(range_str: &str, file_size: u64) -> Result<ByteRange, ApiError> {
    let range_str = range_str.trim();
    let Some(spec) = range_str.strip_prefix("bytes=") else {
        return Err(ApiError::BadRequest("only bytes ranges supported".into()));
    };

    if spec.contains(',') {
        return Err(ApiError::BadRequest("multi-range not supported".into()));
    }
    if file_size == 0 {
        return Err(ApiError::BadRequest("empty file".into()));
    }

    let (start_s, end_s) = spec.split_once('-').unwrap_or((spec, ""));

    if start_s.is_empty() {
        // Suffix range: bytes=-500 means last 500 bytes
        let suffix: u64 = end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range suffix".into()))?;
        if suffix == 0 {
            return Err(ApiError::BadRequest("empty suffix range".into()));
        }
        return Ok(ByteRange {
            start: file_size.saturating_sub(suffix),
            end_inclusive: file_size - 1,
        });
    }

    let start: u64 = start_s
        .parse()
        .map_err(|_| ApiError::BadRequest("bad range start".into()))?;

    let end: u64 = if end_s.is_empty() {
        file_size - 1
    } else {
        end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range end".into()))?
    };

    if start >= file_size {
        return Err(ApiError::BadRequest(format!(
            "range start {start} >= file size {file_size}"
        )));
    }

    let end = end.min(file_size - 1);

    if start > end {
        return Err(ApiError::BadRequest("range start > end".into()));
    }

    Ok(ByteRange {
        start,
        end_inclusive: end,
    })
}

/// Content-type guess from file extension.
fn content_type_for_path(path: &FsPath) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("ts") => "video/mp2t",
        Some("mpg" | "mpeg") => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Resolve a client-supplied, root-relative media path to an existing file under `root`.
///
/// Lexical traversal (`..`, absolute paths) is refused outright; symlinks that escape the
/// root are caught by comparing canonical paths.
pub fn resolve_media_path(root: &FsPath, relative: &str) -> Result<PathBuf, ApiError> {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return Err(ApiError::BadRequest("empty media path".into()));
    }
    if FsPath::new(relative)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ApiError::Forbidden("path escapes the media root".into()));
    }

    let candidate = root.join(relative);
    let canonical = candidate
        .canonicalize()
        .map_err(|_| ApiError::NotFound("media file not found".into()))?;
    let root = root
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("media root unavailable: {e}")))?;
    if !canonical.starts_with(&root) {
        return Err(ApiError::Forbidden("path escapes the media root".into()));
    }
    if !canonical.is_file() {
        return Err(ApiError::NotFound("media file not found".into()));
    }
    Ok(canonical)
}

/// Stream a file with HTTP Range support (Direct Play).
/// GET /stream/direct/{*path}
pub async fn stream_direct(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let file_path = resolve_media_path(&state.config.media_root, &path)?;
    let file_size = tokio::fs::metadata(&file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("stat error: {e}")))?
        .len();
    let content_type = content_type_for_path(&file_path);

    let mut file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("file open error: {e}")))?;

    let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        let stream = tokio_util::io::ReaderStream::new(file);
        return respond(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, file_size.to_string())
                .header(header::ACCEPT_RANGES, "bytes"),
            Body::from_stream(stream),
        );
    };

    let range = match parse_range_header(range_header, file_size) {
        Ok(r) => r,
        Err(e) => {
            debug!(range = range_header, error = %e, "unsatisfiable range");
            return respond(
                Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{file_size}")),
                Body::empty(),
            );
        }
    };

    let content_length = range.end_inclusive - range.start + 1;
    file.seek(std::io::SeekFrom::Start(range.start))
        .await
        .map_err(|e| ApiError::Internal(format!("seek error: {e}")))?;
    let stream = tokio_util::io::ReaderStream::new(file.take(content_length));

    respond(
        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, content_length.to_string())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end_inclusive, file_size),
            )
            .header(header::ACCEPT_RANGES, "bytes"),
        Body::from_stream(stream),
    )
}

pub(crate) fn respond(builder: axum::http::response::Builder, body: Body) -> Result<Response, AppError> {
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("response build error: {e}")).into())
}

/// Percent-encode a relative path for use in a URL, keeping `/` separators.
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
