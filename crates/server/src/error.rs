use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};
use vidstream_core::error::{ApiError, ErrorEnvelope};
use vidstream_transcoder::TranscodeError;

/// Newtype wrapper so we can implement `IntoResponse` in this crate.
pub struct AppError(pub ApiError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self.0);
        (status, Json(envelope)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

/// Coarse client-facing translation. Process and OS detail stays in the logs.
impl From<TranscodeError> for AppError {
    fn from(e: TranscodeError) -> Self {
        let api = match e {
            TranscodeError::SessionNotFound(_) => ApiError::NotFound("session not found".into()),
            TranscodeError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            TranscodeError::NotReady(_) => ApiError::NotFound("not ready".into()),
            TranscodeError::MaxTranscodesReached(n) => {
                warn!(max = n, "transcode admission refused");
                ApiError::ServiceUnavailable(format!("max concurrent transcodes reached ({n})"))
            }
            TranscodeError::TranscodeFailed(ref id) => {
                warn!(session_id = %id, "transcode failed before producing output");
                ApiError::ServiceUnavailable("transcoding failed".into())
            }
            TranscodeError::BinaryNotFound(_) | TranscodeError::SpawnFailed(_) => {
                error!(error = %e, "transcoder unavailable");
                ApiError::ServiceUnavailable("transcoder unavailable".into())
            }
            TranscodeError::ProbeFailed(_) | TranscodeError::Signal(_) | TranscodeError::Io(_) => {
                error!(error = %e, "internal transcoder error");
                ApiError::Internal("internal error".into())
            }
        };
        Self(api)
    }
}
