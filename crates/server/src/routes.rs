use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vidstream_core::error::ApiError;
use vidstream_transcoder::TranscodeError;
use vidstream_transcoder::codec::{ClientCodecs, Codec, NegotiatedCodec, encoder_for_codec, negotiate};
use vidstream_transcoder::ffprobe::MediaInfo;
use vidstream_transcoder::hls::{
    PLAYLIST_CONTENT_TYPE, is_valid_segment_name, rewrite_playlist, segment_content_type,
};
use vidstream_transcoder::preset::{self, QualityPreset};
use vidstream_transcoder::session::{SessionInfo, SessionKey, SessionRequest, SessionStats};

use crate::error::AppError;
use crate::state::AppState;
use crate::streaming::{encode_path, resolve_media_path, respond};

pub const SESSION_ID_HEADER: &str = "x-session-id";

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_router())
        .nest("/stream", stream_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn stream_router() -> Router<AppState> {
    Router::new()
        .route("/playlist/{*path}", get(hls_playlist))
        .route("/segments/{sid}/{name}", get(hls_segment))
        .route("/direct/{*path}", get(crate::streaming::stream_direct))
}

fn api_router() -> Router<AppState> {
    Router::new()
        // Negotiation and presets
        .route("/stream/capabilities", get(get_capabilities))
        .route("/stream/presets/{*path}", get(get_presets))
        .route("/stream/info/{*path}", get(get_media_info))
        // Session control
        .route("/stream/sessions/{id}", axum::routing::delete(stop_session))
        .route("/stream/sessions/{id}/heartbeat", post(heartbeat_session))
        .route("/stream/sessions/{id}/pause", post(pause_session))
        .route("/stream/sessions/{id}/resume", post(resume_session))
        // Operators
        .route("/admin/sessions", get(list_sessions))
        .route("/admin/stats", get(get_stats))
        .route("/system/hardware", get(get_hardware))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        }))
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)])
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Codec negotiation & presets
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CapabilitiesResponse {
    codec: Codec,
    encoder: String,
    hwaccel: Option<String>,
    hardware: bool,
}

impl From<&NegotiatedCodec> for CapabilitiesResponse {
    fn from(n: &NegotiatedCodec) -> Self {
        Self {
            codec: n.codec,
            encoder: n.encoder.clone(),
            hwaccel: n.hwaccel.map(|h| h.to_string()),
            hardware: n.is_hardware(),
        }
    }
}

async fn get_capabilities(
    State(state): State<AppState>,
    Query(client): Query<ClientCodecs>,
) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse::from(&negotiate(&state.hardware, &client)))
}

#[derive(Deserialize)]
struct PresetsQuery {
    codec: Option<String>,
    audio: Option<u32>,
}

#[derive(Serialize)]
struct PresetsResponse {
    #[serde(flatten)]
    negotiated: CapabilitiesResponse,
    presets: Vec<QualityPreset>,
}

/// The encoder for an explicitly requested codec, or the negotiated one.
fn choose_codec(
    state: &AppState,
    requested: Option<&str>,
    client: &ClientCodecs,
) -> Result<NegotiatedCodec, ApiError> {
    match requested.filter(|c| !c.is_empty()) {
        Some(c) => {
            let codec: Codec = c.parse().map_err(ApiError::BadRequest)?;
            Ok(encoder_for_codec(&state.hardware, codec))
        }
        None => Ok(negotiate(&state.hardware, client)),
    }
}

/// Probe data, or `None` when the probe fails. Presets degrade to defaults without it.
async fn probe_or_none(state: &AppState, path: &std::path::Path) -> Option<MediaInfo> {
    match state.probe.probe(path).await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "probe failed, using default presets");
            None
        }
    }
}

/// The requested audio track, defaulting to the first. Unknown tracks are rejected
/// when probe data can tell.
fn checked_audio_track(media: Option<&MediaInfo>, requested: Option<u32>) -> Result<u32, ApiError> {
    match (media, requested) {
        (Some(m), Some(track)) if m.audio_track(track).is_none() => {
            Err(ApiError::BadRequest(format!("no audio track {track}")))
        }
        (_, track) => Ok(track.unwrap_or(0)),
    }
}

async fn get_presets(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(q): Query<PresetsQuery>,
    Query(client): Query<ClientCodecs>,
) -> Result<Json<PresetsResponse>, AppError> {
    let input = resolve_media_path(&state.config.media_root, &path)?;
    let negotiated = choose_codec(&state, q.codec.as_deref(), &client)?;
    let media = probe_or_none(&state, &input).await;
    let audio_track = checked_audio_track(media.as_ref(), q.audio)?;
    let presets = preset::resolve(media.as_ref(), &negotiated, &client, audio_track);

    Ok(Json(PresetsResponse {
        negotiated: CapabilitiesResponse::from(&negotiated),
        presets,
    }))
}

async fn get_media_info(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<MediaInfo>, AppError> {
    let input = resolve_media_path(&state.config.media_root, &path)?;
    let info = state.probe.probe(&input).await?;
    Ok(Json(info))
}

// ---------------------------------------------------------------------------
// HLS serving
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PlaylistQuery {
    quality: Option<String>,
    codec: Option<String>,
    audio: Option<u32>,
    start: Option<f64>,
}

async fn hls_playlist(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(q): Query<PlaylistQuery>,
    Query(client): Query<ClientCodecs>,
) -> Result<Response, AppError> {
    let start = q.start.unwrap_or(0.0);
    if !start.is_finite() || start < 0.0 {
        return Err(ApiError::BadRequest("start must be a non-negative number".into()).into());
    }

    let input = resolve_media_path(&state.config.media_root, &path)?;
    let negotiated = choose_codec(&state, q.codec.as_deref(), &client)?;
    let media = probe_or_none(&state, &input).await;
    let audio_track = checked_audio_track(media.as_ref(), q.audio)?;
    let presets = preset::resolve(media.as_ref(), &negotiated, &client, audio_track);
    let chosen = preset::select(&presets, q.quality.as_deref())
        .ok_or_else(|| ApiError::ServiceUnavailable("no playable quality".into()))?;

    if q.quality.as_deref().is_some_and(|want| !want.eq_ignore_ascii_case(&chosen.value)) {
        info!(path = %path, requested = ?q.quality, chosen = %chosen.value, "requested quality not viable");
    }

    let Some(params) = preset::transcode_params(chosen, &negotiated, audio_track) else {
        let target = format!("/stream/direct/{}", encode_path(path.trim_start_matches('/')));
        return Ok(Redirect::temporary(&target).into_response());
    };

    let key = SessionKey {
        media_path: path.trim_start_matches('/').to_string(),
        quality: chosen.value.clone(),
        codec: negotiated.codec.as_str().to_string(),
        audio_track,
        start_offset_secs: start,
    };
    let handle = state
        .transcoder
        .get_or_create(SessionRequest {
            key: key.clone(),
            input_path: input,
            params,
        })
        .await?;

    let content = state
        .transcoder
        .wait_for_playlist(&handle.id)
        .await
        .map_err(|e| match e {
            TranscodeError::NotReady(_) => {
                warn!(session_id = %handle.id, "playlist not ready within poll budget");
                AppError(ApiError::ServiceUnavailable("playlist not ready".into()))
            }
            other => AppError::from(other),
        })?;

    if key.start_offset_secs > 0.0 {
        let replaced = state.transcoder.stop_superseded(&key, &handle.id).await;
        if replaced > 0 {
            info!(session_id = %handle.id, replaced, "seek replaced earlier sessions");
        }
    }
    state.transcoder.heartbeat(&handle.id).await;

    let sid = handle.id.clone();
    let body = rewrite_playlist(&content, |name| format!("/stream/segments/{sid}/{name}"));

    respond(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)
            .header(header::CACHE_CONTROL, "no-cache")
            .header(SESSION_ID_HEADER, handle.id.as_str()),
        Body::from(body),
    )
}

async fn hls_segment(
    State(state): State<AppState>,
    Path((sid, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if !is_valid_segment_name(&name) {
        return Err(ApiError::BadRequest("invalid segment name".into()).into());
    }

    // A player fetching segments is alive.
    if !state.transcoder.heartbeat(&sid).await {
        return Err(ApiError::NotFound("session not found".into()).into());
    }

    let path = state
        .transcoder
        .wait_for_segment(&sid, &name)
        .await
        .map_err(|e| match e {
            TranscodeError::NotReady(_) => AppError(ApiError::NotFound("segment not ready".into())),
            other => AppError::from(other),
        })?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound("segment not found".into()))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("stat segment: {e}")))?
        .len();
    let stream = tokio_util::io::ReaderStream::new(file);

    respond(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, segment_content_type(&name))
            .header(header::CONTENT_LENGTH, len.to_string()),
        Body::from_stream(stream),
    )
}

// ---------------------------------------------------------------------------
// Session control
// ---------------------------------------------------------------------------

/// `active` is false when the id is unknown; control calls on vanished sessions are no-ops.
#[derive(Serialize)]
struct ControlResponse {
    ok: bool,
    active: bool,
}

impl ControlResponse {
    fn new(active: bool) -> Json<Self> {
        Json(Self { ok: true, active })
    }
}

async fn heartbeat_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ControlResponse> {
    ControlResponse::new(state.transcoder.heartbeat(&id).await)
}

async fn pause_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ControlResponse>, AppError> {
    Ok(ControlResponse::new(state.transcoder.pause(&id).await?))
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ControlResponse>, AppError> {
    Ok(ControlResponse::new(state.transcoder.resume(&id).await?))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ControlResponse> {
    ControlResponse::new(state.transcoder.stop(&id).await)
}

// ---------------------------------------------------------------------------
// Admin & system
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.transcoder.list_sessions().await,
    })
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    sessions: SessionStats,
    hardware_mode: &'static str,
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        sessions: state.transcoder.stats().await,
        hardware_mode: state.hardware.hwaccel.map_or("none", |h| h.as_str()),
    })
}

async fn get_hardware(
    State(state): State<AppState>,
) -> Json<vidstream_transcoder::gpu::HardwareCapabilities> {
    Json(state.hardware.as_ref().clone())
}
