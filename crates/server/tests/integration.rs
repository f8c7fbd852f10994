use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;
use vidstream_server::config::ServerConfig;
use vidstream_server::routes::build_router;
use vidstream_server::state::AppState;
use vidstream_transcoder::TranscoderConfig;
use vidstream_transcoder::ffprobe::MediaProbe;
use vidstream_transcoder::gpu::HardwareCapabilities;
use vidstream_transcoder::session::SessionManager;
use vidstream_transcoder::testing::{FakeBehavior, FakeLauncher, FakeProbe, sample_media};

struct TestApp {
    server: TestServer,
    launcher: Arc<FakeLauncher>,
    manager: Arc<SessionManager>,
    _media: TempDir,
    _transcode: TempDir,
}

/// A server over a temp media root holding `movies/film.mkv` and `movies/clip.mp4`,
/// with an in-memory transcoder.
fn test_app_with(behavior: FakeBehavior, probe: Arc<dyn MediaProbe>) -> TestApp {
    let media = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(media.path().join("movies")).unwrap();
    std::fs::write(media.path().join("movies/film.mkv"), vec![7u8; 4096]).unwrap();
    std::fs::write(media.path().join("movies/clip.mp4"), (0..=255u8).collect::<Vec<_>>()).unwrap();
    let transcode = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::from_lookup(|_| None).unwrap();
    config.media_root = media.path().to_path_buf();
    config.transcoder = TranscoderConfig {
        transcode_dir: transcode.path().to_path_buf(),
        max_concurrent: 2,
        poll_interval: Duration::from_millis(10),
        playlist_poll_attempts: 30,
        segment_poll_attempts: 30,
        ..TranscoderConfig::default()
    };

    let launcher = Arc::new(FakeLauncher::new(behavior));
    let manager = Arc::new(SessionManager::new(config.transcoder.clone(), launcher.clone()));
    let state = AppState::new(config, manager.clone(), HardwareCapabilities::none(), probe);

    TestApp {
        server: TestServer::new(build_router(state)).unwrap(),
        launcher,
        manager,
        _media: media,
        _transcode: transcode,
    }
}

fn test_app() -> TestApp {
    test_app_with(
        FakeBehavior::Produce { segments: 3 },
        Arc::new(FakeProbe::new(sample_media(1080))),
    )
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let app = test_app();
    let resp = app.server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn capabilities_fall_back_to_software_h264() {
    let app = test_app();
    let resp = app
        .server
        .get("/api/v1/stream/capabilities?h264=true&hevc=true&av1=true")
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["codec"], "h264");
    assert_eq!(body["encoder"], "libx264");
    assert_eq!(body["hardware"], false);
    assert!(body["hwaccel"].is_null());
}

#[tokio::test]
async fn presets_report_direct_play_flags() {
    let app = test_app();
    // h264/aac in mkv: the client decodes both streams, but the container rules out original.
    let resp = app
        .server
        .get("/api/v1/stream/presets/movies/film.mkv?h264=true&aac=true")
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    let presets = body["presets"].as_array().unwrap();
    let values: Vec<&str> = presets.iter().map(|p| p["value"].as_str().unwrap()).collect();
    assert_eq!(values.first(), Some(&"720p"));
    assert_eq!(&values[values.len() - 2..], &["passthrough", "original"]);

    let original = presets.last().unwrap();
    assert_eq!(original["can_original_video"], true);
    assert_eq!(original["can_original_audio"], true);
    assert_eq!(original["can_original"], false);
}

#[tokio::test]
async fn presets_when_client_cannot_decode_video() {
    let app = test_app_with(
        FakeBehavior::Produce { segments: 3 },
        Arc::new(FakeProbe::new({
            let mut m = sample_media(1080);
            m.video.as_mut().unwrap().codec = "hevc".into();
            m.container = "mp4".into();
            m
        })),
    );
    let resp = app
        .server
        .get("/api/v1/stream/presets/movies/film.mkv?h264=true&aac=true")
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    let original = body["presets"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(original["can_original"], false);
    assert_eq!(original["can_original_video"], false);
    assert_eq!(original["can_original_audio"], true);
}

#[tokio::test]
async fn presets_without_probe_data_use_defaults() {
    let app = test_app_with(FakeBehavior::Produce { segments: 3 }, Arc::new(FakeProbe::failing()));
    let resp = app.server.get("/api/v1/stream/presets/movies/film.mkv").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    let values: Vec<&str> = body["presets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["value"].as_str().unwrap())
        .collect();
    assert_eq!(values, vec!["720p", "1080p", "passthrough", "original"]);
}

#[tokio::test]
async fn media_paths_cannot_escape_root() {
    let app = test_app();
    let resp = app.server.get("/api/v1/stream/presets/movies/../../etc/passwd").await;
    assert!(resp.status_code().is_client_error());
    let resp = app.server.get("/stream/playlist/movies/missing.mkv").await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn media_info_returns_probe() {
    let app = test_app();
    let resp = app.server.get("/api/v1/stream/info/movies/film.mkv").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["container"], "mkv");
    assert_eq!(body["audio"][0]["language"], "eng");

    let app = test_app_with(FakeBehavior::Silent, Arc::new(FakeProbe::failing()));
    let resp = app.server.get("/api/v1/stream/info/movies/film.mkv").await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json();
    assert_eq!(body["error"]["message"], "internal error: internal error");
}

#[tokio::test]
async fn unknown_audio_track_is_rejected() {
    let app = test_app();
    let resp = app
        .server
        .get("/stream/playlist/movies/film.mkv?quality=720p&audio=3")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(app.launcher.launch_count(), 0);

    let resp = app.server.get("/api/v1/stream/presets/movies/film.mkv?audio=3").await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = app.server.get("/api/v1/stream/presets/movies/film.mkv?audio=0").await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn playlist_is_rewritten_to_session_urls() {
    let app = test_app();
    let resp = app
        .server
        .get("/stream/playlist/movies/film.mkv?quality=720p&h264=true")
        .await;
    resp.assert_status_ok();
    let sid = resp.header("x-session-id").to_str().unwrap().to_string();
    assert_eq!(sid.len(), 32);
    assert_eq!(
        resp.header("content-type").to_str().unwrap(),
        "application/vnd.apple.mpegurl"
    );
    let body = resp.text();
    assert!(body.contains(&format!("/stream/segments/{sid}/seg_00000.ts")));

    let seg = app.server.get(&format!("/stream/segments/{sid}/seg_00001.ts")).await;
    seg.assert_status_ok();
    assert_eq!(seg.header("content-type").to_str().unwrap(), "video/MP2T");
    assert_eq!(seg.as_bytes().len(), 188);

    let missing = app.server.get(&format!("/stream/segments/{sid}/seg_00099.ts")).await;
    missing.assert_status(StatusCode::NOT_FOUND);

    let bad = app.server.get(&format!("/stream/segments/{sid}/playlist.m3u8")).await;
    bad.assert_status(StatusCode::BAD_REQUEST);

    let unknown = app.server.get("/stream/segments/deadbeef/seg_00000.ts").await;
    unknown.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn identical_requests_share_one_process() {
    let app = test_app();
    let url = "/stream/playlist/movies/film.mkv?quality=1080p&h264=true";
    let (a, b) = tokio::join!(
        app.server.get(url).into_future(),
        app.server.get(url).into_future()
    );
    a.assert_status_ok();
    b.assert_status_ok();
    assert_eq!(a.header("x-session-id"), b.header("x-session-id"));
    assert_eq!(app.launcher.launch_count(), 1);
}

#[tokio::test]
async fn original_redirects_to_direct_play() {
    let app = test_app_with(
        FakeBehavior::Produce { segments: 3 },
        Arc::new(FakeProbe::new({
            let mut m = sample_media(1080);
            m.container = "mp4".into();
            m
        })),
    );
    let resp = app
        .server
        .get("/stream/playlist/movies/clip.mp4?quality=original&h264=true&aac=true")
        .await;
    resp.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        resp.header("location").to_str().unwrap(),
        "/stream/direct/movies/clip.mp4"
    );
    assert_eq!(app.launcher.launch_count(), 0);
}

#[tokio::test]
async fn unviable_original_falls_back_to_passthrough() {
    let app = test_app();
    // mkv cannot be played directly; passthrough remuxes instead.
    let resp = app
        .server
        .get("/stream/playlist/movies/film.mkv?quality=original&h264=true&aac=true")
        .await;
    resp.assert_status_ok();
    let sessions: Value = app.server.get("/api/v1/admin/sessions").await.json();
    assert_eq!(sessions["sessions"][0]["quality"], "passthrough");
    assert_eq!(sessions["sessions"][0]["encoder"], "copy");
}

#[tokio::test]
async fn direct_play_supports_ranges() {
    let app = test_app();
    let full = app.server.get("/stream/direct/movies/clip.mp4").await;
    full.assert_status_ok();
    assert_eq!(full.as_bytes().len(), 256);
    assert_eq!(full.header("accept-ranges").to_str().unwrap(), "bytes");

    let part = app
        .server
        .get("/stream/direct/movies/clip.mp4")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=10-19"))
        .await;
    part.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(part.header("content-range").to_str().unwrap(), "bytes 10-19/256");
    assert_eq!(part.as_bytes().to_vec(), (10..20u8).collect::<Vec<_>>());

    let bad = app
        .server
        .get("/stream/direct/movies/clip.mp4")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=999-"))
        .await;
    bad.assert_status(StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn session_control_lifecycle() {
    let app = test_app();
    let resp = app.server.get("/stream/playlist/movies/film.mkv?quality=720p").await;
    resp.assert_status_ok();
    let sid = resp.header("x-session-id").to_str().unwrap().to_string();
    let base = format!("/api/v1/stream/sessions/{sid}");

    let hb: Value = app.server.post(&format!("{base}/heartbeat")).await.json();
    assert_eq!(hb["active"], true);

    // Resume is only legal from paused.
    let resp = app.server.post(&format!("{base}/resume")).await;
    resp.assert_status(StatusCode::CONFLICT);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "conflict");

    app.server.post(&format!("{base}/pause")).await.assert_status_ok();
    assert!(app.launcher.is_suspended(0));
    app.server
        .post(&format!("{base}/pause"))
        .await
        .assert_status(StatusCode::CONFLICT);
    app.server.post(&format!("{base}/resume")).await.assert_status_ok();
    assert!(!app.launcher.is_suspended(0));

    let stopped: Value = app.server.delete(&base).await.json();
    assert_eq!(stopped["active"], true);
    let again: Value = app.server.delete(&base).await.json();
    assert_eq!(again["ok"], true);
    assert_eq!(again["active"], false);
    assert!(app.launcher.is_killed(0));

    // Controls on a vanished session are no-ops.
    let hb: Value = app.server.post(&format!("{base}/heartbeat")).await.json();
    assert_eq!(hb, serde_json::json!({ "ok": true, "active": false }));
    app.server.post(&format!("{base}/pause")).await.assert_status_ok();
}

#[tokio::test]
async fn seek_creates_new_session_and_stops_old() {
    let app = test_app();
    let first = app.server.get("/stream/playlist/movies/film.mkv?quality=720p").await;
    let old = first.header("x-session-id").to_str().unwrap().to_string();

    let seek = app
        .server
        .get("/stream/playlist/movies/film.mkv?quality=720p&start=600")
        .await;
    seek.assert_status_ok();
    let new = seek.header("x-session-id").to_str().unwrap().to_string();
    assert_ne!(old, new);

    let args = app.launcher.args(1);
    let ss = args.iter().position(|a| a == "-ss").unwrap();
    assert_eq!(args[ss + 1], "600.00");

    let sessions: Value = app.server.get("/api/v1/admin/sessions").await.json();
    let ids: Vec<&str> = sessions["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![new.as_str()]);
}

#[tokio::test]
async fn admission_cap_returns_service_unavailable() {
    let app = test_app();
    for q in ["720p", "1080p"] {
        app.server
            .get(&format!("/stream/playlist/movies/film.mkv?quality={q}"))
            .await
            .assert_status_ok();
    }
    let resp = app.server.get("/stream/playlist/movies/film.mkv?quality=passthrough&aac=true").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "service_unavailable");

    let stats: Value = app.server.get("/api/v1/admin/stats").await.json();
    assert_eq!(stats["active"], 2);
    assert_eq!(stats["max_concurrent"], 2);
    assert_eq!(stats["hardware_mode"], "none");
}

#[tokio::test]
async fn failed_transcode_is_unavailable_then_retryable() {
    let app = test_app_with(FakeBehavior::ExitFailed, Arc::new(FakeProbe::new(sample_media(1080))));
    let url = "/stream/playlist/movies/film.mkv?quality=720p";
    let resp = app.server.get(url).await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json();
    assert_eq!(body["error"]["message"], "service unavailable: transcoding failed");

    app.launcher.set_behavior(FakeBehavior::Produce { segments: 3 });
    app.server.get(url).await.assert_status_ok();
    assert_eq!(app.launcher.launch_count(), 2);
}

#[tokio::test]
async fn silent_transcoder_times_out() {
    let app = test_app_with(FakeBehavior::Silent, Arc::new(FakeProbe::new(sample_media(1080))));
    let resp = app.server.get("/stream/playlist/movies/film.mkv?quality=720p").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn paused_session_disappears_after_timeout() {
    let app = test_app();
    let resp = app.server.get("/stream/playlist/movies/film.mkv?quality=720p").await;
    let sid = resp.header("x-session-id").to_str().unwrap().to_string();
    app.server
        .post(&format!("/api/v1/stream/sessions/{sid}/pause"))
        .await
        .assert_status_ok();

    let reaped = app
        .manager
        .reap_idle_at(std::time::Instant::now() + Duration::from_secs(31))
        .await;
    assert_eq!(reaped, vec![sid]);

    let sessions: Value = app.server.get("/api/v1/admin/sessions").await.json();
    assert!(sessions["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn hardware_endpoint_reports_cached_caps() {
    let app = test_app();
    let resp = app.server.get("/api/v1/system/hardware").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert!(body["hwaccel"].is_null());
    assert_eq!(body["encoders"], serde_json::json!([]));
}
