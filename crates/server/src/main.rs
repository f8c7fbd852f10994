use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vidstream_server::config::{LogFormat, ServerConfig};
use vidstream_server::routes::build_router;
use vidstream_server::state::AppState;
use vidstream_transcoder::ffprobe::FfprobeProbe;
use vidstream_transcoder::gpu::{self, HardwareCapabilities};
use vidstream_transcoder::process::FfmpegLauncher;
use vidstream_transcoder::session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    info!(
        media_root = %config.media_root.display(),
        transcode_dir = %config.transcoder.transcode_dir.display(),
        max_transcodes = config.transcoder.max_concurrent,
        "starting"
    );

    // Hardware detection runs once; handlers only ever see the cached result.
    let hardware = if config.disable_hwaccel {
        info!("hardware acceleration disabled by configuration");
        HardwareCapabilities::none()
    } else {
        gpu::detect(&config.transcoder.ffmpeg_path).await
    };
    info!(
        mode = hardware.hwaccel.map_or("none", |h| h.as_str()),
        encoders = ?hardware.encoders.iter().map(|e| e.encoder.as_str()).collect::<Vec<_>>(),
        "hardware detection complete"
    );

    let manager = Arc::new(SessionManager::new(
        config.transcoder.clone(),
        Arc::new(FfmpegLauncher),
    ));
    manager
        .purge_stale_output()
        .await
        .context("failed to prepare transcode dir")?;

    let shutdown = CancellationToken::new();
    let reaper = manager.spawn_reaper(shutdown.clone());

    let probe = Arc::new(FfprobeProbe::new(config.transcoder.ffprobe_path.clone()));
    let bind_addr = config.bind;
    let app = build_router(AppState::new(config, manager.clone(), hardware, probe));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    shutdown.cancel();
    let _ = reaper.await;
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
