use std::sync::Arc;

use vidstream_transcoder::ffprobe::MediaProbe;
use vidstream_transcoder::gpu::HardwareCapabilities;
use vidstream_transcoder::session::SessionManager;

use crate::config::ServerConfig;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub transcoder: Arc<SessionManager>,
    /// Detected once at startup.
    pub hardware: Arc<HardwareCapabilities>,
    pub probe: Arc<dyn MediaProbe>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        transcoder: Arc<SessionManager>,
        hardware: HardwareCapabilities,
        probe: Arc<dyn MediaProbe>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transcoder,
            hardware: Arc::new(hardware),
            probe,
        }
    }
}
