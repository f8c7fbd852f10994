#![allow(
    clippy::collapsible_if,
    clippy::redundant_closure,
    clippy::unused_async
)]
pub mod codec;
pub mod command;
pub mod ffprobe;
pub mod gpu;
pub mod hls;
pub mod preset;
pub mod process;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffmpeg/ffprobe not found at {0}")]
    BinaryNotFound(PathBuf),
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),
    #[error("failed to start transcoder: {0}")]
    SpawnFailed(String),
    #[error("transcoding failed for session {0}")]
    TranscodeFailed(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("cannot {op} session {id} while {state}")]
    InvalidTransition {
        id: String,
        op: &'static str,
        state: SessionState,
    },
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("process control failed: {0}")]
    Signal(String),
    #[error("max transcodes reached ({0})")]
    MaxTranscodesReached(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Global transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub transcode_dir: PathBuf,
    /// Cap on sessions holding an encoder (starting or ready). Zero disables the cap.
    pub max_concurrent: usize,
    pub segment_secs: u32,
    pub heartbeat_timeout: Duration,
    pub paused_timeout: Duration,
    /// Idle timeout once the transcoder has written every segment.
    pub finished_timeout: Duration,
    pub max_session_age: Option<Duration>,
    pub reap_interval: Duration,
    pub poll_interval: Duration,
    pub playlist_poll_attempts: u32,
    pub segment_poll_attempts: u32,
    /// Segments a playlist must list before it is handed to a player.
    pub min_playlist_segments: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            transcode_dir: PathBuf::from("/tmp/vidstream_hls"),
            max_concurrent: 4,
            segment_secs: 4,
            heartbeat_timeout: Duration::from_secs(45),
            paused_timeout: Duration::from_secs(30),
            finished_timeout: Duration::from_secs(300),
            max_session_age: Some(Duration::from_secs(30 * 60)),
            reap_interval: Duration::from_secs(15),
            poll_interval: Duration::from_millis(200),
            playlist_poll_attempts: 100,
            segment_poll_attempts: 150,
            min_playlist_segments: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    Nvenc,
    Vaapi,
    Qsv,
    VideoToolbox,
}

impl HwAccel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nvenc => "nvenc",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox",
        }
    }

    /// Value passed to ffmpeg's `-hwaccel` for GPU decoding.
    pub fn decode_flag(self) -> &'static str {
        match self {
            Self::Nvenc => "cuda",
            Self::Vaapi => "vaapi",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox",
        }
    }
}

impl std::fmt::Display for HwAccel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
