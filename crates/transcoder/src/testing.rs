//! In-memory doubles for the transcoder process and the prober.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::TranscodeError;
use crate::ffprobe::{AudioStream, MediaInfo, MediaProbe, VideoStream};
use crate::hls::{INIT_SEGMENT_FILE, PLAYLIST_FILE};
use crate::process::{LaunchSpec, Launched, Launcher, ProcessExit, TranscodeProcess};

/// What a [`FakeLauncher`] process does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Write a playlist with this many segments, then keep running until killed.
    Produce { segments: usize },
    /// Write a complete playlist and exit successfully.
    ProduceAndExit { segments: usize },
    /// Keep running without writing anything.
    Silent,
    /// Exit with an error before writing anything.
    ExitFailed,
    /// Fail to start at all.
    SpawnError,
}

struct LaunchRecord {
    args: Vec<String>,
    suspended: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
}

/// Launcher that writes HLS output directly instead of running ffmpeg.
pub struct FakeLauncher {
    behavior: Mutex<FakeBehavior>,
    can_suspend: bool,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl FakeLauncher {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            can_suspend: true,
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Processes that must be killed and re-spawned instead of frozen.
    pub fn without_suspend(mut self) -> Self {
        self.can_suspend = false;
        self
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    /// Arguments of the `n`th launch.
    pub fn args(&self, n: usize) -> Vec<String> {
        self.launches.lock().unwrap()[n].args.clone()
    }

    pub fn is_suspended(&self, n: usize) -> bool {
        self.launches.lock().unwrap()[n].suspended.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self, n: usize) -> bool {
        self.launches.lock().unwrap()[n].killed.load(Ordering::SeqCst)
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Launched, TranscodeError> {
        let behavior = *self.behavior.lock().unwrap();
        if behavior == FakeBehavior::SpawnError {
            return Err(TranscodeError::SpawnFailed("fake spawn error".into()));
        }

        let fmp4 = spec.args.iter().any(|a| a == "fmp4");
        match behavior {
            FakeBehavior::Produce { segments } => write_output(&spec.output_dir, segments, fmp4, false)?,
            FakeBehavior::ProduceAndExit { segments } => {
                write_output(&spec.output_dir, segments, fmp4, true)?
            }
            _ => {}
        }

        let (tx, rx) = oneshot::channel();
        let pending = match behavior {
            FakeBehavior::ProduceAndExit { .. } => {
                let _ = tx.send(ProcessExit::Success);
                None
            }
            FakeBehavior::ExitFailed => {
                let _ = tx.send(ProcessExit::Failed("exit status: 1".into()));
                None
            }
            _ => Some(tx),
        };

        let suspended = Arc::new(AtomicBool::new(false));
        let killed = Arc::new(AtomicBool::new(false));
        self.launches.lock().unwrap().push(LaunchRecord {
            args: spec.args.clone(),
            suspended: suspended.clone(),
            killed: killed.clone(),
        });

        Ok(Launched {
            process: Box::new(FakeProcess {
                can_suspend: self.can_suspend,
                suspended,
                killed,
                exit: Mutex::new(pending),
            }),
            exited: rx,
        })
    }
}

struct FakeProcess {
    can_suspend: bool,
    suspended: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    exit: Mutex<Option<oneshot::Sender<ProcessExit>>>,
}

impl TranscodeProcess for FakeProcess {
    fn can_suspend(&self) -> bool {
        self.can_suspend
    }

    fn suspend(&self) -> Result<(), TranscodeError> {
        if !self.can_suspend {
            return Err(TranscodeError::Signal("not supported".into()));
        }
        self.suspended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), TranscodeError> {
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn kill(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.killed.store(true, Ordering::SeqCst);
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(ProcessExit::Killed);
        }
    }
}

fn write_output(dir: &Path, segments: usize, fmp4: bool, complete: bool) -> Result<(), TranscodeError> {
    std::fs::create_dir_all(dir)?;
    let ext = if fmp4 { "m4s" } else { "ts" };
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:4\n");
    playlist.push_str("#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:EVENT\n");
    if fmp4 {
        std::fs::write(dir.join(INIT_SEGMENT_FILE), b"init")?;
        playlist.push_str(&format!("#EXT-X-MAP:URI=\"{INIT_SEGMENT_FILE}\"\n"));
    }
    for i in 0..segments {
        let name = format!("seg_{i:05}.{ext}");
        std::fs::write(dir.join(&name), vec![0x47u8; 188])?;
        playlist.push_str(&format!("#EXTINF:4.000000,\n{name}\n"));
    }
    if complete {
        playlist.push_str("#EXT-X-ENDLIST\n");
    }
    std::fs::write(dir.join(PLAYLIST_FILE), playlist)?;
    Ok(())
}

/// Prober that returns canned data, or fails when built with `failing`.
pub struct FakeProbe {
    info: Option<MediaInfo>,
}

impl FakeProbe {
    pub fn new(info: MediaInfo) -> Self {
        Self { info: Some(info) }
    }

    pub fn failing() -> Self {
        Self { info: None }
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        self.info
            .clone()
            .ok_or_else(|| TranscodeError::ProbeFailed(format!("fake probe of {}", path.display())))
    }
}

/// An 8-bit h264 + aac source of the given height in a Matroska container.
pub fn sample_media(height: u32) -> MediaInfo {
    MediaInfo {
        container: "mkv".into(),
        duration_secs: 5400.0,
        size_bytes: Some(4_000_000_000),
        bitrate_kbps: Some(12_000),
        video: Some(VideoStream {
            index: 0,
            codec: "h264".into(),
            width: height * 16 / 9,
            height,
            pix_fmt: Some("yuv420p".into()),
            bitrate_kbps: None,
            framerate: Some(23.976),
        }),
        audio: vec![AudioStream {
            index: 1,
            stream_index: 0,
            codec: "aac".into(),
            channels: 6,
            channel_layout: Some("5.1".into()),
            language: Some("eng".into()),
            title: None,
            is_default: true,
        }],
        subtitles: vec![],
        chapters: vec![],
    }
}
