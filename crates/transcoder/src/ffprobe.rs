use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::TranscodeError;

/// Media information extracted via ffprobe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Normalised container: `mkv`, `mp4`, `webm`, `avi`, `ts`, or ffprobe's first name.
    pub container: String,
    pub duration_secs: f64,
    pub size_bytes: Option<u64>,
    pub bitrate_kbps: Option<u32>,
    pub video: Option<VideoStream>,
    pub audio: Vec<AudioStream>,
    pub subtitles: Vec<SubtitleStream>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl MediaInfo {
    /// Bitrate of the whole file in bits per second, preferring the container value.
    pub fn source_bitrate_bps(&self) -> Option<u64> {
        self.bitrate_kbps
            .or_else(|| self.video.as_ref().and_then(|v| v.bitrate_kbps))
            .map(|k| u64::from(k) * 1000)
    }

    pub fn audio_track(&self, stream_index: u32) -> Option<&AudioStream> {
        self.audio.iter().find(|a| a.stream_index == stream_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    pub index: u32,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub pix_fmt: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub framerate: Option<f64>,
}

impl VideoStream {
    /// `yuv420p10le` and friends.
    pub fn is_10bit(&self) -> bool {
        self.pix_fmt
            .as_deref()
            .is_some_and(|p| p.contains("10le") || p.contains("10be"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    /// Absolute stream index in the file.
    pub index: u32,
    /// Audio-only index (0, 1, 2...), the value clients send as `audio=`.
    pub stream_index: u32,
    pub codec: String,
    pub channels: u32,
    pub channel_layout: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleStream {
    pub index: u32,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub is_forced: bool,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Source of media information. Slow and fallible; callers degrade when it errors.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError>;
}

/// Production probe backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_path: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        probe(&self.ffprobe_path, path).await
    }
}

/// Run ffprobe on a file and parse the JSON output.
pub async fn probe(ffprobe_path: &Path, file: &Path) -> Result<MediaInfo, TranscodeError> {
    let output = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-show_chapters",
        ])
        .arg(file)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound(ffprobe_path.into()),
            _ => TranscodeError::ProbeFailed(format!("spawn failed: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::ProbeFailed(format!(
            "{}: {}",
            file.display(),
            stderr.trim()
        )));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::ProbeFailed(format!("parse JSON: {e}")))?;

    parse_probe_output(&raw)
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<MediaInfo, TranscodeError> {
    let format = raw
        .get("format")
        .ok_or_else(|| TranscodeError::ProbeFailed("missing 'format'".into()))?;

    let container = normalize_container(
        format
            .get("format_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown"),
    );

    let duration_secs = str_field(format, "duration")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let size_bytes = str_field(format, "size").and_then(|s| s.parse::<u64>().ok());

    let bitrate_kbps = str_field(format, "bit_rate")
        .and_then(|s| s.parse::<u64>().ok())
        .map(|b| (b / 1000) as u32);

    let streams = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video = None;
    let mut audio = Vec::new();
    let mut subtitles = Vec::new();

    for s in &streams {
        let codec_type = s.get("codec_type").and_then(|v| v.as_str()).unwrap_or("");
        let index = s.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let codec = s
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let tags = s.get("tags");
        let language = tags
            .and_then(|t| t.get("language"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let title = tags
            .and_then(|t| t.get("title"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let disposition = s.get("disposition");
        let is_default = disposition
            .and_then(|d| d.get("default"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            == 1;
        let is_forced = disposition
            .and_then(|d| d.get("forced"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            == 1;

        match codec_type {
            // Cover art shows up as a video stream; only the first one counts.
            "video" => {
                if video.is_none() {
                    let width = s.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    let height = s.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    let stream_bitrate = str_field(s, "bit_rate")
                        .and_then(|b| b.parse::<u64>().ok())
                        .map(|b| (b / 1000) as u32);
                    let framerate = str_field(s, "r_frame_rate").and_then(parse_fraction);

                    video = Some(VideoStream {
                        index,
                        codec,
                        width,
                        height,
                        pix_fmt: str_field(s, "pix_fmt").map(str::to_string),
                        bitrate_kbps: stream_bitrate,
                        framerate,
                    });
                }
            }
            "audio" => {
                let channels = s.get("channels").and_then(|v| v.as_u64()).unwrap_or(2) as u32;
                audio.push(AudioStream {
                    index,
                    stream_index: audio.len() as u32,
                    codec,
                    channels,
                    channel_layout: str_field(s, "channel_layout").map(str::to_string),
                    language,
                    title,
                    is_default,
                });
            }
            "subtitle" => {
                subtitles.push(SubtitleStream {
                    index,
                    codec,
                    language,
                    title,
                    is_forced,
                    is_default,
                });
            }
            _ => {}
        }
    }

    let chapters = raw
        .get("chapters")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(parse_chapter).collect())
        .unwrap_or_default();

    Ok(MediaInfo {
        container,
        duration_secs,
        size_bytes,
        bitrate_kbps,
        video,
        audio,
        subtitles,
        chapters,
    })
}

fn parse_chapter(ch: &serde_json::Value) -> Option<Chapter> {
    let start_secs: f64 = str_field(ch, "start_time")?.parse().ok()?;
    if start_secs < 0.0 {
        return None;
    }
    let end_secs = str_field(ch, "end_time")
        .and_then(|s| s.parse().ok())
        .unwrap_or(start_secs);
    let title = ch
        .get("tags")
        .and_then(|t| t.get("title"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some(Chapter {
        title,
        start_secs,
        end_secs,
    })
}

fn str_field<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|v| v.as_str())
}

/// Map ffprobe's comma-separated `format_name` to one short container name.
pub fn normalize_container(format_name: &str) -> String {
    let f = format_name.trim().to_ascii_lowercase();
    if f.contains("matroska") {
        "mkv".into()
    } else if f.contains("mov") || f.contains("mp4") {
        "mp4".into()
    } else if f.contains("avi") {
        "avi".into()
    } else if f.contains("webm") {
        "webm".into()
    } else if f.contains("mpegts") {
        "ts".into()
    } else {
        f.split(',').next().unwrap_or_default().to_string()
    }
}

fn parse_fraction(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = den.parse().ok()?;
        if d > 0.0 { Some(n / d) } else { None }
    } else {
        s.parse().ok()
    }
}
