//! Codec naming and client/server codec negotiation.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HwAccel;
use crate::gpu::HardwareCapabilities;
use crate::hls::SegmentFormat;

/// Video codec families the server can encode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    Hevc,
    Av1,
    Vp9,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Av1 => "av1",
            Self::Vp9 => "vp9",
        }
    }

    /// Software encoder used when no hardware path is available for this codec.
    pub fn software_encoder(self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Av1 => "libsvtav1",
            Self::Vp9 => "libvpx-vp9",
        }
    }

    /// H.264 goes into MPEG-TS; everything newer needs fragmented MP4.
    pub fn segment_format(self) -> SegmentFormat {
        match self {
            Self::H264 => SegmentFormat::MpegTs,
            _ => SegmentFormat::Fmp4,
        }
    }

    /// Bitrate needed relative to H.264 for similar quality.
    pub fn bitrate_ratio(self) -> f64 {
        match self {
            Self::H264 => 1.0,
            Self::Hevc | Self::Vp9 => 0.65,
            Self::Av1 => 0.5,
        }
    }

    /// CRF (or QP for VAAPI) at a standard tier height.
    pub fn crf(self, tier_height: u32) -> u32 {
        let table: [u32; 4] = match self {
            Self::H264 => [17, 16, 15, 15],
            Self::Hevc => [22, 21, 20, 20],
            Self::Av1 => [30, 28, 27, 27],
            Self::Vp9 => [25, 23, 22, 22],
        };
        match tier_height {
            0..=720 => table[0],
            721..=1080 => table[1],
            1081..=1440 => table[2],
            _ => table[3],
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_video_codec(s).as_str() {
            "h264" => Ok(Self::H264),
            "hevc" => Ok(Self::Hevc),
            "av1" => Ok(Self::Av1),
            "vp9" => Ok(Self::Vp9),
            other => Err(format!("unsupported codec: {other}")),
        }
    }
}

/// Map ffprobe/browser video codec aliases to canonical names.
pub fn normalize_video_codec(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "h264" | "avc" | "avc1" => "h264".into(),
        "hevc" | "h265" | "hev1" | "hvc1" => "hevc".into(),
        "av1" | "av01" => "av1".into(),
        "vp9" | "vp09" => "vp9".into(),
        "mpeg4" | "mp4v" => "mpeg4".into(),
        _ => lower,
    }
}

/// Map ffprobe audio codec names to canonical names.
pub fn normalize_audio_codec(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "aac" | "mp4a" => "aac".into(),
        "mp3" | "mp3float" => "mp3".into(),
        "ac3" | "eac3" => "ac3".into(),
        "dts" | "dts-hd" | "truehd" => "dts".into(),
        "pcm_s16le" | "pcm_s24le" | "pcm_s32le" | "pcm_f32le" => "pcm".into(),
        _ => lower,
    }
}

/// Codecs the requesting browser reports it can decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCodecs {
    pub h264: bool,
    pub hevc: bool,
    pub av1: bool,
    pub vp9: bool,
    pub aac: bool,
    pub opus: bool,
    pub flac: bool,
    pub ac3: bool,
}

impl Default for ClientCodecs {
    /// Every browser that can play HLS at all decodes H.264.
    fn default() -> Self {
        Self {
            h264: true,
            hevc: false,
            av1: false,
            vp9: false,
            aac: false,
            opus: false,
            flac: false,
            ac3: false,
        }
    }
}

impl ClientCodecs {
    pub fn supports(&self, codec: Codec) -> bool {
        match codec {
            Codec::H264 => self.h264,
            Codec::Hevc => self.hevc,
            Codec::Av1 => self.av1,
            Codec::Vp9 => self.vp9,
        }
    }

    /// Whether the client can decode a video stream with this ffprobe codec name.
    pub fn can_decode_video(&self, codec_name: &str) -> bool {
        codec_name
            .parse::<Codec>()
            .map(|c| self.supports(c))
            .unwrap_or(false)
    }

    /// Whether the client can play an audio stream natively inside HLS segments.
    pub fn can_play_audio(&self, codec_name: &str) -> bool {
        match normalize_audio_codec(codec_name).as_str() {
            "aac" => self.aac,
            "opus" => self.opus,
            "ac3" => self.ac3,
            "mp3" => true,
            // FLAC inside fMP4/TS is unreliable in MSE players even when reported.
            "flac" => false,
            _ => false,
        }
    }
}

/// The (codec, encoder, hwaccel) triple chosen for one browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedCodec {
    pub codec: Codec,
    pub encoder: String,
    pub hwaccel: Option<HwAccel>,
    pub device: Option<PathBuf>,
}

impl NegotiatedCodec {
    /// libx264: the universal baseline every client accepts.
    pub fn software_baseline() -> Self {
        Self::software(Codec::H264)
    }

    pub fn software(codec: Codec) -> Self {
        Self {
            codec,
            encoder: codec.software_encoder().to_string(),
            hwaccel: None,
            device: None,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.hwaccel.is_some()
    }
}

/// Pick the first server encoder, in preference order, whose codec the client accepts.
/// Falls back to software H.264 when nothing matches.
pub fn negotiate(caps: &HardwareCapabilities, client: &ClientCodecs) -> NegotiatedCodec {
    caps.encoders
        .iter()
        .find(|e| client.supports(e.codec))
        .map(|e| e.to_negotiated())
        .unwrap_or_else(NegotiatedCodec::software_baseline)
}

/// Best encoder for a codec the client already settled on.
pub fn encoder_for_codec(caps: &HardwareCapabilities, codec: Codec) -> NegotiatedCodec {
    caps.encoders
        .iter()
        .find(|e| e.codec == codec)
        .map(|e| e.to_negotiated())
        .unwrap_or_else(|| NegotiatedCodec::software(codec))
}
