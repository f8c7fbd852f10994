//! Quality presets offered for a file, and the transcode parameters behind each one.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::HwAccel;
use crate::codec::{ClientCodecs, Codec, NegotiatedCodec, normalize_audio_codec, normalize_video_codec};
use crate::ffprobe::MediaInfo;
use crate::hls::SegmentFormat;

pub const PASSTHROUGH: &str = "passthrough";
pub const ORIGINAL: &str = "original";

/// Standard resolution tiers, ascending.
const TIERS: [(u32, &str); 4] = [(720, "720p"), (1080, "1080p"), (1440, "1440p"), (2160, "4K")];

/// Audio is always re-encoded to AAC: it plays everywhere and muxes into both segment formats.
const OUTPUT_AUDIO: &str = "aac";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Transcode,
    Passthrough,
    Original,
}

/// One entry in the quality selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPreset {
    pub value: String,
    pub label: String,
    pub desc: String,
    pub kind: PresetKind,
    /// Target resolution; absent for passthrough and original.
    pub height: Option<u32>,
    pub crf: Option<u32>,
    pub max_bitrate: Option<String>,
    pub buf_size: Option<String>,
    pub target_bitrate_bps: Option<u64>,
    pub video_codec: String,
    pub audio_codec: String,
    pub can_original: bool,
    pub can_original_video: bool,
    pub can_original_audio: bool,
}

impl QualityPreset {
    /// Whether this preset can actually be played for the file it was resolved against.
    pub fn is_viable(&self) -> bool {
        match self.kind {
            PresetKind::Transcode => true,
            PresetKind::Passthrough => self.can_original_video,
            PresetKind::Original => self.can_original,
        }
    }
}

/// What the client can take from the file as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirectPlay {
    video: bool,
    audio: bool,
    original: bool,
}

impl DirectPlay {
    const NONE: Self = Self {
        video: false,
        audio: false,
        original: false,
    };

    /// `audio_track` is the audio-relative index the player will hear.
    fn evaluate(media: &MediaInfo, client: &ClientCodecs, audio_track: u32) -> Self {
        let video = media.video.as_ref().is_some_and(|v| {
            // 10-bit H.264 is not decodable through MSE in any browser.
            let ten_bit_avc = normalize_video_codec(&v.codec) == "h264" && v.is_10bit();
            client.can_decode_video(&v.codec) && !ten_bit_avc
        });
        let audio = match media.audio_track(audio_track) {
            Some(a) => client.can_play_audio(&a.codec),
            None => media.audio.is_empty(),
        };
        // Browsers only direct-play MP4/MOV and WebM; MKV never.
        let container = matches!(media.container.as_str(), "mp4" | "webm");
        Self {
            video,
            audio,
            original: video && audio && container,
        }
    }
}

/// Produce the ordered preset list: transcode tiers ascending, then passthrough, then original.
///
/// Pure: works only from the probe result (if any), the negotiated codec and the
/// selected audio track.
pub fn resolve(
    media: Option<&MediaInfo>,
    negotiated: &NegotiatedCodec,
    client: &ClientCodecs,
    audio_track: u32,
) -> Vec<QualityPreset> {
    let codec = negotiated.codec;
    let src_height = media
        .and_then(|m| m.video.as_ref())
        .map(|v| v.height)
        .unwrap_or(0);

    let (mut presets, direct, src_bitrate) = match media {
        Some(m) if src_height > 0 => {
            let src_bitrate = source_bitrate(m);
            (
                source_tiers(codec, src_height, src_bitrate),
                DirectPlay::evaluate(m, client, audio_track),
                src_bitrate,
            )
        }
        _ => (default_tiers(codec), DirectPlay::NONE, None),
    };

    let src_video = media
        .and_then(|m| m.video.as_ref())
        .map(|v| normalize_video_codec(&v.codec))
        .unwrap_or_default();
    let src_audio = media
        .and_then(|m| m.audio_track(audio_track))
        .map(|a| normalize_audio_codec(&a.codec))
        .unwrap_or_default();

    let (pt_label, pt_desc) = match (direct.audio, src_bitrate) {
        (true, Some(b)) => ("Original (Remux)", format!("{} remuxed", format_bitrate_human(b))),
        (true, None) => ("Original (Remux)", "Video direct, remuxed".to_string()),
        (false, Some(b)) => (
            "Original (AAC)",
            format!("{} video + AAC audio", format_bitrate_human(b)),
        ),
        (false, None) => ("Original (AAC)", "Video direct, audio AAC".to_string()),
    };

    presets.push(QualityPreset {
        value: PASSTHROUGH.into(),
        label: pt_label.into(),
        desc: pt_desc,
        kind: PresetKind::Passthrough,
        height: None,
        crf: None,
        max_bitrate: None,
        buf_size: None,
        target_bitrate_bps: None,
        video_codec: src_video.clone(),
        audio_codec: OUTPUT_AUDIO.into(),
        can_original: false,
        can_original_video: direct.video,
        can_original_audio: direct.audio,
    });

    presets.push(QualityPreset {
        value: ORIGINAL.into(),
        label: "Original".into(),
        desc: match src_bitrate {
            Some(b) => format!("{} direct", format_bitrate_human(b)),
            None => "Direct play".into(),
        },
        kind: PresetKind::Original,
        height: None,
        crf: None,
        max_bitrate: None,
        buf_size: None,
        target_bitrate_bps: None,
        video_codec: src_video,
        audio_codec: src_audio,
        can_original: direct.original,
        can_original_video: direct.video,
        can_original_audio: direct.audio,
    });

    presets
}

/// Pick the preset to play.
///
/// The preferred preset wins if it is still viable; otherwise passthrough, then the
/// highest transcode tier, then original as a last resort.
pub fn select<'a>(presets: &'a [QualityPreset], preferred: Option<&str>) -> Option<&'a QualityPreset> {
    if let Some(p) = preferred.and_then(|v| presets.iter().find(|p| p.value.eq_ignore_ascii_case(v)))
    {
        if p.is_viable() {
            return Some(p);
        }
    }
    presets
        .iter()
        .find(|p| p.kind == PresetKind::Passthrough && p.is_viable())
        .or_else(|| {
            presets
                .iter()
                .filter(|p| p.kind == PresetKind::Transcode)
                .max_by_key(|p| p.height.unwrap_or(0))
        })
        .or_else(|| presets.iter().find(|p| p.kind == PresetKind::Original))
}

fn source_tiers(codec: Codec, src_height: u32, src_bitrate: Option<f64>) -> Vec<QualityPreset> {
    let mut out: Vec<QualityPreset> = TIERS
        .iter()
        .filter(|(h, _)| *h < src_height)
        .map(|&(h, label)| {
            let max = compute_max_bitrate(src_bitrate, src_height, h) * codec.bitrate_ratio();
            tier_preset(codec, label, h, max)
        })
        .collect();

    // Same-resolution tier, for sources the client cannot decode natively.
    let label = TIERS
        .iter()
        .find(|(h, _)| *h == src_height)
        .map(|(_, l)| l.to_string())
        .unwrap_or_else(|| format!("{src_height}p"));
    let max = compute_max_bitrate(src_bitrate, src_height, src_height) * codec.bitrate_ratio();
    out.push(tier_preset(codec, &label, src_height, max));
    out
}

/// Used when probing failed: conservative 720p/1080p at fixed bitrates.
fn default_tiers(codec: Codec) -> Vec<QualityPreset> {
    let ratio = codec.bitrate_ratio();
    vec![
        tier_preset(codec, "720p", 720, 10_000_000.0 * ratio),
        tier_preset(codec, "1080p", 1080, 20_000_000.0 * ratio),
    ]
}

fn tier_preset(codec: Codec, label: &str, height: u32, max_bitrate: f64) -> QualityPreset {
    QualityPreset {
        value: label.to_ascii_lowercase(),
        label: label.into(),
        desc: format!("~{}", format_bitrate_human(max_bitrate)),
        kind: PresetKind::Transcode,
        height: Some(height),
        crf: Some(codec.crf(tier_for_height(height))),
        max_bitrate: Some(format_bitrate_m(max_bitrate)),
        buf_size: Some(format_bitrate_m(max_bitrate * 2.0)),
        target_bitrate_bps: Some(max_bitrate.round() as u64),
        video_codec: codec.as_str().into(),
        audio_codec: OUTPUT_AUDIO.into(),
        can_original: false,
        can_original_video: false,
        can_original_audio: false,
    }
}

/// Largest standard tier at or below `height` (720 for anything smaller).
fn tier_for_height(height: u32) -> u32 {
    TIERS
        .iter()
        .rev()
        .map(|(h, _)| *h)
        .find(|h| height >= *h)
        .unwrap_or(720)
}

fn source_bitrate(media: &MediaInfo) -> Option<f64> {
    if let Some(bps) = media.source_bitrate_bps().filter(|b| *b > 0) {
        return Some(bps as f64);
    }
    match media.size_bytes {
        Some(size) if size > 0 && media.duration_secs > 0.0 => {
            Some(size as f64 * 8.0 / media.duration_secs)
        }
        _ => None,
    }
}

/// H.264-equivalent max bitrate for a target height; callers scale by codec efficiency.
///
/// Scales the source bitrate by pixel area with 1.5x headroom, caps at 95% of the
/// source (150% at the source resolution), floors per tier, rounds to 0.5 Mbit.
pub fn compute_max_bitrate(src_bitrate: Option<f64>, src_height: u32, target_height: u32) -> f64 {
    let src = match src_bitrate {
        Some(b) if b > 0.0 && src_height > 0 => b,
        _ => {
            return match target_height {
                0..=720 => 10_000_000.0,
                721..=1080 => 20_000_000.0,
                1081..=1440 => 35_000_000.0,
                _ => 50_000_000.0,
            };
        }
    };

    let area_ratio = f64::from(target_height).powi(2) / f64::from(src_height).powi(2);
    let mut estimated = src * area_ratio * 1.5;

    let cap = if target_height >= src_height {
        src * 1.5
    } else {
        src * 0.95
    };
    estimated = estimated.min(cap);

    let floor = if target_height < 720 {
        1_500_000.0
    } else {
        match tier_for_height(target_height) {
            720 => 4_000_000.0,
            1080 => 8_000_000.0,
            1440 => 15_000_000.0,
            _ => 25_000_000.0,
        }
    };
    estimated = estimated.max(floor);

    (estimated / 500_000.0).round() * 500_000.0
}

/// ffmpeg rate string: whole megabits rounded up (`12M`), or kilobits below 1 Mbit.
fn format_bitrate_m(bps: f64) -> String {
    let mbps = bps / 1_000_000.0;
    if mbps >= 1.0 {
        format!("{:.0}M", mbps.ceil())
    } else {
        format!("{:.0}k", bps / 1000.0)
    }
}

fn format_bitrate_human(bps: f64) -> String {
    let mbps = bps / 1_000_000.0;
    if mbps >= 1.0 {
        if mbps.fract() == 0.0 {
            format!("{mbps:.0} Mbps")
        } else {
            format!("{mbps:.1} Mbps")
        }
    } else {
        format!("{:.0} kbps", bps / 1000.0)
    }
}

// ---------------------------------------------------------------------------
// Transcode parameters
// ---------------------------------------------------------------------------

/// Everything needed to build an ffmpeg command line for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscodeParams {
    pub label: String,
    pub video: VideoMode,
    /// Audio-only stream index (`0:a:N`).
    pub audio_track: u32,
    pub segment_format: SegmentFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VideoMode {
    /// Re-mux the source video untouched.
    Copy { source_codec: String },
    Encode(EncodeSettings),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeSettings {
    pub codec: Codec,
    pub encoder: String,
    pub hwaccel: Option<HwAccel>,
    pub device: Option<PathBuf>,
    /// Decode on the GPU as well as encode. Cleared for hybrid mode.
    pub gpu_decode: bool,
    pub height: Option<u32>,
    pub crf: u32,
    pub max_bitrate: String,
    pub buf_size: String,
}

impl EncodeSettings {
    pub fn is_hardware(&self) -> bool {
        self.hwaccel.is_some() || self.encoder.ends_with("_vaapi")
    }
}

impl TranscodeParams {
    pub fn encode_settings(&self) -> Option<&EncodeSettings> {
        match &self.video {
            VideoMode::Encode(s) => Some(s),
            VideoMode::Copy { .. } => None,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.encode_settings().is_some_and(|s| s.is_hardware())
    }

    /// Encoder name for logs and the admin view.
    pub fn encoder_name(&self) -> &str {
        match &self.video {
            VideoMode::Copy { .. } => "copy",
            VideoMode::Encode(s) => &s.encoder,
        }
    }

    /// Downgrade the encode path after a hardware failure.
    pub fn with_fallback(mut self, fallback: EncoderFallback) -> Self {
        if let VideoMode::Encode(s) = &mut self.video {
            match fallback {
                EncoderFallback::Hybrid => {
                    s.gpu_decode = false;
                }
                EncoderFallback::Software => {
                    s.encoder = s.codec.software_encoder().to_string();
                    s.hwaccel = None;
                    s.device = None;
                    s.gpu_decode = false;
                }
            }
        }
        self
    }

    /// The next, more conservative encode path after this one failed, if any remains.
    pub fn next_fallback(&self) -> Option<EncoderFallback> {
        let s = self.encode_settings()?;
        if !s.is_hardware() {
            None
        } else if s.gpu_decode && s.hwaccel == Some(HwAccel::Vaapi) && s.device.is_some() {
            Some(EncoderFallback::Hybrid)
        } else {
            Some(EncoderFallback::Software)
        }
    }
}

/// Remembered downgrade for a fingerprint whose hardware session failed fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFallback {
    /// CPU decode, GPU encode.
    Hybrid,
    Software,
}

/// Resolve a preset into concrete transcode parameters. `None` for original (direct play).
pub fn transcode_params(
    preset: &QualityPreset,
    negotiated: &NegotiatedCodec,
    audio_track: u32,
) -> Option<TranscodeParams> {
    match preset.kind {
        PresetKind::Original => None,
        // MKV to MPEG-TS remux breaks on negative DTS; fMP4 handles it.
        PresetKind::Passthrough => Some(TranscodeParams {
            label: preset.label.clone(),
            video: VideoMode::Copy {
                source_codec: preset.video_codec.clone(),
            },
            audio_track,
            segment_format: SegmentFormat::Fmp4,
        }),
        PresetKind::Transcode => {
            let codec = negotiated.codec;
            let height = preset.height;
            Some(TranscodeParams {
                label: preset.label.clone(),
                video: VideoMode::Encode(EncodeSettings {
                    codec,
                    encoder: negotiated.encoder.clone(),
                    hwaccel: negotiated.hwaccel,
                    device: negotiated.device.clone(),
                    gpu_decode: negotiated.hwaccel.is_some(),
                    height,
                    crf: preset
                        .crf
                        .unwrap_or_else(|| codec.crf(tier_for_height(height.unwrap_or(1080)))),
                    max_bitrate: preset.max_bitrate.clone().unwrap_or_else(|| "20M".into()),
                    buf_size: preset.buf_size.clone().unwrap_or_else(|| "40M".into()),
                }),
                audio_track,
                segment_format: codec.segment_format(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffprobe::{AudioStream, VideoStream};

    fn media(container: &str, video_codec: &str, height: u32, audio_codec: &str) -> MediaInfo {
        MediaInfo {
            container: container.into(),
            duration_secs: 3600.0,
            size_bytes: None,
            bitrate_kbps: Some(20_000),
            video: Some(VideoStream {
                index: 0,
                codec: video_codec.into(),
                width: height * 16 / 9,
                height,
                pix_fmt: Some("yuv420p".into()),
                bitrate_kbps: None,
                framerate: Some(24.0),
            }),
            audio: vec![AudioStream {
                index: 1,
                stream_index: 0,
                codec: audio_codec.into(),
                channels: 2,
                channel_layout: None,
                language: None,
                title: None,
                is_default: true,
            }],
            subtitles: vec![],
            chapters: vec![],
        }
    }

    fn h264_client() -> ClientCodecs {
        ClientCodecs {
            aac: true,
            ..ClientCodecs::default()
        }
    }

    fn values(presets: &[QualityPreset]) -> Vec<&str> {
        presets.iter().map(|p| p.value.as_str()).collect()
    }

    fn find<'a>(presets: &'a [QualityPreset], value: &str) -> &'a QualityPreset {
        presets.iter().find(|p| p.value == value).unwrap()
    }

    #[test]
    fn tiers_below_source_plus_same_resolution() {
        let m = media("mkv", "h264", 2160, "aac");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        assert_eq!(
            values(&presets),
            vec!["720p", "1080p", "1440p", "4k", "passthrough", "original"]
        );
        let p720 = find(&presets, "720p");
        assert_eq!(p720.crf, Some(17));
        assert_eq!(p720.height, Some(720));
        assert!(p720.max_bitrate.is_some());
        assert!(p720.is_viable());
    }

    #[test]
    fn odd_source_height_gets_its_own_label() {
        let m = media("mp4", "h264", 1608, "aac");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        assert_eq!(
            values(&presets),
            vec!["720p", "1080p", "1440p", "1608p", "passthrough", "original"]
        );
    }

    #[test]
    fn undecodable_video_with_fine_audio() {
        let m = media("mp4", "hevc", 1080, "aac");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        let original = find(&presets, ORIGINAL);
        assert!(!original.can_original);
        assert!(original.can_original_audio);
        assert!(!original.can_original_video);
        assert!(!original.is_viable());

        let pt = find(&presets, PASSTHROUGH);
        assert!(!pt.is_viable());

        // Fallback order from the flags alone: passthrough is out, so the highest tier.
        let chosen = select(&presets, Some(ORIGINAL)).unwrap();
        assert_eq!(chosen.value, "1080p");
    }

    #[test]
    fn mkv_with_decodable_video_falls_back_to_passthrough() {
        let m = media("mkv", "h264", 1080, "aac");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        let original = find(&presets, ORIGINAL);
        assert!(original.can_original_video && original.can_original_audio);
        assert!(!original.can_original);

        let chosen = select(&presets, Some(ORIGINAL)).unwrap();
        assert_eq!(chosen.value, PASSTHROUGH);
        assert_eq!(chosen.label, "Original (Remux)");
    }

    #[test]
    fn mp4_h264_aac_plays_original() {
        let m = media("mp4", "h264", 1080, "aac");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        assert!(find(&presets, ORIGINAL).can_original);
        assert_eq!(select(&presets, Some("original")).unwrap().kind, PresetKind::Original);
        assert_eq!(select(&presets, Some("720p")).unwrap().value, "720p");
    }

    #[test]
    fn ten_bit_h264_is_never_direct() {
        let mut m = media("mp4", "h264", 1080, "aac");
        if let Some(v) = m.video.as_mut() {
            v.pix_fmt = Some("yuv420p10le".into());
        }
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        assert!(!find(&presets, ORIGINAL).can_original_video);
        assert!(!find(&presets, PASSTHROUGH).is_viable());
    }

    #[test]
    fn dts_audio_blocks_original_but_not_passthrough() {
        let m = media("mp4", "h264", 1080, "dts");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        let pt = find(&presets, PASSTHROUGH);
        assert!(pt.is_viable());
        assert!(!pt.can_original_audio);
        assert_eq!(pt.label, "Original (AAC)");
        assert!(!find(&presets, ORIGINAL).can_original);
    }

    #[test]
    fn no_probe_data_gives_defaults() {
        let presets = resolve(None, &NegotiatedCodec::software(Codec::Hevc), &h264_client(), 0);
        assert_eq!(values(&presets), vec!["720p", "1080p", "passthrough", "original"]);
        assert_eq!(find(&presets, "720p").max_bitrate.as_deref(), Some("7M"));
        assert_eq!(find(&presets, "1080p").max_bitrate.as_deref(), Some("13M"));
        assert_eq!(find(&presets, "720p").crf, Some(22));
        assert!(!find(&presets, PASSTHROUGH).is_viable());
        assert!(!find(&presets, ORIGINAL).is_viable());
        assert_eq!(select(&presets, None).unwrap().value, "1080p");
    }

    #[test]
    fn select_falls_through_to_original_without_tiers() {
        let presets = vec![QualityPreset {
            value: ORIGINAL.into(),
            label: "Original".into(),
            desc: String::new(),
            kind: PresetKind::Original,
            height: None,
            crf: None,
            max_bitrate: None,
            buf_size: None,
            target_bitrate_bps: None,
            video_codec: String::new(),
            audio_codec: String::new(),
            can_original: false,
            can_original_video: false,
            can_original_audio: false,
        }];
        assert_eq!(select(&presets, Some("720p")).unwrap().value, ORIGINAL);
    }

    #[test]
    fn max_bitrate_scaling() {
        // 20 Mbit 4K source down to 1080p: 20M * 0.25 * 1.5 = 7.5M, floored to 8M.
        assert_eq!(compute_max_bitrate(Some(20_000_000.0), 2160, 1080), 8_000_000.0);
        // 40 Mbit 1080p source down to 720p: 40M * 0.444 * 1.5 = 26.67M -> 26.5M.
        assert_eq!(compute_max_bitrate(Some(40_000_000.0), 1080, 720), 26_500_000.0);
        // Capped at 95% of a low-bitrate source, then floored.
        assert_eq!(compute_max_bitrate(Some(3_000_000.0), 1080, 720), 4_000_000.0);
        assert_eq!(compute_max_bitrate(None, 0, 1440), 35_000_000.0);
        assert_eq!(format_bitrate_m(6_500_000.0), "7M");
        assert_eq!(format_bitrate_m(800_000.0), "800k");
        assert_eq!(format_bitrate_human(6_500_000.0), "6.5 Mbps");
    }

    #[test]
    fn direct_audio_follows_selected_track() {
        let mut m = media("mp4", "h264", 1080, "aac");
        m.audio.push(AudioStream {
            index: 2,
            stream_index: 1,
            codec: "dts".into(),
            channels: 6,
            channel_layout: Some("5.1".into()),
            language: Some("jpn".into()),
            title: None,
            is_default: false,
        });

        let first = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        assert!(find(&first, ORIGINAL).can_original);
        assert!(find(&first, PASSTHROUGH).can_original_audio);

        let second = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 1);
        let original = find(&second, ORIGINAL);
        assert!(!original.can_original);
        assert!(!original.can_original_audio);
        assert_eq!(original.audio_codec, "dts");
        assert_eq!(find(&second, PASSTHROUGH).label, "Original (AAC)");
    }

    #[test]
    fn passthrough_params_always_fmp4() {
        let m = media("mkv", "h264", 1080, "aac");
        let presets = resolve(Some(&m), &NegotiatedCodec::software_baseline(), &h264_client(), 0);
        let params = transcode_params(find(&presets, PASSTHROUGH), &NegotiatedCodec::software_baseline(), 1)
            .unwrap();
        assert_eq!(params.segment_format, SegmentFormat::Fmp4);
        assert_eq!(params.audio_track, 1);
        assert_eq!(
            params.video,
            VideoMode::Copy {
                source_codec: "h264".into()
            }
        );
        assert!(transcode_params(find(&presets, ORIGINAL), &NegotiatedCodec::software_baseline(), 0).is_none());
    }

    #[test]
    fn hardware_fallback_chain() {
        let negotiated = NegotiatedCodec {
            codec: Codec::Hevc,
            encoder: "hevc_vaapi".into(),
            hwaccel: Some(HwAccel::Vaapi),
            device: Some(PathBuf::from("/dev/dri/renderD128")),
        };
        let m = media("mkv", "h264", 1080, "aac");
        let presets = resolve(Some(&m), &negotiated, &h264_client(), 0);
        let params = transcode_params(find(&presets, "720p"), &negotiated, 0).unwrap();
        assert_eq!(params.segment_format, SegmentFormat::Fmp4);
        assert_eq!(params.next_fallback(), Some(EncoderFallback::Hybrid));

        let hybrid = params.clone().with_fallback(EncoderFallback::Hybrid);
        assert_eq!(hybrid.encoder_name(), "hevc_vaapi");
        assert!(hybrid.is_hardware());
        assert_eq!(hybrid.next_fallback(), Some(EncoderFallback::Software));

        let sw = hybrid.with_fallback(EncoderFallback::Software);
        assert_eq!(sw.encoder_name(), "libx265");
        assert!(!sw.is_hardware());
        assert_eq!(sw.next_fallback(), None);
    }
}
