//! ffmpeg command-line construction for HLS sessions.

use std::path::Path;

use crate::HwAccel;
use crate::hls::{INIT_SEGMENT_FILE, PLAYLIST_FILE, SegmentFormat};
use crate::preset::{EncodeSettings, TranscodeParams, VideoMode};

/// Keyframe interval shared by every encoder so segments cut on the same boundaries.
const GOP: &str = "48";

/// Build the full ffmpeg argument list for one session.
pub fn build_ffmpeg_args(
    input: &Path,
    output_dir: &Path,
    start_secs: f64,
    params: &TranscodeParams,
    segment_secs: u32,
) -> Vec<String> {
    let mut args = strings(&[
        "-hide_banner",
        "-loglevel",
        "warning",
        "-analyzeduration",
        "20000000",
        "-probesize",
        "10000000",
    ]);

    if let VideoMode::Encode(s) = &params.video {
        push_hw_init(&mut args, s);
    }

    // Seek before -i: fast input seeking.
    if start_secs > 0.0 {
        args.push("-ss".into());
        args.push(format!("{start_secs:.2}"));
    }

    args.push("-i".into());
    args.push(input.to_string_lossy().into_owned());
    args.extend(strings(&["-map", "0:v:0", "-map"]));
    args.push(format!("0:a:{}?", params.audio_track));

    match &params.video {
        VideoMode::Copy { source_codec } => push_copy_args(&mut args, source_codec),
        VideoMode::Encode(s) => {
            args.push("-c:v".into());
            args.push(s.encoder.clone());
            match encode_path(s) {
                EncodePath::VaapiFull => push_vaapi_args(&mut args, s),
                EncodePath::VaapiHybrid => push_hybrid_args(&mut args, s),
                EncodePath::Gpu(hw) => push_gpu_args(&mut args, s, hw),
                EncodePath::Software => push_software_args(&mut args, s),
            }
            args.extend(strings(&["-g", GOP, "-keyint_min", GOP]));
        }
    }

    args.extend(strings(&["-c:a", "aac", "-b:a", "192k", "-ac", "2"]));

    args.extend(strings(&["-f", "hls", "-hls_time"]));
    args.push(segment_secs.to_string());
    args.extend(strings(&["-hls_list_size", "0"]));

    let segment_path = output_dir.join(params.segment_format.segment_pattern());
    if params.segment_format == SegmentFormat::Fmp4 {
        args.extend(strings(&["-hls_segment_type", "fmp4"]));
    }
    args.push("-hls_segment_filename".into());
    args.push(segment_path.to_string_lossy().into_owned());
    if params.segment_format == SegmentFormat::Fmp4 {
        args.push("-hls_fmp4_init_filename".into());
        args.push(INIT_SEGMENT_FILE.into());
    }

    // temp_file: segments are renamed into place only once complete.
    args.extend(strings(&[
        "-hls_flags",
        "independent_segments+temp_file",
        "-hls_playlist_type",
        "event",
        "-hls_init_time",
        "1",
    ]));
    args.push(output_dir.join(PLAYLIST_FILE).to_string_lossy().into_owned());

    args
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodePath {
    /// Decode, scale and encode on the GPU.
    VaapiFull,
    /// CPU decode and scale, upload to the GPU for encoding.
    VaapiHybrid,
    Gpu(HwAccel),
    Software,
}

fn encode_path(s: &EncodeSettings) -> EncodePath {
    let vaapi_encoder = s.encoder.ends_with("_vaapi");
    match (s.hwaccel, s.device.is_some()) {
        (Some(HwAccel::Vaapi), true) if s.gpu_decode => EncodePath::VaapiFull,
        _ if vaapi_encoder && s.device.is_some() => EncodePath::VaapiHybrid,
        (Some(hw), _) if hw != HwAccel::Vaapi => EncodePath::Gpu(hw),
        _ => EncodePath::Software,
    }
}

fn push_hw_init(args: &mut Vec<String>, s: &EncodeSettings) {
    let device = s.device.as_ref().map(|d| d.to_string_lossy().into_owned());
    match (encode_path(s), device) {
        (EncodePath::VaapiFull, Some(dev)) => {
            args.extend(strings(&["-hwaccel", "vaapi", "-hwaccel_device"]));
            args.push(dev);
            args.extend(strings(&["-hwaccel_output_format", "vaapi"]));
        }
        (EncodePath::VaapiHybrid, Some(dev)) => {
            args.push("-init_hw_device".into());
            args.push(format!("vaapi=hw:{dev}"));
            args.extend(strings(&["-filter_hw_device", "hw"]));
        }
        (EncodePath::Gpu(hw), _) if s.gpu_decode => {
            args.push("-hwaccel".into());
            args.push(hw.decode_flag().into());
        }
        _ => {}
    }
}

fn push_copy_args(args: &mut Vec<String>, source_codec: &str) {
    args.extend(strings(&[
        "-c:v",
        "copy",
        "-avoid_negative_ts",
        "make_zero",
        "-fflags",
        "+genpts+igndts",
        "-max_interleave_delta",
        "0",
        // Rebase timestamps to zero at the packet level; -output_ts_offset is ignored in copy mode.
        "-bsf:v",
        "setts=pts=PTS-STARTPTS:dts=DTS-STARTPTS",
        "-af",
        "aresample=async=1",
    ]));
    // MSE needs explicit sample entry tags in fMP4.
    match source_codec {
        "hevc" => args.extend(strings(&["-tag:v", "hvc1"])),
        "h264" => args.extend(strings(&["-tag:v", "avc1"])),
        _ => {}
    }
}

fn push_vaapi_args(args: &mut Vec<String>, s: &EncodeSettings) {
    args.push("-vf".into());
    args.push(match s.height {
        Some(h) => format!("scale_vaapi=w=-2:h={h}:format=nv12"),
        None => "scale_vaapi=format=nv12".into(),
    });
    push_qp_rate(args, s);
}

fn push_hybrid_args(args: &mut Vec<String>, s: &EncodeSettings) {
    args.push("-vf".into());
    args.push(match s.height {
        Some(h) => format!("scale=-2:{h},format=nv12,hwupload"),
        None => "format=nv12,hwupload".into(),
    });
    push_qp_rate(args, s);
}

/// VAAPI rate control: QP via -global_quality, capped by maxrate.
fn push_qp_rate(args: &mut Vec<String>, s: &EncodeSettings) {
    args.push("-global_quality".into());
    args.push(s.crf.to_string());
    push_rate_cap(args, s);
    if s.codec == crate::codec::Codec::Hevc {
        args.extend(strings(&["-tag:v", "hvc1"]));
    }
}

fn push_gpu_args(args: &mut Vec<String>, s: &EncodeSettings, hw: HwAccel) {
    push_scale(args, s);
    match hw {
        HwAccel::Nvenc => {
            args.extend(strings(&["-preset", "p4", "-rc", "vbr", "-cq"]));
            args.push(s.crf.to_string());
        }
        HwAccel::Qsv => {
            args.push("-global_quality".into());
            args.push(s.crf.to_string());
        }
        HwAccel::VideoToolbox => {
            args.push("-b:v".into());
            args.push(s.max_bitrate.clone());
        }
        HwAccel::Vaapi => {}
    }
    push_rate_cap(args, s);
    args.extend(strings(&["-pix_fmt", "yuv420p"]));
    if s.codec == crate::codec::Codec::Hevc {
        args.extend(strings(&["-tag:v", "hvc1"]));
    }
}

fn push_software_args(args: &mut Vec<String>, s: &EncodeSettings) {
    push_scale(args, s);
    let crf = s.crf.to_string();
    match s.encoder.as_str() {
        "libx264" => {
            args.extend(strings(&["-preset", "veryfast", "-crf", crf.as_str()]));
            push_rate_cap(args, s);
            args.extend(strings(&["-pix_fmt", "yuv420p"]));
        }
        "libx265" => {
            args.extend(strings(&["-preset", "fast", "-crf", crf.as_str()]));
            push_rate_cap(args, s);
            args.extend(strings(&["-pix_fmt", "yuv420p", "-tag:v", "hvc1"]));
        }
        "libsvtav1" => {
            args.extend(strings(&["-preset", "8", "-crf", crf.as_str()]));
            push_rate_cap(args, s);
            args.extend(strings(&["-pix_fmt", "yuv420p"]));
        }
        // Constrained quality: CRF is the floor, -b:v the ceiling.
        "libvpx-vp9" => {
            args.extend(strings(&["-cpu-used", "4", "-crf", crf.as_str(), "-b:v"]));
            args.push(s.max_bitrate.clone());
            push_rate_cap(args, s);
            args.extend(strings(&["-pix_fmt", "yuv420p", "-row-mt", "1"]));
        }
        _ => {
            args.extend(strings(&["-crf", crf.as_str()]));
            push_rate_cap(args, s);
        }
    }
}

fn push_scale(args: &mut Vec<String>, s: &EncodeSettings) {
    if let Some(h) = s.height {
        args.push("-vf".into());
        args.push(format!("scale=-2:{h}"));
    }
}

fn push_rate_cap(args: &mut Vec<String>, s: &EncodeSettings) {
    args.push("-maxrate".into());
    args.push(s.max_bitrate.clone());
    args.push("-bufsize".into());
    args.push(s.buf_size.clone());
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
