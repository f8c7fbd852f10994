//! GPU hardware acceleration detection.
//!
//! Probes for available encoders by running `ffmpeg -encoders`, then confirms each
//! hardware candidate with a one-frame test encode. Run once at startup; the result
//! is shared read-only for the life of the process.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::HwAccel;
use crate::codec::{Codec, NegotiatedCodec};

/// Render nodes checked for VAAPI, in order.
const RENDER_NODES: [&str; 2] = ["/dev/dri/renderD128", "/dev/dri/renderD129"];

/// Hardware backends in probe order. The first one with a working encoder wins.
const HW_BACKENDS: [HwAccel; 4] = [
    HwAccel::Vaapi,
    HwAccel::Nvenc,
    HwAccel::Qsv,
    HwAccel::VideoToolbox,
];

/// Upper bound on any single probe command. A wedged driver must not stall startup.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Codecs tried per backend, best compression first.
const HW_CODEC_ORDER: [Codec; 3] = [Codec::Av1, Codec::Hevc, Codec::H264];

/// One usable encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderInfo {
    pub codec: Codec,
    pub encoder: String,
    pub hwaccel: Option<HwAccel>,
    pub device: Option<PathBuf>,
}

impl EncoderInfo {
    pub fn hardware(
        codec: Codec,
        encoder: impl Into<String>,
        hwaccel: HwAccel,
        device: Option<PathBuf>,
    ) -> Self {
        Self {
            codec,
            encoder: encoder.into(),
            hwaccel: Some(hwaccel),
            device,
        }
    }

    pub fn to_negotiated(&self) -> NegotiatedCodec {
        NegotiatedCodec {
            codec: self.codec,
            encoder: self.encoder.clone(),
            hwaccel: self.hwaccel,
            device: self.device.clone(),
        }
    }
}

/// Detected hardware capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareCapabilities {
    /// `None` when everything is encoded on the CPU.
    pub hwaccel: Option<HwAccel>,
    pub device: Option<PathBuf>,
    /// Verified hardware encoders in preference order. Empty on CPU-only hosts;
    /// software encoders are never listed here.
    pub encoders: Vec<EncoderInfo>,
    /// Whether GPU decoding was verified (VAAPI only).
    pub can_decode: bool,
}

impl HardwareCapabilities {
    /// No acceleration and no known encoders. Negotiation falls back to libx264.
    pub fn none() -> Self {
        Self {
            hwaccel: None,
            device: None,
            encoders: Vec::new(),
            can_decode: false,
        }
    }

    /// Combine probe results into the preference-ordered encoder list.
    ///
    /// `working_hw` holds hardware encoder names that passed a test encode on `backend`.
    pub fn assemble(
        backend: Option<HwAccel>,
        device: Option<PathBuf>,
        working_hw: &[String],
        can_decode: bool,
    ) -> Self {
        let mut encoders = Vec::new();

        if let Some(hw) = backend {
            for codec in HW_CODEC_ORDER {
                let name = hw_encoder_name(codec, hw);
                if working_hw.contains(&name) {
                    let dev = if hw == HwAccel::Vaapi {
                        device.clone()
                    } else {
                        None
                    };
                    encoders.push(EncoderInfo::hardware(codec, name, hw, dev));
                }
            }
        }

        let hw_found = !encoders.is_empty();
        Self {
            hwaccel: if hw_found { backend } else { None },
            device: if hw_found { device } else { None },
            encoders,
            can_decode: hw_found && can_decode,
        }
    }
}

/// ffmpeg's name for a hardware encoder, e.g. `hevc_vaapi`.
pub fn hw_encoder_name(codec: Codec, hw: HwAccel) -> String {
    format!("{}_{}", codec.as_str(), hw.as_str())
}

/// Detect available hardware encoders by querying ffmpeg.
///
/// Never fails: any probe error degrades to software-only capabilities.
pub async fn detect(ffmpeg_path: &Path) -> HardwareCapabilities {
    let listed = match get_encoders(ffmpeg_path).await {
        Ok(s) => parse_encoder_list(&s),
        Err(e) => {
            info!(error = %e, "could not query ffmpeg encoders, assuming CPU-only");
            return HardwareCapabilities::none();
        }
    };

    let device = find_render_device();
    let mut backend = None;
    let mut working = Vec::new();

    for hw in HW_BACKENDS {
        if hw == HwAccel::Vaapi && device.is_none() {
            continue;
        }
        for codec in HW_CODEC_ORDER {
            let name = hw_encoder_name(codec, hw);
            if !listed.contains(&name) {
                continue;
            }
            if test_hw_encoder(ffmpeg_path, hw, device.as_deref(), &name).await {
                info!(encoder = %name, "hardware encoder available");
                working.push(name);
            } else {
                debug!(encoder = %name, "hardware encoder listed but not usable");
            }
        }
        if !working.is_empty() {
            backend = Some(hw);
            break;
        }
    }

    let can_decode = match (backend, device.as_deref()) {
        (Some(HwAccel::Vaapi), Some(dev)) => test_vaapi_decoder(ffmpeg_path, dev).await,
        _ => false,
    };

    let caps = HardwareCapabilities::assemble(backend, device, &working, can_decode);
    info!(
        hwaccel = ?caps.hwaccel,
        encoders = ?caps.encoders.iter().map(|e| e.encoder.as_str()).collect::<Vec<_>>(),
        "GPU encoder detection complete"
    );
    caps
}

async fn get_encoders(ffmpeg_path: &Path) -> Result<String, String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        tokio::process::Command::new(ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| "ffmpeg -encoders timed out".to_string())?
    .map_err(|e| format!("spawn ffmpeg: {e}"))?;

    if !output.status.success() {
        return Err("ffmpeg -encoders failed".into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract encoder names from `ffmpeg -encoders` output.
///
/// Entry lines look like ` V....D h264_vaapi   H.264/AVC (VAAPI)`; the header
/// legend and the `------` separator are skipped.
pub fn parse_encoder_list(output: &str) -> HashSet<String> {
    let mut past_header = false;
    let mut names = HashSet::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("------") {
            past_header = true;
            continue;
        }
        if !past_header {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        if let (Some(flags), Some(name)) = (parts.next(), parts.next()) {
            if flags.len() == 6 {
                names.insert(name.to_string());
            }
        }
    }
    names
}

/// First VAAPI render node present on this host.
pub fn find_render_device() -> Option<PathBuf> {
    RENDER_NODES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

async fn test_hw_encoder(
    ffmpeg_path: &Path,
    hw: HwAccel,
    device: Option<&Path>,
    encoder: &str,
) -> bool {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    if let (HwAccel::Vaapi, Some(dev)) = (hw, device) {
        args.extend([
            "-init_hw_device".into(),
            format!("vaapi=hw:{}", dev.display()),
        ]);
    }
    args.extend([
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        "nullsrc=s=256x256:d=0.1:r=1".into(),
    ]);
    if hw == HwAccel::Vaapi {
        args.extend(["-vf".into(), "format=nv12,hwupload".into()]);
    }
    args.extend([
        "-c:v".into(),
        encoder.into(),
        "-frames:v".into(),
        "1".into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]);
    run_quietly(ffmpeg_path, &args).await
}

async fn test_vaapi_decoder(ffmpeg_path: &Path, device: &Path) -> bool {
    let args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-hwaccel".into(),
        "vaapi".into(),
        "-hwaccel_device".into(),
        device.to_string_lossy().into_owned(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        "nullsrc=s=256x256:d=0.1:r=1".into(),
        "-frames:v".into(),
        "1".into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ];
    run_quietly(ffmpeg_path, &args).await
}

async fn run_quietly(ffmpeg_path: &Path, args: &[String]) -> bool {
    run_within(ffmpeg_path, args, PROBE_TIMEOUT).await
}

/// Run to completion within `limit`; the child is killed if it overruns.
async fn run_within(program: &Path, args: &[String], limit: Duration) -> bool {
    let status = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .status();
    match tokio::time::timeout(limit, status).await {
        Ok(result) => result.map(|s| s.success()).unwrap_or(false),
        Err(_) => {
            debug!(program = %program.display(), "probe command timed out");
            false
        }
    }
}
