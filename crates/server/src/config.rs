//! Server configuration, read once from `VIDSTREAM_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use vidstream_transcoder::TranscoderConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Every client-supplied media path is resolved under this directory.
    pub media_root: PathBuf,
    pub transcoder: TranscoderConfig,
    pub disable_hwaccel: bool,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = TranscoderConfig::default();

        let bind = parse(&get, "VIDSTREAM_BIND")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let transcoder = TranscoderConfig {
            ffmpeg_path: get("VIDSTREAM_FFMPEG").map_or(defaults.ffmpeg_path, PathBuf::from),
            ffprobe_path: get("VIDSTREAM_FFPROBE").map_or(defaults.ffprobe_path, PathBuf::from),
            transcode_dir: get("VIDSTREAM_TRANSCODE_DIR")
                .map_or(defaults.transcode_dir, PathBuf::from),
            max_concurrent: parse(&get, "VIDSTREAM_MAX_TRANSCODES")?
                .unwrap_or(defaults.max_concurrent),
            segment_secs: match parse::<u32>(&get, "VIDSTREAM_SEGMENT_SECS")? {
                Some(0) => return Err(invalid("VIDSTREAM_SEGMENT_SECS", "0", "must be positive")),
                Some(n) => n,
                None => defaults.segment_secs,
            },
            heartbeat_timeout: secs(&get, "VIDSTREAM_HEARTBEAT_TIMEOUT_SECS")?
                .unwrap_or(defaults.heartbeat_timeout),
            paused_timeout: secs(&get, "VIDSTREAM_PAUSED_TIMEOUT_SECS")?
                .unwrap_or(defaults.paused_timeout),
            finished_timeout: secs(&get, "VIDSTREAM_FINISHED_TIMEOUT_SECS")?
                .unwrap_or(defaults.finished_timeout),
            // 0 disables the hard age limit.
            max_session_age: match secs(&get, "VIDSTREAM_MAX_SESSION_AGE_SECS")? {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.max_session_age,
            },
            reap_interval: match secs(&get, "VIDSTREAM_REAP_INTERVAL_SECS")? {
                Some(d) if d.is_zero() => {
                    return Err(invalid("VIDSTREAM_REAP_INTERVAL_SECS", "0", "must be positive"));
                }
                Some(d) => d,
                None => defaults.reap_interval,
            },
            ..defaults
        };

        let disable_hwaccel = match get("VIDSTREAM_DISABLE_HWACCEL") {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                invalid("VIDSTREAM_DISABLE_HWACCEL", &v, "expected true or false")
            })?,
            None => false,
        };

        let cors_origins = get("VIDSTREAM_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty() && *o != "*")
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let log_format = match get("VIDSTREAM_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("VIDSTREAM_LOG_FORMAT", other, "expected text or json")),
        };

        Ok(Self {
            bind,
            media_root: get("VIDSTREAM_MEDIA_ROOT").map_or_else(|| PathBuf::from("/media"), PathBuf::from),
            transcoder,
            disable_hwaccel,
            cors_origins,
            log_format,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|v| v.trim().parse::<T>().map_err(|e| invalid(var, &v, &e.to_string())))
        .transpose()
}

fn secs(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(get, var)?.map(Duration::from_secs))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.media_root, PathBuf::from("/media"));
        assert_eq!(cfg.transcoder.max_concurrent, 4);
        assert_eq!(cfg.transcoder.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(cfg.transcoder.paused_timeout, Duration::from_secs(30));
        assert_eq!(cfg.transcoder.max_session_age, Some(Duration::from_secs(1800)));
        assert!(!cfg.disable_hwaccel);
        assert!(cfg.cors_origins.is_empty());
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides() {
        let cfg = from_pairs(&[
            ("VIDSTREAM_BIND", "127.0.0.1:9000"),
            ("VIDSTREAM_MEDIA_ROOT", "/srv/media"),
            ("VIDSTREAM_MAX_TRANSCODES", "0"),
            ("VIDSTREAM_PAUSED_TIMEOUT_SECS", "10"),
            ("VIDSTREAM_MAX_SESSION_AGE_SECS", "7200"),
            ("VIDSTREAM_DISABLE_HWACCEL", "yes"),
            ("VIDSTREAM_CORS_ORIGINS", "https://a.example, https://b.example"),
            ("VIDSTREAM_LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.media_root, PathBuf::from("/srv/media"));
        assert_eq!(cfg.transcoder.max_concurrent, 0);
        assert_eq!(cfg.transcoder.paused_timeout, Duration::from_secs(10));
        assert_eq!(cfg.transcoder.max_session_age, Some(Duration::from_secs(7200)));
        assert!(cfg.disable_hwaccel);
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn zero_max_age_disables_limit() {
        let cfg = from_pairs(&[("VIDSTREAM_MAX_SESSION_AGE_SECS", "0")]).unwrap();
        assert_eq!(cfg.transcoder.max_session_age, None);
    }

    #[test]
    fn wildcard_cors_means_any() {
        let cfg = from_pairs(&[("VIDSTREAM_CORS_ORIGINS", "*")]).unwrap();
        assert!(cfg.cors_origins.is_empty());
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (var, value) in [
            ("VIDSTREAM_BIND", "not-an-addr"),
            ("VIDSTREAM_MAX_TRANSCODES", "-1"),
            ("VIDSTREAM_SEGMENT_SECS", "0"),
            ("VIDSTREAM_REAP_INTERVAL_SECS", "0"),
            ("VIDSTREAM_HEARTBEAT_TIMEOUT_SECS", "soon"),
            ("VIDSTREAM_DISABLE_HWACCEL", "maybe"),
            ("VIDSTREAM_LOG_FORMAT", "xml"),
        ] {
            let err = from_pairs(&[(var, value)]).unwrap_err();
            assert!(err.to_string().contains(var), "{var}: {err}");
        }
    }
}
