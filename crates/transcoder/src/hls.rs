/// HLS playlist and segment helpers.

/// Name of the variant playlist ffmpeg writes into each session directory.
pub const PLAYLIST_FILE: &str = "playlist.m3u8";

/// fMP4 initialization segment.
pub const INIT_SEGMENT_FILE: &str = "init.mp4";

/// Content-Type for HLS master/variant playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content-Type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE_TS: &str = "video/MP2T";

/// Content-Type for fMP4 segments.
pub const SEGMENT_CONTENT_TYPE_MP4: &str = "video/mp4";

/// Container used for HLS media segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentFormat {
    MpegTs,
    Fmp4,
}

impl SegmentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::MpegTs => "ts",
            Self::Fmp4 => "m4s",
        }
    }

    /// ffmpeg `-hls_segment_filename` pattern.
    pub fn segment_pattern(self) -> String {
        format!("seg_%05d.{}", self.extension())
    }
}

/// Determine segment content type from filename extension.
pub fn segment_content_type(filename: &str) -> &'static str {
    if filename.ends_with(".m4s") || filename.ends_with(".mp4") {
        SEGMENT_CONTENT_TYPE_MP4
    } else {
        SEGMENT_CONTENT_TYPE_TS
    }
}

/// Number of media segments listed in a playlist.
pub fn playlist_segment_count(content: &str) -> usize {
    content
        .lines()
        .filter(|l| l.trim_start().starts_with("#EXTINF"))
        .count()
}

/// A playlist is handed to players once enough segments are buffered,
/// or once it is complete (short clips may never reach `min_segments`).
pub fn is_playlist_ready(content: &str, min_segments: usize) -> bool {
    content.contains("#EXT-X-ENDLIST") || playlist_segment_count(content) >= min_segments
}

/// Rewrite every segment URI (including the `#EXT-X-MAP` init segment) with `url_for`.
pub fn rewrite_playlist(content: &str, url_for: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(content.len() + 256);
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push('\n');
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("#EXT-X-MAP:") {
            out.push_str("#EXT-X-MAP:");
            out.push_str(&rewrite_map_attrs(rest, &url_for));
        } else if trimmed.starts_with('#') {
            out.push_str(trimmed);
        } else {
            let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
            out.push_str(&url_for(name));
        }
        out.push('\n');
    }
    out
}

fn rewrite_map_attrs(attrs: &str, url_for: &impl Fn(&str) -> String) -> String {
    const KEY: &str = "URI=\"";
    let Some(start) = attrs.find(KEY) else {
        return attrs.to_string();
    };
    let value_start = start + KEY.len();
    let Some(len) = attrs[value_start..].find('"') else {
        return attrs.to_string();
    };
    let uri = &attrs[value_start..value_start + len];
    let name = uri.rsplit('/').next().unwrap_or(uri);
    format!(
        "{}{}{}",
        &attrs[..value_start],
        url_for(name),
        &attrs[value_start + len..]
    )
}

/// Segment names are plain file names produced by ffmpeg. Anything else is rejected
/// before touching the filesystem.
pub fn is_valid_segment_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && (name.ends_with(".ts") || name.ends_with(".m4s") || name.ends_with(".mp4"))
}
