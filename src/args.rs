//! Pure construction of yt-dlp command lines.

use crate::models::{AudioFormat, Metadata, Segment};
use std::path::Path;

/// Codec `best` is extracted to.
pub const BEST_AUDIO_CODEC: &str = "opus";

/// Everything the builder needs to know about one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ArgsInput<'a> {
    pub url: &'a str,
    pub format: AudioFormat,
    pub output_prefix: &'a Path,
    pub cookie_path: &'a str,
    pub segments: &'a [Segment],
    pub metadata: &'a Metadata,
    /// Keep the cover image on disk, for re-embedding after a merge.
    pub retain_thumbnail: bool,
}

/// Builds the yt-dlp argument list (without the program name).
///
/// Output is deterministic for identical input; the URL is always last.
pub fn build_ytdlp_args(input: &ArgsInput<'_>) -> Vec<String> {
    let prefix = input.output_prefix.to_string_lossy();
    let mut output_template = format!("{}.%(ext)s", prefix);

    let mut args: Vec<String> = vec![
        "--no-playlist".into(),
        "--no-part".into(),
        "--newline".into(),
        "--cookies".into(),
        input.cookie_path.into(),
        "--add-metadata".into(),
        "--embed-thumbnail".into(),
        "--convert-thumbnails".into(),
        "jpg".into(),
    ];

    if input.retain_thumbnail {
        args.push("--write-thumbnail".into());
    }

    if !input.segments.is_empty() {
        output_template = format!("{}.%(section_start)s-%(section_end)s.%(ext)s", prefix);
        for segment in input.segments {
            args.push("--download-sections".into());
            args.push(format_section(segment));
        }
        args.push("--force-keyframes-at-cuts".into());
    }

    if let Some(pp_args) = metadata_postprocessor_arg(input.metadata) {
        args.push("--postprocessor-args".into());
        args.push(pp_args);
    }

    args.push("--output".into());
    args.push(output_template);

    let codec = match input.format {
        AudioFormat::Best => BEST_AUDIO_CODEC,
        other => other.as_str(),
    };
    args.extend(
        [
            "-f",
            "bestaudio",
            "--extract-audio",
            "--audio-format",
            codec,
            "--audio-quality",
            "0",
        ]
        .map(String::from),
    );

    args.push(input.url.to_string());
    args
}

/// `ffmpeg:-metadata title=... -metadata artist=...`, or `None` without metadata.
fn metadata_postprocessor_arg(metadata: &Metadata) -> Option<String> {
    if metadata.is_empty() {
        return None;
    }
    let pairs: Vec<String> = [("title", &metadata.title), ("artist", &metadata.artist)]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|v| format!("-metadata {}", shell_quote(&format!("{}={}", key, v))))
        })
        .collect();

    Some(format!("ffmpeg:{}", pairs.join(" ")))
}

/// Renders a segment as a yt-dlp section selector: `*M:SS-M:SS`, or `*M:SS-` when open ended.
pub fn format_section(segment: &Segment) -> String {
    let start = format_timestamp(segment.start);
    match segment.end {
        Some(end) => format!("*{}-{}", start, format_timestamp(end)),
        None => format!("*{}-", start),
    }
}

/// `H:MM:SS` from one hour up, `M:SS` below. Negative input clamps to zero.
pub fn format_timestamp(seconds: i64) -> String {
    let total = seconds.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let remaining = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, remaining)
    } else {
        format!("{}:{:02}", minutes, remaining)
    }
}

/// POSIX shell quoting; yt-dlp splits postprocessor args with shell rules.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}
