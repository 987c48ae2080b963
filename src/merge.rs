//! Folds per-segment files into one artifact with ffmpeg's concat demuxer.

use crate::error::PipelineError;
use crate::extractor::{find_images, find_thumbnail};
use crate::models::Metadata;
use crate::process::run_tool;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The only container we re-attach cover art to.
pub const COVER_ART_EXTENSION: &str = "mp3";

/// Concatenates `files` into `<prefix>.merged.<ext>`.
///
/// On success the manifest, the segment files and every `<prefix>.*` image are deleted.
/// On failure everything is left in place for inspection; only the startup orphan
/// sweep reclaims it.
pub async fn merge_segments(
    ffmpeg: &str,
    output_prefix: &Path,
    files: Vec<PathBuf>,
    metadata: &Metadata,
) -> Result<PathBuf, PipelineError> {
    let files = sort_by_mtime(files).await?;
    let Some(first) = files.first() else {
        return Err(PipelineError::MissingOutput);
    };

    let prefix = output_prefix.to_string_lossy();
    let ext = first
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| COVER_ART_EXTENSION.to_string());
    let output = PathBuf::from(format!("{}.merged.{}", prefix, ext));
    let manifest = PathBuf::from(format!("{}.concat.txt", prefix));

    tokio::fs::write(&manifest, concat_manifest(&files)).await?;

    let dir = output_prefix.parent().unwrap_or_else(|| Path::new("."));
    let name = output_prefix
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let thumbnail = if ext.eq_ignore_ascii_case(COVER_ART_EXTENSION) {
        find_thumbnail(dir, &name)
    } else {
        None
    };

    let args = build_merge_args(&manifest, thumbnail.as_deref(), metadata, &output);
    tracing::info!("Merging {} segments into {}", files.len(), output.display());
    let result = run_tool(ffmpeg, &args).await?;

    if !result.success {
        let message = result.diagnostic("ffmpeg failed");
        tracing::error!("ffmpeg merge failed: {}", message);
        return Err(PipelineError::ToolFailed(message));
    }

    remove_quietly(&manifest).await;
    for file in &files {
        remove_quietly(file).await;
    }
    for image in find_images(dir, &name) {
        remove_quietly(&image).await;
    }

    Ok(output)
}

/// ffmpeg arguments for a concat run; cover art is mapped as an attached picture.
pub fn build_merge_args(
    manifest: &Path,
    thumbnail: Option<&Path>,
    metadata: &Metadata,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ]
    .map(String::from)
    .to_vec();
    args.push(manifest.to_string_lossy().to_string());

    match thumbnail {
        Some(thumb) => {
            args.push("-i".into());
            args.push(thumb.to_string_lossy().to_string());
            args.extend(
                [
                    "-map",
                    "0:a",
                    "-map",
                    "1:v",
                    "-c:a",
                    "copy",
                    "-c:v",
                    "copy",
                    "-id3v2_version",
                    "3",
                    "-disposition:v:0",
                    "attached_pic",
                ]
                .map(String::from),
            );
        }
        None => {
            args.push("-c".into());
            args.push("copy".into());
        }
    }

    if let Some(title) = &metadata.title {
        args.push("-metadata".into());
        args.push(format!("title={}", title));
    }
    if let Some(artist) = &metadata.artist {
        args.push("-metadata".into());
        args.push(format!("artist={}", artist));
    }

    args.push(output.to_string_lossy().to_string());
    args
}

/// One `file '<path>'` line per input, quotes escaped for the concat demuxer.
pub fn concat_manifest(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| format!("file '{}'\n", f.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

// File names carry the section times, but creation order is what yt-dlp
// wrote them in, which follows the requested segment order.
async fn sort_by_mtime(files: Vec<PathBuf>) -> Result<Vec<PathBuf>, PipelineError> {
    let mut stamped = Vec::with_capacity(files.len());
    for file in files {
        let modified = tokio::fs::metadata(&file)
            .await?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        stamped.push((modified, file));
    }
    stamped.sort_by_key(|(modified, _)| *modified);
    Ok(stamped.into_iter().map(|(_, file)| file).collect())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove {}: {}", path.display(), e);
    }
}
