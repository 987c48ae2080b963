use crate::error::PipelineError;
use crate::models::ExtractionJob;
use crate::process::run_tool;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions yt-dlp uses for cover art; never treated as payload.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// What the extraction tool left on disk for one job.
#[derive(Debug, PartialEq, Eq)]
pub enum Extracted {
    /// Ready to serve.
    File(PathBuf),
    /// Per-segment files still to be merged, sorted by name.
    Segments(Vec<PathBuf>),
}

/// Runs yt-dlp with prebuilt `args` and locates the produced files by the job's prefix.
///
/// A zero exit status is not trusted on its own: no matching file is a failure too.
pub async fn run_extraction(
    ytdlp: &str,
    args: &[String],
    job: &ExtractionJob,
) -> Result<Extracted, PipelineError> {
    tracing::info!("Starting yt-dlp for {}", job.source_url);
    let output = run_tool(ytdlp, args).await?;

    if !output.success {
        let stderr = output.stderr.trim();
        let message = if stderr.is_empty() { "yt-dlp failed" } else { stderr };
        tracing::error!("yt-dlp failed: {}", message);
        return Err(PipelineError::ToolFailed(message.to_string()));
    }

    let data_dir = job.output_prefix.parent().unwrap_or_else(|| Path::new("."));
    let mut matches = find_outputs(data_dir, &job.prefix_name());
    if matches.is_empty() {
        tracing::error!("yt-dlp exited cleanly but wrote nothing for {}", job.prefix_name());
        return Err(PipelineError::MissingOutput);
    }

    if job.merges_segments() {
        Ok(Extracted::Segments(matches))
    } else {
        Ok(Extracted::File(matches.swap_remove(0)))
    }
}

/// Payload files named `<prefix>.*` directly inside `dir`, sorted.
pub fn find_outputs(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = prefixed_files(dir, prefix)
        .filter(|p| !is_image(p))
        .collect();
    files.sort();
    files
}

/// Every cover image named `<prefix>.*`, sorted. Sectioned runs may leave one per section.
pub fn find_images(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = prefixed_files(dir, prefix).filter(|p| is_image(p)).collect();
    images.sort();
    images
}

/// The standalone cover image for `<prefix>`, if yt-dlp kept one.
pub fn find_thumbnail(dir: &Path, prefix: &str) -> Option<PathBuf> {
    find_images(dir, prefix).into_iter().next()
}

fn prefixed_files<'a>(dir: &Path, prefix: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    let stem = format!("{}.", prefix);
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(move |e| e.file_name().to_string_lossy().starts_with(&stem))
        .map(|e| e.into_path())
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
