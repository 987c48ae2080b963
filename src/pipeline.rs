use crate::args::{build_ytdlp_args, ArgsInput};
use crate::config::Config;
use crate::error::PipelineError;
use crate::extractor::{run_extraction, Extracted};
use crate::merge::merge_segments;
use crate::models::ExtractionJob;
use std::path::PathBuf;

/// External programs and the inputs they share across jobs.
#[derive(Debug, Clone)]
pub struct Tools {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub cookie_path: String,
}

impl Tools {
    pub fn from_config(config: &Config) -> Self {
        Tools {
            ytdlp: config.ytdlp_path.clone(),
            ffmpeg: config.ffmpeg_path.clone(),
            cookie_path: config.cookie_path.clone(),
        }
    }
}

/// The yt-dlp argument list for `job`.
pub fn job_args(job: &ExtractionJob, cookie_path: &str) -> Vec<String> {
    build_ytdlp_args(&ArgsInput {
        url: &job.source_url,
        format: job.format,
        output_prefix: &job.output_prefix,
        cookie_path,
        segments: &job.segments,
        metadata: &job.metadata,
        retain_thumbnail: job.merges_segments(),
    })
}

/// Extracts, then merges when the job asks for a single artifact.
pub async fn run(job: &ExtractionJob, tools: &Tools) -> Result<PathBuf, PipelineError> {
    let args = job_args(job, &tools.cookie_path);

    match run_extraction(&tools.ytdlp, &args, job).await? {
        Extracted::File(path) => Ok(path),
        Extracted::Segments(mut files) if files.len() == 1 => Ok(files.remove(0)),
        Extracted::Segments(files) => {
            merge_segments(&tools.ffmpeg, &job.output_prefix, files, &job.metadata).await
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{AudioFormat, Metadata, Segment, SegmentMode};
    use crate::process::tests::fake_tool;
    use std::path::Path;

    fn job(dir: &Path, segments: Vec<Segment>, mode: SegmentMode) -> ExtractionJob {
        ExtractionJob {
            source_url: "https://example/video".into(),
            format: AudioFormat::Mp3,
            output_prefix: dir.join("abc"),
            segments,
            segment_mode: mode,
            metadata: Metadata::default(),
        }
    }

    fn tools(bin: &Path, ytdlp_body: &str, ffmpeg_body: &str) -> Tools {
        Tools {
            ytdlp: fake_tool(bin, "yt-dlp", ytdlp_body).to_string_lossy().to_string(),
            ffmpeg: fake_tool(bin, "ffmpeg", ffmpeg_body).to_string_lossy().to_string(),
            cookie_path: "/config/cookies.txt".into(),
        }
    }

    #[test]
    fn merge_jobs_keep_thumbnail() {
        let segments = vec![Segment::new(0, Some(10)), Segment::new(12, None)];
        let single = job(Path::new("/data"), segments.clone(), SegmentMode::Single);
        let multiple = job(Path::new("/data"), segments, SegmentMode::Multiple);

        assert!(job_args(&single, "/c").iter().any(|a| a == "--write-thumbnail"));
        assert!(!job_args(&multiple, "/c").iter().any(|a| a == "--write-thumbnail"));
    }

    #[tokio::test]
    async fn multiple_mode_never_invokes_muxer() {
        let data = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let dir = data.path().display();
        let tools = tools(
            bin.path(),
            &format!("touch '{dir}/abc.0-10.mp3' '{dir}/abc.12-20.mp3'"),
            "exit 1",
        );
        let segments = vec![Segment::new(0, Some(10)), Segment::new(12, Some(20))];

        let path = run(&job(data.path(), segments, SegmentMode::Multiple), &tools)
            .await
            .unwrap();
        assert_eq!(path, data.path().join("abc.0-10.mp3"));
    }

    #[tokio::test]
    async fn single_mode_merges() {
        let data = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let dir = data.path().display();
        let tools = tools(
            bin.path(),
            &format!("touch '{dir}/abc.0-10.mp3'; touch '{dir}/abc.12-20.mp3'"),
            "for last; do :; done; touch \"$last\"",
        );
        let segments = vec![Segment::new(0, Some(10)), Segment::new(12, Some(20))];

        let path = run(&job(data.path(), segments, SegmentMode::Single), &tools)
            .await
            .unwrap();
        assert_eq!(path, data.path().join("abc.merged.mp3"));
        assert!(!data.path().join("abc.0-10.mp3").exists());
    }

    #[tokio::test]
    async fn single_mode_with_one_file_skips_merge() {
        let data = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let dir = data.path().display();
        let tools = tools(bin.path(), &format!("touch '{dir}/abc.0-10.mp3'"), "exit 1");
        let segments = vec![Segment::new(0, Some(10)), Segment::new(12, Some(20))];

        let path = run(&job(data.path(), segments, SegmentMode::Single), &tools)
            .await
            .unwrap();
        assert_eq!(path, data.path().join("abc.0-10.mp3"));
    }

    #[tokio::test]
    async fn merge_failure_surfaces_muxer_output() {
        let data = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let dir = data.path().display();
        let tools = tools(
            bin.path(),
            &format!("touch '{dir}/abc.0-10.mp3' '{dir}/abc.12-20.mp3'"),
            "echo 'Invalid data found' >&2; exit 1",
        );
        let segments = vec![Segment::new(0, Some(10)), Segment::new(12, Some(20))];

        let err = run(&job(data.path(), segments, SegmentMode::Single), &tools)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid data found");
        assert!(data.path().join("abc.0-10.mp3").exists());
    }
}
