use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// === API Request/Response Models ===

/// The JSON body for a `POST /download` request.
#[derive(Deserialize, Debug, Clone)]
pub struct DownloadRequest {
    #[serde(alias = "url")]
    pub source_url: String,
    /// Parsed case-insensitively into an [`AudioFormat`] by the handler.
    #[serde(default = "default_format")]
    pub format: String,
    /// Absent or `null` means the whole media.
    #[serde(default)]
    pub segments: Option<Vec<Segment>>,
    pub segment_mode: Option<SegmentMode>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

fn default_format() -> String {
    "best".to_string()
}

/// A start/end range within the source media, in whole seconds.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: i64,
    /// `None` runs to the end of the media.
    #[serde(default)]
    pub end: Option<i64>,
    /// Decorative label from the client.
    #[serde(default)]
    pub title: Option<String>,
}

impl Segment {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Segment { start, end, title: None }
    }
}

/// Whether multi-segment results are folded into one artifact.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMode {
    Single,
    #[default]
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Best,
    Mp3,
    Ogg,
    Wav,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Best => "best",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
        }
    }

    /// Label reported back to the client, e.g. `MP3`.
    pub fn quality_label(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best" => Ok(AudioFormat::Best),
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" => Ok(AudioFormat::Ogg),
            "wav" => Ok(AudioFormat::Wav),
            _ => Err(format!("Unsupported format: {}", s)),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title/artist overwrite. Blank strings are dropped on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl Metadata {
    pub fn new(title: Option<&str>, artist: Option<&str>) -> Self {
        fn clean(value: Option<&str>) -> Option<String> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }
        Metadata {
            title: clean(title),
            artist: clean(artist),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none()
    }
}

/// The response for `POST /download`, used for both outcomes.
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct DownloadResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResponse {
    pub fn ok(url: String, filename: String, quality: String) -> Self {
        DownloadResponse {
            status: "ok".to_string(),
            url: Some(url),
            filename: Some(filename),
            quality: Some(quality),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        DownloadResponse {
            status: "error".to_string(),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
}

// === Pipeline Models ===

/// One validated request on its way through the extraction pipeline.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub source_url: String,
    pub format: AudioFormat,
    /// `<data_dir>/<random hex>`; every file this job writes starts with it.
    pub output_prefix: PathBuf,
    pub segments: Vec<Segment>,
    pub segment_mode: SegmentMode,
    pub metadata: Metadata,
}

impl ExtractionJob {
    /// Builds a job with a fresh output prefix under `data_dir`.
    pub fn new(request: &DownloadRequest, format: AudioFormat, data_dir: &Path) -> Self {
        let download_id = uuid::Uuid::new_v4().simple().to_string();
        ExtractionJob {
            source_url: request.source_url.trim().to_string(),
            format,
            output_prefix: data_dir.join(download_id),
            segments: request.segments.clone().unwrap_or_default(),
            segment_mode: request.segment_mode.unwrap_or_default(),
            metadata: Metadata::new(request.title.as_deref(), request.artist.as_deref()),
        }
    }

    /// True when the per-segment files will be folded into one.
    pub fn merges_segments(&self) -> bool {
        self.segment_mode == SegmentMode::Single && self.segments.len() > 1
    }

    /// The bare file-name stem shared by every output of this job.
    pub fn prefix_name(&self) -> String {
        self.output_prefix
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
