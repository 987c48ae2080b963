//! Child-process execution for the external tools.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_stream::{wrappers::SplitStream, StreamExt};

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(?P<progress>[\d\.]+)%\s+of\s+~?\s*(?P<size>[\d\.\w/]+)(?:\s+at\s+(?P<speed>[\d\.\w/]+))?\s+ETA\s+(?P<eta>[\d:]+)").unwrap()
});

/// Captured result of one finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Diagnostic text for a failed run: stderr, else stdout, else `fallback`.
    pub fn diagnostic(&self, fallback: &str) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Runs `program` with `args`, draining stdout and stderr concurrently until it exits.
///
/// There is no timeout: a hung tool holds the calling request until it dies.
pub async fn run_tool(program: &str, args: &[String]) -> Result<ToolOutput, PipelineError> {
    tracing::debug!("Running {} {:?}", program, args);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| PipelineError::Spawn {
            tool: program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::join!(
        drain(stdout, program, true),
        drain(stderr, program, false),
        child.wait(),
    );
    let status = status?;

    Ok(ToolOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}

/// Collects a pipe into a string, logging progress lines as they arrive.
async fn drain<R>(pipe: Option<R>, program: &str, track_progress: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut collected = String::new();
    let mut lines = SplitStream::new(BufReader::new(pipe).split(b'\n'));
    while let Some(Ok(raw)) = lines.next().await {
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r');

        match PROGRESS_REGEX.captures(line).filter(|_| track_progress) {
            Some(caps) => {
                let progress = caps.name("progress").map_or("?", |m| m.as_str());
                let eta = caps.name("eta").map_or("", |m| m.as_str());
                tracing::debug!("{}: {}% (eta {})", program, progress, eta);
            }
            None => tracing::trace!("{}: {}", program, line),
        }

        collected.push_str(line);
        collected.push('\n');
    }
    collected
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// Writes an executable `/bin/sh` script standing in for an external tool.
    pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn progress_regex_parses_ytdlp_lines() {
        let caps = PROGRESS_REGEX
            .captures("[download]  42.5% of ~ 3.20MiB at 1.01MiB/s ETA 00:02")
            .unwrap();
        assert_eq!(&caps["progress"], "42.5");
        assert_eq!(&caps["eta"], "00:02");
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "tool", "echo out; echo err >&2; exit 3");

        let output = run_tool(tool.to_str().unwrap(), &[]).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.diagnostic("generic"), "err");
    }

    #[tokio::test]
    async fn passes_arguments_through() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "tool", "printf '%s|' \"$@\"");

        let args = vec!["a b".to_string(), "c".to_string()];
        let output = run_tool(tool.to_str().unwrap(), &args).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim_end(), "a b|c|");
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run_tool("/nonexistent/yt-dlp", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }

    #[tokio::test]
    async fn hung_tool_is_never_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "tool", "sleep 5");
        let args: Vec<String> = Vec::new();

        // No tool-level timeout: only the caller can give up on a stuck run.
        let run = run_tool(tool.to_str().unwrap(), &args);
        let outcome = tokio::time::timeout(Duration::from_millis(200), run).await;
        assert!(outcome.is_err());
    }

    #[test]
    fn diagnostic_falls_back() {
        let output = ToolOutput {
            success: false,
            stdout: "  ".into(),
            stderr: String::new(),
        };
        assert_eq!(output.diagnostic("yt-dlp failed"), "yt-dlp failed");
    }
}
