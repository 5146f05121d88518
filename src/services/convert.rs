//! Convert phase: ffprobe for duration, ffmpeg with `-progress pipe:1`.

use futures_util::StreamExt;
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use super::{ConversionError, ProgressFn, ToolRunner};
use crate::backend::BackendError;

/// Target container extension.
pub const TARGET_EXTENSION: &str = "mp4";

const PROBE_ARGS: [&str; 6] = [
    "-v",
    "error",
    "-show_entries",
    "format=duration",
    "-of",
    "default=noprint_wrappers=1:nokey=1",
];

const ENCODE_ARGS: [&str; 16] = [
    "-y",
    "-progress",
    "pipe:1",
    "-nostats",
    "-loglevel",
    "error",
    "-c:v",
    "libx264",
    "-preset",
    "medium",
    "-crf",
    "23",
    "-c:a",
    "aac",
    "-b:a",
    "128k",
];

static OUT_TIME_MS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_ms=(\d+)").unwrap());
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time=(\d+):(\d+):(\d+\.?\d*)").unwrap());
static PROGRESS_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+=").unwrap());

/// Seconds of output written so far, from either progress marker.
///
/// `out_time_ms` is in microseconds despite its name.
pub fn parse_out_time(line: &str) -> Option<f64> {
    if let Some(c) = OUT_TIME_MS_RE.captures(line) {
        return c[1].parse::<u64>().ok().map(|us| us as f64 / 1_000_000.0);
    }
    let c = OUT_TIME_RE.captures(line)?;
    let h: f64 = c[1].parse().ok()?;
    let m: f64 = c[2].parse().ok()?;
    let s: f64 = c[3].parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

/// `current / duration` as a percentage capped at 100. Zero when unknown.
pub fn percent(current: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 0.0;
    }
    (current / duration * 100.0).clamp(0.0, 100.0)
}

/// True when `path` already has the target extension.
pub fn is_target_format(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(TARGET_EXTENSION))
}

async fn remove_partial(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::info!("removed partial output {}", path.display()),
            Err(e) => tracing::warn!("could not remove {}: {e}", path.display()),
        }
    }
}

pub struct Converter<'a> {
    runner: &'a ToolRunner,
}

impl<'a> Converter<'a> {
    pub fn new(runner: &'a ToolRunner) -> Self {
        Self { runner }
    }

    /// Stream duration in seconds; 0 when the probe fails for any reason.
    pub async fn probe_duration(&self, input: &Path) -> f64 {
        let args: Vec<String> = PROBE_ARGS.iter().map(|s| s.to_string()).collect();
        match self.runner.ffprobe(&args, input).await {
            Ok(r) if r.exit_code == 0 => r
                .output
                .lines()
                .find_map(|l| l.trim().parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(0.0),
            Ok(r) => {
                tracing::debug!("ffprobe exited with {}", r.exit_code);
                0.0
            }
            Err(e) => {
                tracing::debug!("ffprobe failed: {e}");
                0.0
            }
        }
    }

    /// Transcode `input` into `output`. A partial `output` never survives failure.
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<PathBuf, ConversionError> {
        if !input.exists() {
            return Err(ConversionError::Failed(format!(
                "Input file not found: {}",
                input.display()
            )));
        }

        let duration = self.probe_duration(input).await;
        if self.runner.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }

        let name = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        self.runner.log(&format!(
            "[ffmpeg] Command: ffmpeg -i {} -c:v libx264 -crf 23 -c:a aac {}",
            name(input),
            name(output)
        ));

        let args: Vec<String> = ENCODE_ARGS.iter().map(|s| s.to_string()).collect();
        let mut stream = match self.runner.ffmpeg(input, output, &args) {
            Ok(s) => s,
            Err(BackendError::Cancelled) => return Err(ConversionError::Cancelled),
            Err(BackendError::NotFound { .. }) => {
                return Err(ConversionError::Failed(
                    "ffmpeg is not installed. Please install it first.".into(),
                ));
            }
            Err(e) => return Err(ConversionError::Failed(format!("Conversion failed: {e}"))),
        };

        let mut last = 0.0_f64;
        let mut last_step: i64 = -1;
        let mut errors = Vec::new();
        while let Some(line) = stream.next().await {
            if let Some(t) = parse_out_time(&line) {
                let p = percent(t, duration);
                if duration > 0.0 && p > last {
                    last = p;
                    on_progress(p);
                    let step = (p / 10.0).floor() as i64 * 10;
                    if step > last_step {
                        last_step = step;
                        self.runner.log(&format!(
                            "[ffmpeg] Progress: {step}% ({t:.1}s / {duration:.1}s)"
                        ));
                    }
                }
            } else if !line.trim().is_empty() && !PROGRESS_KEY_RE.is_match(&line) {
                errors.push(line);
            }
        }

        let exit = stream.finish().await;
        if exit.cancelled {
            remove_partial(output).await;
            return Err(ConversionError::Cancelled);
        }
        if !exit.success() {
            remove_partial(output).await;
            let msg = if errors.is_empty() {
                "Unknown error".to_string()
            } else {
                errors.join("\n")
            };
            self.runner.log(&format!("[ffmpeg] ERROR: {msg}"));
            return Err(ConversionError::Failed(format!("Conversion failed: {msg}")));
        }
        if !output.exists() {
            return Err(ConversionError::Failed(
                "Conversion completed but output file not found".into(),
            ));
        }

        if last < 100.0 {
            on_progress(100.0);
        }
        self.runner
            .log(&format!("[ffmpeg] Conversion complete: {}", name(output)));
        Ok(output.to_path_buf())
    }

    pub fn cancel(&self) {
        self.runner.cancel();
    }
}
