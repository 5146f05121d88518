//! Metadata fetch: yt-dlp in "dump JSON, no download" mode.

use futures_util::StreamExt;

use super::{MetadataError, ToolRunner};
use crate::{backend::BackendError, metadata::VideoMetadata};

pub struct MetadataFetcher<'a> {
    runner: &'a ToolRunner,
    cookies_browser: Option<&'a str>,
}

/// Everything one attempt printed, split into the JSON dump and the rest.
#[derive(Debug, Default)]
struct AttemptOutput {
    json: Option<String>,
    errors: Vec<String>,
    other: Vec<String>,
}

impl AttemptOutput {
    fn push(&mut self, line: String) {
        let trimmed = line.trim_start();
        if trimmed.starts_with('{') {
            self.json = Some(line);
        } else if line.starts_with("ERROR:") || line.starts_with("Error: ") {
            self.errors.push(line);
        } else if !trimmed.is_empty() {
            self.other.push(line);
        }
    }

    fn error_text(&self) -> String {
        let lines = if self.errors.is_empty() {
            &self.other
        } else {
            &self.errors
        };
        if lines.is_empty() {
            "Unknown error".into()
        } else {
            lines.join("\n")
        }
    }
}

impl<'a> MetadataFetcher<'a> {
    pub fn new(runner: &'a ToolRunner, cookies_browser: Option<&'a str>) -> Self {
        Self {
            runner,
            cookies_browser: cookies_browser.filter(|b| !b.is_empty()),
        }
    }

    fn attempts(&self, url: &str) -> Vec<Vec<String>> {
        let base = ["--dump-json", "--no-download", "--no-warnings"];
        let mut attempts = Vec::new();
        if let Some(browser) = self.cookies_browser {
            let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
            args.extend(["--cookies-from-browser".to_string(), browser.to_string()]);
            args.push(url.to_string());
            attempts.push(args);
        }
        let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        args.push(url.to_string());
        attempts.push(args);
        attempts
    }

    /// First attempt that yields parseable JSON wins.
    pub async fn fetch(&self, url: &str) -> Result<VideoMetadata, MetadataError> {
        let mut last_error = String::from("Unknown error");

        for args in self.attempts(url) {
            let mut stream = match self.runner.yt_dlp(&args, None) {
                Ok(s) => s,
                Err(BackendError::Cancelled) => return Err(MetadataError::Cancelled),
                Err(BackendError::NotFound { .. }) => {
                    return Err(MetadataError::Failed(
                        "yt-dlp is not installed. Please install it first.".into(),
                    ));
                }
                Err(e) => {
                    return Err(MetadataError::Failed(format!(
                        "Failed to fetch metadata: {e}"
                    )));
                }
            };

            let mut out = AttemptOutput::default();
            while let Some(line) = stream.next().await {
                out.push(line);
            }
            let exit = stream.finish().await;
            if exit.cancelled {
                return Err(MetadataError::Cancelled);
            }

            if !exit.success() {
                last_error = out.error_text();
                tracing::debug!("metadata attempt failed: {last_error}");
                continue;
            }
            match out.json.as_deref().map(|j| VideoMetadata::from_json(url, j)) {
                Some(Ok(meta)) => return Ok(meta),
                Some(Err(e)) => last_error = format!("Failed to parse metadata: {e}"),
                None => last_error = "Failed to parse metadata: no JSON in output".into(),
            }
        }

        Err(MetadataError::Failed(format!(
            "Failed to fetch metadata: {last_error}"
        )))
    }

    pub fn cancel(&self) {
        self.runner.cancel();
    }
}
