//! Download phase: yt-dlp with an explicit fallback ladder.

use futures_util::StreamExt;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use super::{DownloadError, ProgressFn, ToolRunner};
use crate::backend::BackendError;

const FORMAT_SPEC: &str = "bestvideo*+bestaudio/best";

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+\.?\d*)").unwrap());
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\] Destination: (.+)$").unwrap());
static MERGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[Merger\] Merging formats into "(.+)""#).unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatMode {
    /// `--no-warnings -f bestvideo*+bestaudio/best`
    Explicit,
    /// Whatever yt-dlp picks by default.
    Minimal,
}

/// One rung of the fallback ladder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    pub cookies: Option<String>,
    pub format: FormatMode,
    pub label: &'static str,
}

impl Attempt {
    pub fn args(&self, template: &str, url: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(browser) = &self.cookies {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }
        args.push("--newline".to_string());
        if self.format == FormatMode::Explicit {
            args.extend(["--no-warnings", "-f", FORMAT_SPEC].map(String::from));
        }
        args.extend(["-o".to_string(), template.to_string(), url.to_string()]);
        args
    }
}

/// cookies+format (when a browser is set), no-cookies+format, minimal.
pub fn attempt_ladder(cookies_browser: Option<&str>) -> Vec<Attempt> {
    let mut ladder = Vec::new();
    if let Some(browser) = cookies_browser.filter(|b| !b.is_empty()) {
        ladder.push(Attempt {
            cookies: Some(browser.to_string()),
            format: FormatMode::Explicit,
            label: "with cookies",
        });
    }
    ladder.push(Attempt {
        cookies: None,
        format: FormatMode::Explicit,
        label: "without cookies",
    });
    ladder.push(Attempt {
        cookies: None,
        format: FormatMode::Minimal,
        label: "default settings",
    });
    ladder
}

/// Substring check for format-selection failures. Not exhaustive.
pub fn is_format_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("format not available")
        || text.contains("--list-formats")
        || lower.contains("requested format")
}

/// Whether a failed attempt at `index` moves on to the next rung.
pub fn should_advance(ladder: &[Attempt], index: usize, error_text: &str) -> bool {
    let has_next = index + 1 < ladder.len();
    let cookie_attempt = ladder.get(index).is_some_and(|a| a.cookies.is_some());
    has_next && (cookie_attempt || is_format_error(error_text))
}

/// `<dir>/<stem>.%(ext)s` so yt-dlp picks the extension.
pub fn output_template(output_path: &Path) -> String {
    format!("{}.%(ext)s", output_path.with_extension("").display())
}

/// Reads yt-dlp's line protocol.
#[derive(Debug, Default)]
pub struct DownloadParser {
    /// Last destination or merge target, as printed.
    pub destination: Option<String>,
    pub errors: Vec<String>,
    last_progress: f64,
}

impl DownloadParser {
    /// Parser that only reports values above `floor`.
    pub fn starting_at(floor: f64) -> Self {
        Self {
            last_progress: floor,
            ..Self::default()
        }
    }

    /// Consume one line; returns a new progress value when it moved forward.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        if line.starts_with("ERROR:") || line.starts_with("Error: ") {
            self.errors.push(line.to_string());
        }
        if let Some(c) = DESTINATION_RE.captures(line) {
            self.destination = Some(c[1].trim().to_string());
        }
        if let Some(c) = MERGER_RE.captures(line) {
            self.destination = Some(c[1].to_string());
        }
        let value = PROGRESS_RE
            .captures(line)
            .and_then(|c| c[1].parse::<f64>().ok())?
            .min(100.0);
        // Multi-stream downloads restart at 0% for each stream.
        if value > self.last_progress {
            self.last_progress = value;
            Some(value)
        } else {
            None
        }
    }

    pub fn progress(&self) -> f64 {
        self.last_progress
    }

    pub fn error_text(&self) -> String {
        if self.errors.is_empty() {
            "Unknown error".into()
        } else {
            self.errors.join("\n")
        }
    }
}

/// Locate the file yt-dlp produced for `output_path`.
///
/// Exact stem first, then any name starting with the stem that is not an
/// intermediate per-format file (`<stem>.f<id>.<ext>`).
pub fn find_output_file(output_path: &Path) -> Option<PathBuf> {
    let stem = output_path.file_stem()?.to_string_lossy().into_owned();
    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    if let Some(exact) = files
        .iter()
        .find(|p| p.file_stem().is_some_and(|s| s.to_string_lossy() == stem))
    {
        return Some(exact.clone());
    }
    let intermediate = format!("{stem}.f");
    files.into_iter().find(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.starts_with(&stem) && !name.starts_with(&intermediate)
    })
}

pub struct Downloader<'a> {
    runner: &'a ToolRunner,
    cookies_browser: Option<&'a str>,
}

impl<'a> Downloader<'a> {
    pub fn new(runner: &'a ToolRunner, cookies_browser: Option<&'a str>) -> Self {
        Self {
            runner,
            cookies_browser,
        }
    }

    /// Download `url` next to `output_path`; returns the file actually written.
    pub async fn download(
        &self,
        url: &str,
        output_path: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<PathBuf, DownloadError> {
        let dir = match output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| DownloadError::Failed(format!("Download failed: {e}")))?;
        let template = output_template(output_path);
        let ladder = attempt_ladder(self.cookies_browser);
        let mut last_error = String::from("Unknown error");
        // Progress never goes back within the phase, even when a fallback restarts at 0%.
        let mut high_water = 0.0;

        for (index, attempt) in ladder.iter().enumerate() {
            if index > 0 {
                self.runner
                    .log(&format!("[info] Retrying with {}...", attempt.label));
            }

            let args = attempt.args(&template, url);
            let mut stream = match self.runner.yt_dlp(&args, Some(&dir)) {
                Ok(s) => s,
                Err(BackendError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(BackendError::NotFound { .. }) => {
                    return Err(DownloadError::Failed(
                        "yt-dlp is not installed. Please install it first.".into(),
                    ));
                }
                Err(e) => return Err(DownloadError::Failed(format!("Download failed: {e}"))),
            };

            let mut parser = DownloadParser::starting_at(high_water);
            while let Some(line) = stream.next().await {
                if let Some(p) = parser.feed(&line) {
                    on_progress(p);
                }
            }
            high_water = parser.progress();
            let exit = stream.finish().await;
            if exit.cancelled {
                return Err(DownloadError::Cancelled);
            }

            if !exit.success() || !parser.errors.is_empty() {
                last_error = parser.error_text();
                if should_advance(&ladder, index, &last_error) {
                    self.runner.log(&format!(
                        "[info] Download failed with {}, trying fallback...",
                        attempt.label
                    ));
                    continue;
                }
                return Err(DownloadError::Failed(format!(
                    "Download failed: {last_error}"
                )));
            }

            let resolved = parser
                .destination
                .as_deref()
                .map(|d| self.runner.host_path(d, &dir))
                .filter(|p| p.exists())
                .or_else(|| find_output_file(output_path));

            match resolved {
                Some(path) => {
                    if parser.progress() < 100.0 {
                        on_progress(100.0);
                    }
                    tracing::info!("downloaded {}", path.display());
                    return Ok(path);
                }
                None => {
                    last_error = "Download completed but output file not found".into();
                    if index + 1 < ladder.len() {
                        self.runner
                            .log(&format!("[info] {last_error}, trying fallback..."));
                        continue;
                    }
                }
            }
        }

        Err(DownloadError::Failed(format!("Download failed: {last_error}")))
    }

    pub fn cancel(&self) {
        self.runner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_destination_then_percentages() {
        let mut p = DownloadParser::default();
        let mut reported = Vec::new();
        for line in [
            "[download] Destination: /tmp/out.mp4",
            "[download]  50.0% of 10.00MiB at 1.00MiB/s ETA 00:05",
            "[download] 100.0% of 10.00MiB in 00:10",
        ] {
            if let Some(v) = p.feed(line) {
                reported.push(v);
            }
        }
        assert_eq!(p.destination.as_deref(), Some("/tmp/out.mp4"));
        assert_eq!(reported, vec![50.0, 100.0]);
        assert_eq!(p.progress(), 100.0);
        assert!(p.errors.is_empty());
    }

    #[test]
    fn test_parser_merge_clamp_and_restart() {
        let mut p = DownloadParser::default();
        assert_eq!(p.feed("[download] 120.5%"), Some(100.0));
        assert_eq!(p.feed("[download]   3.0%"), None);
        p.feed("[download] Destination: /dl/x.f137.mp4");
        p.feed(r#"[Merger] Merging formats into "/dl/x.mkv""#);
        assert_eq!(p.destination.as_deref(), Some("/dl/x.mkv"));
        p.feed("ERROR: [youtube] x: Requested format is not available");
        assert!(is_format_error(&p.error_text()));
    }

    #[test]
    fn test_ladder_shapes_and_args() {
        let with = attempt_ladder(Some("firefox"));
        assert_eq!(
            with.iter().map(|a| a.label).collect::<Vec<_>>(),
            vec!["with cookies", "without cookies", "default settings"]
        );
        assert_eq!(
            with[0].args("/dl/a.%(ext)s", "URL"),
            [
                "--cookies-from-browser",
                "firefox",
                "--newline",
                "--no-warnings",
                "-f",
                "bestvideo*+bestaudio/best",
                "-o",
                "/dl/a.%(ext)s",
                "URL"
            ]
            .map(String::from)
        );
        assert_eq!(
            with[2].args("t", "URL"),
            ["--newline", "-o", "t", "URL"].map(String::from)
        );
        assert_eq!(attempt_ladder(None).len(), 2);
        assert_eq!(attempt_ladder(Some("")).len(), 2);
    }

    #[test]
    fn test_advance_rules() {
        let ladder = attempt_ladder(Some("chrome"));
        // Cookie attempt advances on anything.
        assert!(should_advance(&ladder, 0, "ERROR: network down"));
        // Later attempts only on format errors.
        assert!(!should_advance(&ladder, 1, "ERROR: network down"));
        assert!(should_advance(&ladder, 1, "ERROR: requested format not available"));
        assert!(should_advance(&ladder, 1, "Use --list-formats for a list"));
        // Nothing after the last rung.
        assert!(!should_advance(&ladder, 2, "format not available"));
    }

    #[test]
    fn test_output_template() {
        assert_eq!(
            output_template(Path::new("/dl/my_clip.mp4")),
            "/dl/my_clip.%(ext)s"
        );
    }

    #[test]
    fn test_find_output_file_prefers_exact_stem() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        fs::write(dir.path().join("clip.f137.mp4"), b"x").unwrap();
        assert!(find_output_file(&target).is_none());

        fs::write(dir.path().join("clip_extra.mkv"), b"x").unwrap();
        assert_eq!(
            find_output_file(&target),
            Some(dir.path().join("clip_extra.mkv"))
        );

        fs::write(dir.path().join("clip.webm"), b"x").unwrap();
        assert_eq!(find_output_file(&target), Some(dir.path().join("clip.webm")));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::services::{
            ToolPaths,
            testing::{runner, script},
        };

        fn tools(body: &str) -> ToolPaths {
            ToolPaths {
                yt_dlp: script("yt-dlp", body),
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_destination_marker_resolves_output() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out.mp4");
            let body = format!(
                r#"touch '{0}'
                echo "[download] Destination: {0}"
                echo "[download]  50.0%"
                echo "[download] 100.0%""#,
                out.display()
            );
            let (r, _, _) = runner(tools(&body));
            let mut seen = Vec::new();
            let path = Downloader::new(&r, None)
                .download("https://youtu.be/x", &out, &mut |p: f64| seen.push(p))
                .await
                .unwrap();
            assert_eq!(path, out);
            assert_eq!(seen, vec![50.0, 100.0]);
        }

        #[tokio::test]
        async fn test_format_error_walks_the_ladder() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("clip.mp4");
            // Only the minimal attempt (no -f) succeeds, and it prints no marker.
            let body = format!(
                r#"case "$*" in
                  *" -f "*) echo "ERROR: Requested format is not available"; exit 1 ;;
                esac
                touch '{}'"#,
                dir.path().join("clip.webm").display()
            );
            let (r, logs, _) = runner(tools(&body));
            let mut seen = Vec::new();
            let path = Downloader::new(&r, Some("brave"))
                .download("https://youtu.be/x", &out, &mut |p: f64| seen.push(p))
                .await
                .unwrap();
            assert_eq!(path, dir.path().join("clip.webm"));
            assert_eq!(seen, vec![100.0]);
            let logs = logs.lock().unwrap();
            assert!(logs.contains(&"[info] Retrying with without cookies...".to_string()));
            assert!(logs.contains(&"[info] Retrying with default settings...".to_string()));
        }

        #[tokio::test]
        async fn test_non_format_error_stops_after_cookieless_attempt() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("clip.mp4");
            let (r, logs, _) = runner(tools(r#"echo "ERROR: HTTP Error 403: Forbidden"; exit 1"#));
            let err = Downloader::new(&r, None)
                .download("https://youtu.be/x", &out, &mut |_: f64| {})
                .await
                .unwrap_err();
            assert_eq!(
                err,
                DownloadError::Failed("Download failed: ERROR: HTTP Error 403: Forbidden".into())
            );
            assert!(logs.lock().unwrap().iter().all(|l| !l.starts_with("[info] Retrying")));
        }

        #[tokio::test]
        async fn test_fallback_attempt_does_not_rewind_progress() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("clip.mp4");
            // The cookie attempt gets to 40% and dies; the next one starts over.
            let body = format!(
                r#"case "$*" in
                  *--cookies-from-browser*)
                    echo "[download]  40.0%"
                    echo "ERROR: unable to decrypt cookies"; exit 1 ;;
                esac
                touch '{}'
                echo "[download]  10.0%"
                echo "[download]  60.0%"
                echo "[download] 100.0%""#,
                out.display()
            );
            let (r, _, _) = runner(tools(&body));
            let mut seen = Vec::new();
            let path = Downloader::new(&r, Some("chrome"))
                .download("https://youtu.be/x", &out, &mut |p: f64| seen.push(p))
                .await
                .unwrap();
            assert_eq!(path, out);
            assert_eq!(seen, vec![40.0, 60.0, 100.0]);
        }

        #[tokio::test]
        async fn test_cancel_mid_download() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("clip.mp4");
            let (r, _, token) = runner(tools(r#"echo "[download]   1.0%"; exec sleep 30"#));
            let canceller = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                canceller.cancel();
            });
            let err = Downloader::new(&r, None)
                .download("https://youtu.be/x", &out, &mut |_: f64| {})
                .await
                .unwrap_err();
            assert_eq!(err, DownloadError::Cancelled);
        }
    }
}
