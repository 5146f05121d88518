//! Phase services and the tool invocations they share.

pub mod convert;
pub mod download;
pub mod error;
pub mod metadata;
pub mod upload;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::backend::{
    BackendError, CommandResult, ExecOptions, ExecutionBackend, LineCallback, LineStream, Mount,
};

pub use error::{ConversionError, DownloadError, MetadataError, PhaseError, UploadError};

/// Receives raw tool output and service notes for the log panel.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Progress reports in percent, non-decreasing within a phase.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(f64) + Send);

/// Mount points inside the container.
pub const DOWNLOADS_MOUNT: &str = "/downloads";
pub const INPUT_MOUNT: &str = "/input";
pub const OUTPUT_MOUNT: &str = "/output";

/// How each external tool is launched: program followed by leading args.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    pub yt_dlp: Vec<String>,
    pub ffmpeg: Vec<String>,
    pub ffprobe: Vec<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            yt_dlp: vec!["yt-dlp".into()],
            ffmpeg: vec!["ffmpeg".into()],
            ffprobe: vec!["ffprobe".into()],
        }
    }
}

/// Builds yt-dlp/ffmpeg/ffprobe invocations for one job's backend.
pub struct ToolRunner {
    backend: ExecutionBackend,
    tools: ToolPaths,
    log: Option<LogSink>,
}

impl ToolRunner {
    pub fn new(backend: ExecutionBackend, log: Option<LogSink>) -> Self {
        Self {
            backend,
            tools: ToolPaths::default(),
            log,
        }
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    pub fn backend(&self) -> &ExecutionBackend {
        &self.backend
    }

    fn containerized(&self) -> bool {
        matches!(self.backend, ExecutionBackend::Containerized(_))
    }

    /// Tear down the running tool; later invocations fail as cancelled.
    pub fn cancel(&self) {
        self.backend.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.backend.is_cancelled()
    }

    /// Write one line to the log sink, if any.
    pub fn log(&self, line: &str) {
        if let Some(sink) = &self.log {
            sink(line);
        }
    }

    fn line_callback(&self) -> Option<LineCallback> {
        let sink = self.log.clone()?;
        Some(Box::new(move |line: &str| {
            if !line.is_empty() {
                sink(line);
            }
        }))
    }

    fn command(launcher: &[String], args: impl IntoIterator<Item = String>) -> Vec<String> {
        launcher.iter().cloned().chain(args).collect()
    }

    /// yt-dlp writing into `output_dir` (mounted at `/downloads` in a container).
    pub fn yt_dlp(
        &self,
        args: &[String],
        output_dir: Option<&Path>,
    ) -> Result<LineStream, BackendError> {
        let command = Self::command(&self.tools.yt_dlp, args.iter().cloned());
        let mut opts = ExecOptions {
            on_line: self.line_callback(),
            ..Default::default()
        };
        if let Some(dir) = output_dir {
            if self.containerized() {
                opts.mounts.push(Mount::rw(dir, DOWNLOADS_MOUNT));
            } else {
                opts.working_dir = Some(dir.to_path_buf());
            }
        }
        self.backend.execute(&command, opts)
    }

    /// `ffmpeg -i <input> <args> <output>`.
    pub fn ffmpeg(
        &self,
        input: &Path,
        output: &Path,
        args: &[String],
    ) -> Result<LineStream, BackendError> {
        let mut opts = ExecOptions {
            on_line: self.line_callback(),
            ..Default::default()
        };
        let (input_arg, output_arg) = if self.containerized() {
            opts.mounts.push(Mount::ro(parent_of(input), INPUT_MOUNT));
            opts.mounts.push(Mount::rw(parent_of(output), OUTPUT_MOUNT));
            (in_mount(INPUT_MOUNT, input), in_mount(OUTPUT_MOUNT, output))
        } else {
            (input.display().to_string(), output.display().to_string())
        };
        let mut tail = vec!["-i".to_string(), input_arg];
        tail.extend(args.iter().cloned());
        tail.push(output_arg);
        let command = Self::command(&self.tools.ffmpeg, tail);
        self.backend.execute(&command, opts)
    }

    /// `ffprobe <args> <input>`, collected.
    pub async fn ffprobe(
        &self,
        args: &[String],
        input: &Path,
    ) -> Result<CommandResult, BackendError> {
        let mut opts = ExecOptions::default();
        let input_arg = if self.containerized() {
            opts.mounts.push(Mount::ro(parent_of(input), INPUT_MOUNT));
            in_mount(INPUT_MOUNT, input)
        } else {
            input.display().to_string()
        };
        let mut tail: Vec<String> = args.to_vec();
        tail.push(input_arg);
        let command = Self::command(&self.tools.ffprobe, tail);
        self.backend.run(&command, opts).await
    }

    /// Map a path printed by yt-dlp back onto the host.
    pub fn host_path(&self, printed: &str, output_dir: &Path) -> PathBuf {
        if self.containerized() {
            if printed == DOWNLOADS_MOUNT {
                return output_dir.to_path_buf();
            }
            if let Some(rest) = printed.strip_prefix(&format!("{DOWNLOADS_MOUNT}/")) {
                return output_dir.join(rest);
            }
        }
        PathBuf::from(printed)
    }
}

fn parent_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn in_mount(mount: &str, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{mount}/{name}")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContainerBackend, ImageCache};
    use tokio_util::sync::CancellationToken;

    fn container_runner() -> ToolRunner {
        let backend = ExecutionBackend::Containerized(ContainerBackend::new(
            "abc",
            None,
            Arc::new(ImageCache::default()),
            CancellationToken::new(),
        ));
        ToolRunner::new(backend, None)
    }

    #[test]
    fn test_host_path_mapping() {
        let r = container_runner();
        let dir = Path::new("/home/me/dl");
        assert_eq!(
            r.host_path("/downloads/clip.webm", dir),
            PathBuf::from("/home/me/dl/clip.webm")
        );
        assert_eq!(r.host_path("/elsewhere/x", dir), PathBuf::from("/elsewhere/x"));

        let (direct, _, _) = testing::runner(ToolPaths::default());
        assert_eq!(
            direct.host_path("/downloads/clip.webm", dir),
            PathBuf::from("/downloads/clip.webm")
        );
    }

    #[test]
    fn test_in_mount_paths() {
        assert_eq!(in_mount(INPUT_MOUNT, Path::new("/a/b/c.webm")), "/input/c.webm");
        assert_eq!(parent_of(Path::new("c.webm")), PathBuf::from("."));
        assert_eq!(parent_of(Path::new("/a/c.webm")), PathBuf::from("/a"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffprobe_passes_input_last() {
        let tools = ToolPaths {
            ffprobe: testing::script("ffprobe", r#"for a in "$@"; do echo "$a"; done"#),
            ..Default::default()
        };
        let (r, _, _) = testing::runner(tools);
        let out = r
            .ffprobe(&["-v".into(), "error".into()], Path::new("/x/in.webm"))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output, "-v\nerror\n/x/in.webm");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verbose_lines_reach_the_sink() {
        use futures_util::StreamExt;
        let tools = ToolPaths {
            yt_dlp: testing::script("yt-dlp", "echo one; echo; echo two"),
            ..Default::default()
        };
        let (r, logs, _) = testing::runner(tools);
        let lines: Vec<String> = r.yt_dlp(&[], None).unwrap().collect().await;
        assert_eq!(lines, vec!["one", "", "two"]);
        assert_eq!(*logs.lock().unwrap(), vec!["one", "two"]);
    }
}
