//! Running external tools on the host or inside a one-shot container.
//!
//! Both backends hand back a [`LineStream`]: the merged stdout/stderr of the
//! process, one line at a time, in the order the process wrote them. A
//! supervisor task owns the child process; cancelling the backend's token
//! tears the process down and ends the stream early.

pub mod classify;
pub mod container;
pub mod direct;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt,
    path::PathBuf,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::{Duration, Instant},
};
use thiserror::Error;
#[cfg(unix)]
use std::os::fd::OwnedFd;
use std::process::Stdio;
#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::{
    process::{Child, Command},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

pub use classify::ContainerError;
pub use container::ContainerBackend;
pub use direct::DirectBackend;

/// Invoked for every produced line, in production order.
pub type LineCallback = Box<dyn FnMut(&str) + Send>;

/// Which backend new jobs run under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Container,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Container => "container",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            BackendKind::Local => BackendKind::Container,
            BackendKind::Container => BackendKind::Local,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{program} not found")]
    NotFound { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Container(ContainerError),
    #[error("cancelled")]
    Cancelled,
    #[error("empty command")]
    EmptyCommand,
}

impl BackendError {
    pub(crate) fn spawn(program: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotFound {
                program: program.to_string(),
            }
        } else {
            BackendError::Spawn {
                program: program.to_string(),
                source,
            }
        }
    }
}

/// Host directory bound into the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn rw(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    pub fn ro(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::rw(host, container)
        }
    }
}

/// Per-invocation options. Mounts are ignored by the direct backend.
#[derive(Default)]
pub struct ExecOptions {
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub on_line: Option<LineCallback>,
}

/// How a supervised process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Exit {
    /// `None` when killed by a signal or torn down after a cancel.
    pub code: Option<i32>,
    pub cancelled: bool,
}

impl Exit {
    pub fn success(&self) -> bool {
        !self.cancelled && self.code == Some(0)
    }
}

/// Outcome of a one-shot command whose output was collected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// stdout and stderr, interleaved as written.
    pub output: String,
    pub duration: Option<Duration>,
}

/// Lazy, single-pass sequence of output lines.
pub struct LineStream {
    lines: mpsc::UnboundedReceiver<String>,
    on_line: Option<LineCallback>,
    exit: oneshot::Receiver<Exit>,
}

impl LineStream {
    /// Drain the remaining lines and wait for the process outcome.
    pub async fn finish(mut self) -> Exit {
        while self.next().await.is_some() {}
        self.exit.await.unwrap_or(Exit {
            code: None,
            cancelled: false,
        })
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        match this.lines.poll_recv(cx) {
            Poll::Ready(Some(line)) => {
                if let Some(cb) = this.on_line.as_mut() {
                    cb(&line);
                }
                Poll::Ready(Some(line))
            }
            other => other,
        }
    }
}

/// Backend-specific parts of process supervision.
#[async_trait]
pub(crate) trait ProcessHooks: Send + Sync + 'static {
    /// Stop the process after a cancel; must return in bounded time.
    async fn terminate(&self, child: &mut Child);

    /// Whether produced lines are retained for [`ProcessHooks::epilogue`].
    fn keeps_lines(&self) -> bool {
        false
    }

    /// Synthetic final line after a non-zero exit.
    fn epilogue(&self, _lines: &[String]) -> Option<String> {
        None
    }
}

/// Forward every line of the merged pipe into `tx`. Invalid UTF-8 is replaced.
#[cfg(unix)]
async fn pump<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Ok(Some(seg)) = segments.next_segment().await {
        if tx.send(decode_line(&seg)).await.is_err() {
            break;
        }
    }
}

#[cfg(not(unix))]
fn pump_blocking(reader: std::io::PipeReader, tx: mpsc::Sender<String>) {
    use std::io::BufRead;

    let mut reader = std::io::BufReader::new(reader);
    let mut seg = Vec::new();
    loop {
        seg.clear();
        match reader.read_until(b'\n', &mut seg) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = decode_line(seg.strip_suffix(b"\n").unwrap_or(&seg));
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        }
    }
}

fn decode_line(seg: &[u8]) -> String {
    String::from_utf8_lossy(seg)
        .trim_end_matches('\r')
        .to_string()
}

/// Spawn `cmd` with stdout and stderr sharing one pipe.
///
/// Lines arrive on the returned channel in the order the process wrote them,
/// whichever of the two descriptors they went to.
pub(crate) fn spawn_merged(
    mut cmd: Command,
) -> std::io::Result<(Child, mpsc::Receiver<String>)> {
    let (reader, writer) = std::io::pipe()?;
    cmd.stdin(Stdio::null())
        .stdout(writer.try_clone()?)
        .stderr(writer)
        .kill_on_drop(true);
    let child = cmd.spawn()?;
    // The command still owns both write ends; EOF only arrives once they close.
    drop(cmd);

    let (tx, rx) = mpsc::channel::<String>(256);
    #[cfg(unix)]
    {
        let reader = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        tokio::spawn(pump(reader, tx));
    }
    #[cfg(not(unix))]
    tokio::task::spawn_blocking(move || pump_blocking(reader, tx));
    Ok((child, rx))
}

/// Take ownership of the child and stream its merged output.
pub(crate) fn supervise<H: ProcessHooks>(
    mut child: Child,
    mut raw_rx: mpsc::Receiver<String>,
    hooks: H,
    cancel: CancellationToken,
    on_line: Option<LineCallback>,
) -> LineStream {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                line = raw_rx.recv() => match line {
                    Some(line) => {
                        if hooks.keeps_lines() {
                            seen.push(line.clone());
                        }
                        // Consumer went away: nobody will read the rest.
                        if out_tx.send(line).is_err() {
                            cancelled = true;
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let code = if cancelled {
            hooks.terminate(&mut child).await;
            None
        } else {
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!("wait failed: {e}");
                    None
                }
            }
        };

        if !cancelled
            && code != Some(0)
            && let Some(line) = hooks.epilogue(&seen)
        {
            let _ = out_tx.send(line);
        }
        let _ = exit_tx.send(Exit { code, cancelled });
    });

    LineStream {
        lines: out_rx,
        on_line,
        exit: exit_rx,
    }
}

/// Images already verified or pulled during this process.
#[derive(Debug, Default)]
pub struct ImageCache {
    ready: Mutex<HashSet<String>>,
}

impl ImageCache {
    pub fn contains(&self, image: &str) -> bool {
        self.ready
            .lock()
            .map(|s| s.contains(image))
            .unwrap_or(false)
    }

    pub fn insert(&self, image: &str) {
        if let Ok(mut s) = self.ready.lock() {
            s.insert(image.to_string());
        }
    }
}

/// The two interchangeable execution strategies.
pub enum ExecutionBackend {
    Direct(DirectBackend),
    Containerized(ContainerBackend),
}

impl ExecutionBackend {
    /// Fresh backend for one job. Container names derive from `job_id`.
    pub fn select(
        kind: BackendKind,
        job_id: &str,
        image: Option<&str>,
        cache: Arc<ImageCache>,
        cancel: CancellationToken,
    ) -> Self {
        match kind {
            BackendKind::Local => ExecutionBackend::Direct(DirectBackend::new(cancel)),
            BackendKind::Container => ExecutionBackend::Containerized(ContainerBackend::new(
                job_id, image, cache, cancel,
            )),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            ExecutionBackend::Direct(_) => BackendKind::Local,
            ExecutionBackend::Containerized(_) => BackendKind::Container,
        }
    }

    pub fn execute(
        &self,
        command: &[String],
        opts: ExecOptions,
    ) -> Result<LineStream, BackendError> {
        match self {
            ExecutionBackend::Direct(b) => b.execute(command, opts),
            ExecutionBackend::Containerized(b) => b.execute(command, opts),
        }
    }

    /// Stop whatever is running now and refuse further executions.
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token().is_cancelled()
    }

    fn cancel_token(&self) -> &CancellationToken {
        match self {
            ExecutionBackend::Direct(b) => b.cancel_token(),
            ExecutionBackend::Containerized(b) => b.cancel_token(),
        }
    }

    /// `(true, "")`, or `(false, reason)` when the runtime is unusable.
    pub async fn is_available(&self) -> (bool, String) {
        match self {
            ExecutionBackend::Direct(_) => (true, String::new()),
            ExecutionBackend::Containerized(b) => b.is_available().await,
        }
    }

    /// Make sure the container image is present. No-op for direct runs.
    pub async fn ensure_image(
        &self,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), ContainerError> {
        match self {
            ExecutionBackend::Direct(_) => Ok(()),
            ExecutionBackend::Containerized(b) => b.ensure_image(on_line).await,
        }
    }

    /// Run to completion and collect the merged output.
    pub async fn run(
        &self,
        command: &[String],
        opts: ExecOptions,
    ) -> Result<CommandResult, BackendError> {
        let started = Instant::now();
        let mut stream = self.execute(command, opts)?;
        let mut lines = Vec::new();
        while let Some(line) = stream.next().await {
            lines.push(line);
        }
        let exit = stream.finish().await;
        if exit.cancelled {
            return Err(BackendError::Cancelled);
        }
        Ok(CommandResult {
            exit_code: exit.code.unwrap_or(-1),
            output: lines.join("\n"),
            duration: Some(started.elapsed()),
        })
    }
}
