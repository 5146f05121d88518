//! One-shot containers via the podman CLI.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::{
    BackendError, ExecOptions, ImageCache, LineStream, Mount, ProcessHooks, classify,
    classify::ContainerError, spawn_merged, supervise,
};

pub const RUNTIME: &str = "podman";
pub const DEFAULT_IMAGE: &str = "linuxserver/ffmpeg:latest";
/// Shared by every container this app starts.
pub const NAME_PREFIX: &str = "dlvideo";

/// Seconds podman waits between SIGTERM and SIGKILL inside the container.
const STOP_GRACE_SECS: &str = "5";
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn container_name(job_id: &str) -> String {
    format!("{NAME_PREFIX}-{job_id}")
}

/// `-v host:container:Z`, or `:ro,Z` for read-only mounts.
pub fn mount_args(mounts: &[Mount]) -> Vec<String> {
    mounts
        .iter()
        .flat_map(|m| {
            let host = std::path::absolute(&m.host).unwrap_or_else(|_| m.host.clone());
            let flags = if m.read_only { "ro,Z" } else { "Z" };
            [
                "-v".to_string(),
                format!("{}:{}:{flags}", host.display(), m.container),
            ]
        })
        .collect()
}

/// Swap host directories for their in-container mount points.
///
/// Only arguments naming a mounted directory or something beneath it change.
pub fn rewrite_paths(command: &[String], mounts: &[Mount]) -> Vec<String> {
    command
        .iter()
        .map(|arg| {
            for m in mounts {
                let host = m.host.to_string_lossy();
                let host = host.trim_end_matches('/');
                if host.is_empty() {
                    continue;
                }
                if arg == host {
                    return m.container.clone();
                }
                let prefix = format!("{host}/");
                if arg.contains(&prefix) {
                    let target = format!("{}/", m.container.trim_end_matches('/'));
                    return arg.replace(&prefix, &target);
                }
            }
            arg.clone()
        })
        .collect()
}

pub struct ContainerBackend {
    image: String,
    name: String,
    cache: Arc<ImageCache>,
    cancel: CancellationToken,
}

impl ContainerBackend {
    pub fn new(
        job_id: &str,
        image: Option<&str>,
        cache: Arc<ImageCache>,
        cancel: CancellationToken,
    ) -> Self {
        let image = image
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_IMAGE);
        Self {
            image: image.to_string(),
            name: container_name(job_id),
            cache,
            cancel,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Full `podman run` invocation for `command`.
    pub fn build_run_command(&self, command: &[String], opts: &ExecOptions) -> Vec<String> {
        let mut cmd: Vec<String> = [RUNTIME, "run", "--rm", "--name", &self.name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for (k, v) in &opts.env {
            cmd.push("-e".into());
            cmd.push(format!("{k}={v}"));
        }
        if let Some(dir) = &opts.working_dir {
            cmd.push("-w".into());
            cmd.push(dir.display().to_string());
        }
        cmd.extend(mount_args(&opts.mounts));
        cmd.push(self.image.clone());
        cmd.extend(rewrite_paths(command, &opts.mounts));
        cmd
    }

    pub fn execute(
        &self,
        command: &[String],
        opts: ExecOptions,
    ) -> Result<LineStream, BackendError> {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        if command.is_empty() {
            return Err(BackendError::EmptyCommand);
        }
        let full = self.build_run_command(command, &opts);
        let context = opts
            .mounts
            .first()
            .map(|m| m.host.display().to_string())
            .unwrap_or_default();

        tracing::debug!("exec: {}", full.join(" "));
        let mut cmd = Command::new(RUNTIME);
        cmd.args(&full[1..]);
        let (child, lines) =
            spawn_merged(cmd).map_err(|e| match BackendError::spawn(RUNTIME, e) {
                BackendError::NotFound { .. } => {
                    BackendError::Container(classify::runtime_not_installed())
                }
                other => BackendError::Container(classify::container_start_failed(
                    &other.to_string(),
                    "",
                )),
            })?;

        Ok(supervise(
            child,
            lines,
            StopContainer {
                name: self.name.clone(),
                context,
            },
            self.cancel.clone(),
            opts.on_line,
        ))
    }

    /// Probe `podman --version`.
    pub async fn is_available(&self) -> (bool, String) {
        match Command::new(RUNTIME)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(out) if out.status.success() => (true, String::new()),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                (
                    false,
                    classify::runtime_not_working(stderr.trim()).format_message(),
                )
            }
            Err(_) => (false, classify::runtime_not_installed().format_message()),
        }
    }

    /// Pull the image unless it is present locally. Pull output goes to `on_line`.
    pub async fn ensure_image(
        &self,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), ContainerError> {
        if self.cache.contains(&self.image) {
            return Ok(());
        }

        let exists = Command::new(RUNTIME)
            .args(["image", "exists", &self.image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|_| classify::runtime_not_installed())?;
        if exists.success() {
            self.cache.insert(&self.image);
            return Ok(());
        }

        on_line(&format!("Pulling container image: {}", self.image));
        tracing::info!("pulling image {}", self.image);
        let mut cmd = Command::new(RUNTIME);
        cmd.args(["pull", &self.image]);
        let (child, lines) = spawn_merged(cmd).map_err(|_| classify::runtime_not_installed())?;

        let mut stream = supervise(
            child,
            lines,
            StopContainer {
                name: String::new(),
                context: String::new(),
            },
            self.cancel.clone(),
            None,
        );
        let mut output = Vec::new();
        while let Some(line) = stream.next().await {
            on_line(&line);
            output.push(line);
        }
        let exit = stream.finish().await;
        if exit.success() {
            self.cache.insert(&self.image);
            Ok(())
        } else {
            Err(classify::image_pull_failed(&self.image, &output.join("\n")))
        }
    }
}

/// `podman stop`, escalating to `podman kill`, then reaps the client.
struct StopContainer {
    /// Empty when the supervised process is not a named container.
    name: String,
    /// Host path used to fill in classifier messages.
    context: String,
}

async fn runtime_quiet(args: &[&str]) -> std::io::Result<std::process::ExitStatus> {
    Command::new(RUNTIME)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
}

#[async_trait]
impl ProcessHooks for StopContainer {
    async fn terminate(&self, child: &mut Child) {
        if !self.name.is_empty() {
            let stop_args = ["stop", "--time", STOP_GRACE_SECS, self.name.as_str()];
            if tokio::time::timeout(STOP_TIMEOUT, runtime_quiet(&stop_args))
                .await
                .is_err()
            {
                let stop_cmd = format!("{RUNTIME} stop {}", self.name);
                let timeout = classify::command_timeout(&stop_cmd, STOP_TIMEOUT);
                tracing::warn!("{} Killing {}.", timeout.message, self.name);
                let kill_args = ["kill", self.name.as_str()];
                let _ = runtime_quiet(&kill_args).await;
            }
        }
        if tokio::time::timeout(CLIENT_EXIT_TIMEOUT, child.wait())
            .await
            .is_err()
        {
            let _ = child.kill().await;
        }
    }

    fn keeps_lines(&self) -> bool {
        !self.name.is_empty()
    }

    fn epilogue(&self, lines: &[String]) -> Option<String> {
        final_error_line(lines, &self.context)
    }
}

/// Last classified failure among `lines`, rendered as one output line.
pub fn final_error_line(lines: &[String], context: &str) -> Option<String> {
    lines
        .iter()
        .filter_map(|l| classify::detect(l, context))
        .last()
        .map(|e| format!("Error: {}", e.format_message()))
}
