//! Runs tools as plain child processes on the host.

use async_trait::async_trait;
#[cfg(unix)]
use nix::{
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::{BackendError, ExecOptions, LineStream, ProcessHooks, spawn_merged, supervise};

/// Time a terminated process gets before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

pub struct DirectBackend {
    cancel: CancellationToken,
}

impl DirectBackend {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn `command` with the extra `env` merged over ours.
    pub fn execute(
        &self,
        command: &[String],
        opts: ExecOptions,
    ) -> Result<LineStream, BackendError> {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let (program, args) = command.split_first().ok_or(BackendError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &opts.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so a cancel also reaches whatever the tool forks.
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!("exec: {}", command.join(" "));
        let (child, lines) = spawn_merged(cmd).map_err(|e| BackendError::spawn(program, e))?;
        Ok(supervise(
            child,
            lines,
            Terminate {
                grace: TERMINATE_GRACE,
            },
            self.cancel.clone(),
            opts.on_line,
        ))
    }
}

/// SIGTERM to the whole group first, SIGKILL once the grace period runs out.
struct Terminate {
    grace: Duration,
}

#[async_trait]
impl ProcessHooks for Terminate {
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            let group = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(group, Signal::SIGTERM) {
                tracing::debug!("SIGTERM to group {pid} failed: {e}");
            }
            let exited = tokio::time::timeout(self.grace, child.wait()).await.is_ok();
            if !exited {
                tracing::warn!("pid {pid} ignored SIGTERM, killing its group");
            }
            // Stragglers that outlived the leader go too.
            let _ = killpg(group, Signal::SIGKILL);
            if exited {
                return;
            }
        }
        let _ = child.kill().await;
    }
}
