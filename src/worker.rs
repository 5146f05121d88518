//! Background worker: owns the job manager and fans job events out to the UI.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::ImageCache,
    config::Config,
    history::HistorySink,
    jobs::{Job, JobResult, JobSnapshot, JobToggles},
    workflow::{self, JobContext, JobObserver},
};

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Start a new job for `url`.
    StartJob {
        url: String,
        custom_name: Option<String>,
        toggles: JobToggles,
    },
    /// Cancel one running job.
    CancelJob(String),
    /// Cancel every running job.
    CancelAll,
    /// Apply updated settings to jobs started from now on.
    SaveSettings(Config),
}

/// Events emitted by the worker for UI updates.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// A job changed state or progress.
    JobUpdated(JobSnapshot),
    /// A job reached a terminal state.
    JobFinished { job_id: String, result: JobResult },
    /// Informational log message.
    Log(String),
    /// User-visible error message.
    Error(String),
}

/// A started job: its id and the task that yields its result.
pub struct JobHandle {
    pub id: String,
    pub join: JoinHandle<JobResult>,
}

/// Forwards one job's observations into the event channel.
struct ChannelObserver {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl JobObserver for ChannelObserver {
    fn updated(&self, snapshot: JobSnapshot) {
        let _ = self.tx.send(WorkerEvent::JobUpdated(snapshot));
    }

    fn log(&self, line: &str) {
        let _ = self.tx.send(WorkerEvent::Log(line.to_string()));
    }
}

type Running = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Starts jobs as independent tasks and cancels them by id.
pub struct JobManager {
    ctx: JobContext,
    events: mpsc::UnboundedSender<WorkerEvent>,
    running: Running,
}

impl JobManager {
    pub fn new(ctx: JobContext, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            ctx,
            events,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Settings for jobs started after this call. Running jobs keep theirs.
    pub fn set_context(&mut self, ctx: JobContext) {
        self.ctx = ctx;
    }

    pub fn start_job(
        &self,
        url: &str,
        custom_name: Option<String>,
        toggles: JobToggles,
    ) -> JobHandle {
        let job = Job::new(url, custom_name, toggles);
        let id = job.id.clone();
        let token = CancellationToken::new();
        lock(&self.running).insert(id.clone(), token.clone());

        // Announce the idle job so the UI can list it right away.
        let _ = self.events.send(WorkerEvent::JobUpdated(job.snapshot()));

        let observer = Arc::new(ChannelObserver {
            tx: self.events.clone(),
        });
        let ctx = self.ctx.clone();
        let running = self.running.clone();
        let events = self.events.clone();
        let job_id = id.clone();
        let join = tokio::spawn(async move {
            let result = workflow::run_job(job, &ctx, token, observer).await;
            lock(&running).remove(&job_id);
            let _ = events.send(WorkerEvent::JobFinished {
                job_id,
                result: result.clone(),
            });
            result
        });
        JobHandle { id, join }
    }

    /// Returns false when no running job has this id.
    pub fn cancel_job(&self, id: &str) -> bool {
        match lock(&self.running).get(id) {
            Some(token) => {
                tracing::info!("job {id}: cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running job; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let running = lock(&self.running);
        for token in running.values() {
            token.cancel();
        }
        running.len()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.running).len()
    }
}

fn lock(running: &Running) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    // A panicked job task cannot leave the map half-updated.
    running.lock().unwrap_or_else(|e| e.into_inner())
}

/// Main worker loop: handle UI commands until the UI goes away.
pub async fn run(
    mut rx: mpsc::Receiver<WorkerCmd>,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    cfg: Config,
    history: Arc<dyn HistorySink>,
) {
    // One image cache for the whole process.
    let images = Arc::new(ImageCache::default());
    let mut manager = JobManager::new(
        JobContext::from_config(&cfg, images.clone(), history.clone()),
        tx.clone(),
    );
    tracing::info!("worker started ({} backend)", cfg.execution_backend);

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WorkerCmd::StartJob {
                url,
                custom_name,
                toggles,
            } => {
                // The join handle is dropped; results arrive as JobFinished.
                let handle = manager.start_job(&url, custom_name, toggles);
                let running = manager.active_count();
                tracing::info!("job {} started for {url} ({running} running)", handle.id);
                let _ = tx.send(WorkerEvent::Log(format!(
                    "Started job {} ({running} running)",
                    handle.id
                )));
            }

            WorkerCmd::CancelJob(id) => {
                if manager.cancel_job(&id) {
                    let _ = tx.send(WorkerEvent::Log(format!("Cancelling job {id}")));
                } else {
                    tracing::warn!("cancel for unknown job {id}");
                    let _ = tx.send(WorkerEvent::Error(format!("job {id} is not running")));
                }
            }

            WorkerCmd::CancelAll => {
                let n = manager.cancel_all();
                tracing::info!("cancel all: {n} jobs");
                let _ = tx.send(WorkerEvent::Log(format!("Cancelling {n} job(s)")));
            }

            WorkerCmd::SaveSettings(new_cfg) => {
                tracing::info!("settings updated");
                manager.set_context(JobContext::from_config(
                    &new_cfg,
                    images.clone(),
                    history.clone(),
                ));
                let _ = tx.send(WorkerEvent::Log("settings updated".into()));
            }
        }
    }

    // UI is gone; nothing will observe the remaining jobs.
    let n = manager.cancel_all();
    tracing::info!("worker stopped, cancelled {n} jobs");
}
