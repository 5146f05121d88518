//! One job from URL to finished file: metadata, download, convert, upload.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{BackendKind, ExecutionBackend, ImageCache},
    config::Config,
    history::{HistoryRecord, HistorySink},
    jobs::{Job, JobResult, JobSnapshot, OperationState},
    progress::{ProgressError, ProgressTracker},
    services::{
        LogSink, MetadataError, PhaseError, ToolPaths, ToolRunner,
        convert::{Converter, TARGET_EXTENSION, is_target_format},
        download::Downloader,
        metadata::MetadataFetcher,
        upload::{UPLOAD_URL, Uploader},
    },
    slug::slugify,
    state_machine::OperationStateMachine,
};

/// Receives everything a front end shows about a running job.
pub trait JobObserver: Send + Sync {
    /// Called on every state change and accepted progress update.
    fn updated(&self, snapshot: JobSnapshot);
    /// Raw tool output and service notes (only when verbose).
    fn log(&self, line: &str);
}

/// Settings and shared handles a job runs with.
#[derive(Clone)]
pub struct JobContext {
    pub download_dir: PathBuf,
    pub cookies_browser: Option<String>,
    pub backend: BackendKind,
    pub container_image: Option<String>,
    pub verbose: bool,
    pub tools: ToolPaths,
    pub upload_endpoint: String,
    pub images: Arc<ImageCache>,
    pub history: Arc<dyn HistorySink>,
}

impl JobContext {
    pub fn from_config(
        cfg: &Config,
        images: Arc<ImageCache>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            download_dir: cfg.download_dir.clone(),
            cookies_browser: cfg.cookies_browser.clone().filter(|b| !b.is_empty()),
            backend: cfg.execution_backend,
            container_image: cfg.container_image.clone().filter(|i| !i.is_empty()),
            verbose: cfg.verbose,
            tools: ToolPaths::default(),
            upload_endpoint: UPLOAD_URL.to_string(),
            images,
            history,
        }
    }
}

/// Output file name for a job: custom name if given, else the title.
pub fn output_name(job_id: &str, custom_name: Option<&str>, title: &str) -> String {
    let source = custom_name.filter(|n| !n.trim().is_empty()).unwrap_or(title);
    let slug = slugify(source);
    if slug.is_empty() {
        format!("video_{job_id}")
    } else {
        slug
    }
}

/// yt-dlp leftovers for `target`: `.part`/`.ytdl` files and per-format pieces.
fn partial_downloads(target: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(stem)) = (target.parent(), target.file_stem()) else {
        return Vec::new();
    };
    let prefix = format!("{}.", stem.to_string_lossy());
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(rest) = name.strip_prefix(&prefix) else {
                return false;
            };
            let format_id = rest
                .strip_prefix('f')
                .and_then(|r| r.split('.').next())
                .unwrap_or_default();
            let per_format =
                !format_id.is_empty() && format_id.chars().all(|c| c.is_ascii_digit());
            name.ends_with(".part") || name.ends_with(".ytdl") || per_format
        })
        .collect()
}

struct Workflow<'a> {
    job: Job,
    machine: OperationStateMachine,
    tracker: ProgressTracker,
    ctx: &'a JobContext,
    observer: Arc<dyn JobObserver>,
    cancel: CancellationToken,
    log: Option<LogSink>,
    /// Files this job wrote; removed if it does not complete.
    temp_files: Vec<PathBuf>,
    /// Where yt-dlp was asked to write, for partial cleanup.
    target: Option<PathBuf>,
    /// First rejected progress reading of the running phase.
    fault: Option<ProgressError>,
}

impl<'a> Workflow<'a> {
    fn new(
        job: Job,
        ctx: &'a JobContext,
        cancel: CancellationToken,
        observer: Arc<dyn JobObserver>,
        log: Option<LogSink>,
    ) -> Self {
        Self {
            job,
            machine: OperationStateMachine::new(),
            tracker: ProgressTracker::new(),
            ctx,
            observer,
            cancel,
            log,
            temp_files: Vec::new(),
            target: None,
            fault: None,
        }
    }

    fn publish(&self) {
        self.observer.updated(self.job.snapshot());
    }

    fn enter(&mut self, to: OperationState, status: &str) -> Result<(), PhaseError> {
        let from = self.machine.state();
        self.machine
            .transition_to(to)
            .map_err(|e| PhaseError::Unexpected(e.to_string()))?;
        self.ctx.history.phase_changed(&self.job.id, from, to);
        self.job.state = to;
        self.job.status = status.to_string();
        if self.job.is_active() {
            self.tracker.start_phase(to.as_str());
            self.job.progress = 0.0;
        }
        self.publish();
        Ok(())
    }

    fn progress(&mut self, value: f64) {
        match self.tracker.update(value) {
            Ok(()) => {
                self.job.progress = self.tracker.current();
                self.publish();
            }
            // Services only report increases; anything else is a parser bug.
            Err(e) => {
                tracing::error!("job {}: {e}", self.job.id);
                self.fault.get_or_insert(e);
            }
        }
    }

    /// Close the running phase, failing it if it reported bad progress.
    fn finish_phase(&mut self) -> Result<(), PhaseError> {
        if let Some(e) = self.fault.take() {
            return Err(PhaseError::Unexpected(format!(
                "{} phase reported bad progress: {e}",
                self.tracker.phase()
            )));
        }
        self.tracker.complete_phase();
        self.job.progress = self.tracker.current();
        Ok(())
    }

    async fn prepare_backend(&mut self, runner: &ToolRunner) -> Result<(), PhaseError> {
        if runner.is_cancelled() {
            return Err(MetadataError::Cancelled.into());
        }
        let (ok, reason) = runner.backend().is_available().await;
        if !ok {
            return Err(MetadataError::Failed(reason).into());
        }
        let log = self.log.clone();
        let mut on_line = move |line: &str| {
            if let Some(sink) = &log {
                sink(line);
            }
        };
        if let Err(e) = runner.backend().ensure_image(&mut on_line).await {
            if runner.is_cancelled() {
                return Err(MetadataError::Cancelled.into());
            }
            return Err(MetadataError::Failed(e.format_message()).into());
        }
        Ok(())
    }

    async fn execute(&mut self, runner: &ToolRunner) -> Result<JobResult, PhaseError> {
        let ctx = self.ctx;
        let url = self.job.url.clone();
        let cookies = ctx.cookies_browser.as_deref();

        self.enter(OperationState::FetchingMetadata, "Fetching metadata...")?;
        self.prepare_backend(runner).await?;
        let meta = MetadataFetcher::new(runner, cookies).fetch(&url).await?;
        tracing::info!("job {}: metadata for {:?}", self.job.id, meta.title);
        let mut summary = format!(
            "{} by {} [{}]",
            meta.title,
            meta.uploader,
            meta.duration_display()
        );
        if let Some(date) = meta.upload_date_display() {
            summary.push_str(&format!(", {date}"));
        }
        if let Some(views) = meta.view_count_display() {
            summary.push_str(&format!(", {views} views"));
        }
        self.observer.log(&summary);
        self.job.title = meta.title.clone();
        self.finish_phase()?;
        self.publish();

        let name = output_name(&self.job.id, self.job.custom_name.as_deref(), &meta.title);
        tokio::fs::create_dir_all(&ctx.download_dir).await?;
        let target = ctx.download_dir.join(format!("{name}.{TARGET_EXTENSION}"));
        self.target = Some(target.clone());

        self.enter(OperationState::Downloading, "Downloading...")?;
        let downloaded = Downloader::new(runner, cookies)
            .download(&url, &target, &mut |p: f64| self.progress(p))
            .await?;
        self.temp_files.push(downloaded.clone());
        self.finish_phase()?;

        let mut final_path = downloaded.clone();
        if self.job.include_conversion && !is_target_format(&downloaded) {
            self.enter(OperationState::Converting, "Converting...")?;
            let output = downloaded.with_extension(TARGET_EXTENSION);
            self.temp_files.push(output.clone());
            final_path = Converter::new(runner)
                .convert(&downloaded, &output, &mut |p: f64| self.progress(p))
                .await?;
            let id = &self.job.id;
            match tokio::fs::remove_file(&downloaded).await {
                Ok(()) => tracing::info!("job {id}: removed {}", downloaded.display()),
                Err(e) => {
                    tracing::warn!("job {id}: could not remove {}: {e}", downloaded.display())
                }
            }
            self.temp_files.retain(|p| p != &downloaded);
            self.finish_phase()?;
        }

        let file_size = tokio::fs::metadata(&final_path).await.ok().map(|m| m.len());
        self.job.output_path = Some(final_path.clone());
        self.job.file_size = file_size;

        let mut share_url = None;
        if self.job.include_upload {
            self.enter(OperationState::Uploading, "Uploading...")?;
            let uploader = Uploader::new(self.cancel.clone(), self.log.clone())
                .with_endpoint(ctx.upload_endpoint.clone());
            let link = uploader
                .upload(&final_path, &mut |p: f64| self.progress(p))
                .await?;
            self.job.share_url = Some(link.clone());
            share_url = Some(link);
            self.finish_phase()?;
        }

        let result = JobResult {
            success: true,
            output_path: Some(final_path),
            share_url,
            file_size,
            ..JobResult::default()
        };
        if let Some(record) = HistoryRecord::from_result(&url, &result) {
            ctx.history.completed(record);
        }
        self.temp_files.clear();
        self.job.progress = 100.0;
        self.enter(OperationState::Completed, "Completed")?;
        tracing::info!("job {}: completed", self.job.id);
        Ok(result)
    }

    async fn remove_temp_files(&mut self) {
        let mut doomed = std::mem::take(&mut self.temp_files);
        if let Some(target) = &self.target {
            doomed.extend(partial_downloads(target));
        }
        for path in doomed {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let id = &self.job.id;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!("job {id}: cleaned up {}", path.display()),
                Err(e) => tracing::warn!("job {id}: cleanup of {} failed: {e}", path.display()),
            }
        }
    }

    async fn fail(&mut self, err: PhaseError) -> JobResult {
        self.remove_temp_files().await;
        let (to, status, result) = if err.is_cancelled() || self.cancel.is_cancelled() {
            tracing::info!("job {}: cancelled", self.job.id);
            (OperationState::Cancelled, "Cancelled".to_string(), JobResult::cancelled())
        } else {
            let msg = err.to_string();
            tracing::warn!("job {}: {msg}", self.job.id);
            self.job.error = Some(msg.clone());
            (OperationState::Error, format!("Error: {msg}"), JobResult::failed(msg))
        };
        self.job.output_path = None;
        if let Err(e) = self.enter(to, &status) {
            tracing::error!("job {}: {e}", self.job.id);
        }
        result
    }
}

/// Run `job` to a terminal state. Never returns an error: failures and
/// cancellation are folded into the result and the final snapshot.
pub async fn run_job(
    job: Job,
    ctx: &JobContext,
    cancel: CancellationToken,
    observer: Arc<dyn JobObserver>,
) -> JobResult {
    let log: Option<LogSink> = ctx.verbose.then(|| {
        let o = observer.clone();
        Arc::new(move |line: &str| o.log(line)) as LogSink
    });
    let backend = ExecutionBackend::select(
        ctx.backend,
        &job.id,
        ctx.container_image.as_deref(),
        ctx.images.clone(),
        cancel.clone(),
    );
    let runner = ToolRunner::new(backend, log.clone()).with_tools(ctx.tools.clone());
    tracing::info!(
        "job {}: start {} ({})",
        job.id,
        job.url,
        runner.backend().kind()
    );

    let mut wf = Workflow::new(job, ctx, cancel, observer, log);
    let result = match wf.execute(&runner).await {
        Ok(result) => result,
        Err(e) => wf.fail(e).await,
    };
    debug_assert!(wf.job.is_finished(), "job left in {}", wf.job.state);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::script;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<JobSnapshot>>,
        lines: Mutex<Vec<String>>,
    }

    impl JobObserver for Recorder {
        fn updated(&self, snapshot: JobSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot);
        }
        fn log(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    impl Recorder {
        /// Distinct states in the order they were first published.
        fn states(&self) -> Vec<OperationState> {
            let mut out: Vec<OperationState> = Vec::new();
            for s in self.snapshots.lock().unwrap().iter() {
                if out.last() != Some(&s.state) {
                    out.push(s.state);
                }
            }
            out
        }
    }

    #[derive(Default)]
    struct MemoryHistory {
        transitions: Mutex<Vec<(OperationState, OperationState)>>,
        records: Mutex<Vec<HistoryRecord>>,
    }

    impl HistorySink for MemoryHistory {
        fn phase_changed(&self, _job_id: &str, from: OperationState, to: OperationState) {
            self.transitions.lock().unwrap().push((from, to));
        }
        fn completed(&self, record: HistoryRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    #[test]
    fn test_output_name_rules() {
        assert_eq!(output_name("ab12cd34", None, "My Great Video!"), "my_great_video");
        assert_eq!(output_name("ab12cd34", Some("Custom Name"), "Title"), "custom_name");
        assert_eq!(output_name("ab12cd34", Some("  "), "Title"), "title");
        assert_eq!(output_name("ab12cd34", None, "!!!"), "video_ab12cd34");
    }

    #[test]
    fn test_partial_downloads_match_only_this_stem() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.mp4");
        for name in [
            "clip.webm.part",
            "clip.f137.mp4",
            "clip.webm.ytdl",
            "clip.webm",
            "clip_2.webm.part",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let mut found: Vec<String> = partial_downloads(&target)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        found.sort();
        assert_eq!(found, vec!["clip.f137.mp4", "clip.webm.part", "clip.webm.ytdl"]);
    }

    #[test]
    fn test_progress_regression_fails_the_phase() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            download_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let ctx = JobContext::from_config(
            &cfg,
            Arc::new(ImageCache::default()),
            Arc::new(crate::history::LogOnlySink),
        );
        let rec = Arc::new(Recorder::default());
        let job = Job::new("https://youtu.be/x", None, Default::default());
        let mut wf = Workflow::new(job, &ctx, CancellationToken::new(), rec.clone(), None);

        wf.enter(OperationState::FetchingMetadata, "meta").unwrap();
        wf.enter(OperationState::Downloading, "dl").unwrap();
        wf.progress(50.0);
        wf.progress(20.0);
        assert_eq!(wf.job.progress, 50.0);
        assert_eq!(rec.snapshots.lock().unwrap().last().map(|s| s.progress), Some(50.0));

        match wf.finish_phase() {
            Err(PhaseError::Unexpected(m)) => {
                assert!(m.contains("bad progress"), "{m}");
                assert!(m.contains("decreased from 50 to 20"), "{m}");
            }
            other => panic!("unexpected {other:?}"),
        }
        // The fault is consumed; the next phase starts clean.
        assert!(wf.finish_phase().is_ok());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        const YT_DLP: &str = r#"
            case "$*" in *--dump-json*) echo 'JSON'; exit 0 ;; esac
            while [ $# -gt 0 ]; do [ "$1" = "-o" ] && out="$2"; shift; done
            f=$(printf '%s' "$out" | sed 's/%(ext)s$/EXT/')
            echo "[download] Destination: $f"
            echo "[download]  40.0% of 1.00MiB"
            printf 'data' > "$f"
            echo "[download] 100.0% of 1.00MiB"
        "#;

        const FFMPEG: &str = r#"
            for last; do :; done
            echo "out_time_ms=5000000"
            echo "out_time_ms=10000000"
            printf 'converted' > "$last"
        "#;

        fn yt_dlp(json: &str, ext: &str) -> Vec<String> {
            script("yt-dlp", &YT_DLP.replace("JSON", json).replace("EXT", ext))
        }

        fn context(dir: &Path, yt_dlp: Vec<String>, history: Arc<MemoryHistory>) -> JobContext {
            JobContext {
                download_dir: dir.to_path_buf(),
                cookies_browser: None,
                backend: BackendKind::Local,
                container_image: None,
                verbose: true,
                tools: ToolPaths {
                    yt_dlp,
                    ffmpeg: script("ffmpeg", FFMPEG),
                    ffprobe: script("ffprobe", "echo 10.0"),
                },
                upload_endpoint: UPLOAD_URL.to_string(),
                images: Arc::new(ImageCache::default()),
                history,
            }
        }

        fn toggles(convert: bool, upload: bool) -> crate::jobs::JobToggles {
            crate::jobs::JobToggles { convert, upload }
        }

        fn assert_monotonic_per_state(rec: &Recorder) {
            let snaps = rec.snapshots.lock().unwrap();
            for pair in snaps.windows(2) {
                if pair[0].state == pair[1].state {
                    assert!(pair[1].progress >= pair[0].progress, "{pair:?}");
                }
            }
        }

        #[tokio::test]
        async fn test_download_then_convert() {
            let dir = tempfile::tempdir().unwrap();
            let history = Arc::new(MemoryHistory::default());
            let ctx = context(
                dir.path(),
                yt_dlp(r#"{"title": "My Clip"}"#, "webm"),
                history.clone(),
            );
            let rec = Arc::new(Recorder::default());

            let job = Job::new("https://youtu.be/x", None, toggles(true, false));
            let result = run_job(job, &ctx, CancellationToken::new(), rec.clone()).await;

            let mp4 = dir.path().join("my_clip.mp4");
            assert!(result.success, "{result:?}");
            assert_eq!(result.output_path.as_deref(), Some(mp4.as_path()));
            assert_eq!(result.file_size, Some(9));
            assert!(mp4.exists());
            assert!(!dir.path().join("my_clip.webm").exists());

            use OperationState::*;
            assert_eq!(rec.states(), vec![FetchingMetadata, Downloading, Converting, Completed]);
            assert_monotonic_per_state(&rec);
            let last = rec.snapshots.lock().unwrap().last().cloned().unwrap();
            assert_eq!(last.name, "My Clip");
            assert_eq!(last.progress, 100.0);

            assert_eq!(history.records.lock().unwrap().len(), 1);
            assert_eq!(
                history.transitions.lock().unwrap().first(),
                Some(&(Idle, FetchingMetadata))
            );
            assert!(rec.lines.lock().unwrap().iter().any(|l| l.starts_with("[ffmpeg] Progress")));
        }

        #[tokio::test]
        async fn test_mp4_download_skips_conversion() {
            let dir = tempfile::tempdir().unwrap();
            let history = Arc::new(MemoryHistory::default());
            let ctx = context(dir.path(), yt_dlp(r#"{"title": "ignored"}"#, "mp4"), history);
            let rec = Arc::new(Recorder::default());

            let job = Job::new(
                "https://youtu.be/x",
                Some("Named Clip".into()),
                toggles(true, false),
            );
            let result = run_job(job, &ctx, CancellationToken::new(), rec.clone()).await;

            assert!(result.success);
            assert_eq!(result.output_path, Some(dir.path().join("named_clip.mp4")));
            assert!(!rec.states().contains(&OperationState::Converting));
        }

        #[tokio::test]
        async fn test_empty_slug_uses_job_id() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = context(
                dir.path(),
                yt_dlp(r#"{"title": "!!!"}"#, "webm"),
                Arc::new(MemoryHistory::default()),
            );
            let job = Job::new("https://youtu.be/x", None, toggles(false, false));
            let expected = dir.path().join(format!("video_{}.webm", job.id));
            let rec = Arc::new(Recorder::default());
            let result = run_job(job, &ctx, CancellationToken::new(), rec).await;
            assert_eq!(result.output_path, Some(expected));
        }

        #[tokio::test]
        async fn test_download_failure_is_an_error_state() {
            let dir = tempfile::tempdir().unwrap();
            let body = r#"
                case "$*" in *--dump-json*) echo '{"title": "x"}'; exit 0 ;; esac
                echo "ERROR: Video unavailable"; exit 1
            "#;
            let history = Arc::new(MemoryHistory::default());
            let ctx = context(dir.path(), script("yt-dlp", body), history.clone());
            let rec = Arc::new(Recorder::default());

            let job = Job::new("https://youtu.be/x", None, toggles(true, false));
            let result = run_job(job, &ctx, CancellationToken::new(), rec.clone()).await;

            assert!(!result.success && !result.cancelled);
            assert_eq!(result.error.as_deref(), Some("Download failed: ERROR: Video unavailable"));
            assert_eq!(rec.states().last(), Some(&OperationState::Error));
            let last = rec.snapshots.lock().unwrap().last().cloned().unwrap();
            assert_eq!(last.error, result.error);
            assert!(history.records.lock().unwrap().is_empty());
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        }

        #[tokio::test]
        async fn test_upload_failure_cleans_up_finished_files() {
            let dir = tempfile::tempdir().unwrap();
            let mut ctx = context(
                dir.path(),
                yt_dlp(r#"{"title": "Clip"}"#, "webm"),
                Arc::new(MemoryHistory::default()),
            );
            let port = {
                let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
                l.local_addr().unwrap().port()
            };
            ctx.upload_endpoint = format!("http://127.0.0.1:{port}/");
            let rec = Arc::new(Recorder::default());

            let job = Job::new("https://youtu.be/x", None, toggles(true, true));
            let result = run_job(job, &ctx, CancellationToken::new(), rec.clone()).await;

            assert!(result.error.as_deref().unwrap().starts_with("Network error: "));
            assert!(rec.states().contains(&OperationState::Uploading));
            assert!(!dir.path().join("clip.mp4").exists());
            assert!(!dir.path().join("clip.webm").exists());
        }

        #[tokio::test]
        async fn test_cancel_mid_download_removes_partial() {
            let dir = tempfile::tempdir().unwrap();
            let body = r#"
                case "$*" in *--dump-json*) echo '{"title": "Long"}'; exit 0 ;; esac
                while [ $# -gt 0 ]; do [ "$1" = "-o" ] && out="$2"; shift; done
                f=$(printf '%s' "$out" | sed 's/%(ext)s$/webm/')
                echo "[download]   5.0%"
                printf 'x' > "$f.part"
                exec sleep 30
            "#;
            let history = Arc::new(MemoryHistory::default());
            let ctx = context(dir.path(), script("yt-dlp", body), history);
            let rec = Arc::new(Recorder::default());
            let token = CancellationToken::new();

            let partial = dir.path().join("long.webm.part");
            let watcher = partial.clone();
            let canceller = token.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    if watcher.exists() {
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
                canceller.cancel();
            });

            let job = Job::new("https://youtu.be/x", None, toggles(true, false));
            let result = run_job(job, &ctx, token, rec.clone()).await;

            assert!(result.cancelled);
            assert_eq!(rec.states().last(), Some(&OperationState::Cancelled));
            assert!(!partial.exists());
        }

        #[tokio::test]
        async fn test_cancelled_before_start() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = context(
                dir.path(),
                yt_dlp(r#"{"title": "x"}"#, "webm"),
                Arc::new(MemoryHistory::default()),
            );
            let token = CancellationToken::new();
            token.cancel();
            let rec = Arc::new(Recorder::default());
            let job = Job::new("https://youtu.be/x", None, toggles(true, false));
            let result = run_job(job, &ctx, token, rec.clone()).await;
            assert!(result.cancelled);
            assert_eq!(
                rec.states(),
                vec![OperationState::FetchingMetadata, OperationState::Cancelled]
            );
        }
    }
}
