//! TUIのイベントループ、入力処理、状態管理。

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event};
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

use crate::{
    config::{self, Config},
    events::{Screen, UiState},
    history::JsonHistory,
    input::InputBoxState,
    jobs::{JobResult, JobSnapshot, JobToggles},
    shortcuts::Shortcuts,
    ui::Tui,
    validator,
    worker::{self, WorkerCmd, WorkerEvent},
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// 終了時に実行中ジョブの停止を待つ上限。
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// ジョブ一覧の1行。
#[derive(Clone, Debug)]
pub struct JobRow {
    /// Workerから届いた最新の状態。
    pub snap: JobSnapshot,
    /// 終了後の結果（実行中はNone）。
    pub result: Option<JobResult>,
}

/// 入力処理と描画で共有するアプリ状態。
pub struct App {
    /// 永続化された設定ファイルのパス。
    pub cfg_path: PathBuf,
    /// メモリ上の現在設定。
    pub cfg: Config,
    /// 設定画面で編集中の設定（保存するまで反映しない）。
    pub draft: Config,
    /// 選択位置やステータスなどUI固有の状態。
    pub ui: UiState,
    /// 開始したジョブ（開始順）。
    pub jobs: Vec<JobRow>,
    /// Workerへのコマンド送信チャネル。
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    /// Workerからのイベント受信チャネル。
    pub worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,

    /// 次のジョブに使うカスタム名。
    pub pending_name: Option<String>,
    /// 次のジョブのフェーズ切り替え。
    pub toggles: JobToggles,

    /// 入力ボックスの状態（入力中はSome）。
    pub input_box: Option<InputBoxState>,

    /// ショートカットキー設定。
    pub shortcuts: Shortcuts,

    /// 完了済みダウンロードの履歴（Workerと共有）。
    pub history: Arc<JsonHistory>,
}

/// ユーザーが終了するまでメインTUIループを回す。
pub async fn run_app(terminal: &mut Tui, initial_url: Option<String>) -> Result<()> {
    // 設定ファイルを読み込む（初回はデフォルトを生成）。
    let cfg_path = config::config_path();
    let cfg = Config::load_or_default(&cfg_path)?;

    // ショートカット設定を読み込む（無ければデフォルト）。
    let shortcuts_path = config::config_dir().join("shortcut.toml");
    let shortcuts = Shortcuts::load_or_default(&shortcuts_path)?;

    // 履歴ファイルを開く（壊れていれば空から始める）。
    let history = Arc::new(JsonHistory::open(config::config_dir().join("history.json")));
    tracing::info!("history: {} records", history.records().len());

    // Worker通信用のコマンド/イベントチャネルを作る。
    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::unbounded_channel::<WorkerEvent>();

    // 初期設定スナップショットでWorkerを起動する。
    tokio::spawn(worker::run(rx_cmd, tx_ev, cfg.clone(), history.clone()));

    // アプリ状態を初期化する。
    let mut app = App {
        cfg_path,
        cfg: cfg.clone(),
        draft: cfg.clone(),
        ui: UiState {
            screen: Screen::Main,
            selected: 0,
            log: vec![],
            status: "Ready (press a to add a URL)".into(),
            error: None,
        },
        jobs: vec![],
        worker_tx: tx_cmd,
        worker_rx: rx_ev,
        pending_name: None,
        toggles: cfg.job_toggles(),
        input_box: None,
        shortcuts,
        history,
    };

    // 引数でURLが渡されていればすぐに開始する。
    if let Some(url) = initial_url {
        submit_url(&mut app, url).await?;
    }

    loop {
        // 現在の状態を描画する。
        terminal.draw(|f| draw(f, &app))?;

        // 入力処理の前にWorkerイベントを消化する。
        while let Ok(ev) = app.worker_rx.try_recv() {
            handle_worker_event(&mut app, ev);
        }

        // UIの応答性確保のため短いタイムアウトで入力をポーリングする。
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(k) = event::read()?
        {
            // どのフェーズでもCtrl+Cで終了できるようにする。
            if is_ctrl_c(&k) {
                break;
            }
            if handle_key(&mut app, k).await? {
                break;
            }
        }
    }

    shutdown(terminal, &mut app).await
}

/// 実行中のジョブを全て止め、終了を待ってから戻る。
async fn shutdown(terminal: &mut Tui, app: &mut App) -> Result<()> {
    if active_jobs(app) == 0 {
        return Ok(());
    }
    tracing::info!("shutdown: cancelling {} jobs", active_jobs(app));
    app.worker_tx.send(WorkerCmd::CancelAll).await?;
    app.ui.status = "Stopping running jobs...".into();

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while active_jobs(app) > 0 && Instant::now() < deadline {
        terminal.draw(|f| draw(f, app))?;
        match tokio::time::timeout(Duration::from_millis(100), app.worker_rx.recv()).await {
            Ok(Some(ev)) => handle_worker_event(app, ev),
            // Workerが終了済みなら待つ意味はない。
            Ok(None) => break,
            Err(_) => {}
        }
    }
    Ok(())
}

/// 終了していないジョブ数。
pub fn active_jobs(app: &App) -> usize {
    app.jobs.iter().filter(|j| j.result.is_none()).count()
}

/// WorkerイベントをUI状態へ反映する。
fn handle_worker_event(app: &mut App, ev: WorkerEvent) {
    match ev {
        WorkerEvent::JobUpdated(snap) => {
            // 既知のジョブは置き換え、新規なら末尾に追加する。
            if let Some(row) = app.jobs.iter_mut().find(|j| j.snap.id == snap.id) {
                row.snap = snap;
            } else {
                app.jobs.push(JobRow { snap, result: None });
                app.ui.selected = app.jobs.len() - 1;
            }
        }
        WorkerEvent::JobFinished { job_id, result } => {
            // 結果を保存し、ステータスに要約を出す。
            let Some(row) = app.jobs.iter_mut().find(|j| j.snap.id == job_id) else {
                return;
            };
            let summary = if result.success {
                match &result.output_path {
                    Some(p) => format!("Completed: {}", p.display()),
                    None => "Completed".into(),
                }
            } else if result.cancelled {
                format!("Cancelled: {}", row.snap.name)
            } else {
                format!(
                    "Failed: {} ({})",
                    row.snap.name,
                    result.error.as_deref().unwrap_or("unknown error")
                )
            };
            row.result = Some(result);
            app.ui.push_log(summary.clone());
            app.ui.status = summary;
        }
        WorkerEvent::Log(s) => {
            // ログを追加する。
            app.ui.push_log(s);
        }
        WorkerEvent::Error(s) => {
            // ステータスにエラーを表示する。
            app.ui.status = format!("Error: {s}");
        }
    }
}

/// URLを検証し、受理されればWorkerへジョブ開始を依頼する。
pub async fn submit_url(app: &mut App, url: String) -> Result<()> {
    let url = url.trim().to_string();
    let verdict = validator::validate_url(&url);
    if !verdict.accepted {
        // 不正なURLはジョブにしない。
        tracing::warn!("rejected url {url:?}: {}", verdict.message);
        app.ui.error = Some(verdict.message);
        return Ok(());
    }
    app.ui.error = None;
    // 取得済みのURLでも再取得は許すが、ログで知らせる。
    if let Some(prev) = app.history.find_by_source(&url) {
        app.ui.push_log(format!(
            "Already downloaded on {} as {}",
            prev.timestamp.format("%Y-%m-%d %H:%M"),
            prev.file_path.display()
        ));
    }
    tracing::info!("start job requested for {url}");
    app.worker_tx
        .send(WorkerCmd::StartJob {
            url: url.clone(),
            custom_name: app.pending_name.take(),
            toggles: app.toggles,
        })
        .await?;
    // 未知の形式は警告付きで受け付ける。
    app.ui.status = if verdict.message == "Valid URL" {
        format!("Queued {url}")
    } else {
        format!("Queued {url} ({})", verdict.message)
    };
    Ok(())
}
