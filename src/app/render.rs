//! TUI描画関連の関数。

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Block, Borders, Paragraph, Row, Table, Wrap},
};

use crate::{events::Screen, input, jobs::OperationState, shortcuts::Shortcuts};

use super::{App, JobRow, active_jobs, handlers::on_off};

/// INFOパネルに表示するログ行数。
const LOG_TAIL: usize = 12;

/// 画面全体のレイアウトを描画する。
pub fn draw(f: &mut Frame, app: &App) {
    // 画面をJOBS/INFO/HELP/STATUSへ分割する。
    let areas = Areas::split(f.area());

    // ジョブ一覧からテーブル行を組み立てる。
    let rows = app.jobs.iter().enumerate().map(|(i, j)| {
        Row::new(vec![
            format!("{}", i + 1),
            j.snap.name.clone(),
            state_label(j.snap.state).to_string(),
            format!("{:>5.1}%", j.snap.progress),
            row_status(j),
        ])
        .style(state_style(j.snap.state))
    });

    // ジョブテーブルのウィジェットを構築する。
    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(20),
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Min(16),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("JOBS"))
    .header(Row::new(vec!["#", "name", "state", "progress", "status"]).bold())
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(255, 140, 0)) // オレンジ色の背景
            .fg(Color::Black) // 黒文字
            .add_modifier(Modifier::BOLD),
    );

    // 選択中の行をハイライトする。
    let mut table_state = ratatui::widgets::TableState::default();
    if !app.jobs.is_empty() {
        table_state.select(Some(app.ui.selected));
    }
    // テーブルを描画する。
    f.render_stateful_widget(table, areas.jobs, &mut table_state);

    // 右パネル：通常は選択ジョブとログ、設定画面では編集中の設定。
    let info_text = if app.ui.screen == Screen::Settings {
        build_settings_info_text(app)
    } else {
        build_main_info_text(app)
    };

    // INFOパネルとして描画する。
    let info_panel = Paragraph::new(info_text)
        .block(Block::default().borders(Borders::ALL).title("INFO"))
        .wrap(Wrap { trim: true });
    f.render_widget(info_panel, areas.info);

    // HELPバー（画面ごとのショートカット）を描画する。
    let help_text = get_help_text(&app.ui.screen, &app.shortcuts);
    let help_bar = Paragraph::new(help_text)
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_bar, areas.help);

    // STATUSバー（画面名・ジョブ情報・エラー）を描画する。
    let status_bar = build_status_bar(app);
    f.render_widget(status_bar, areas.status);

    // 入力ボックスが開いていれば重ねて描画する。
    if let Some(input_state) = &app.input_box {
        input::render_input_box(f, input_state);
    }
}

/// 画面の4領域。
struct Areas {
    jobs: Rect,
    info: Rect,
    help: Rect,
    status: Rect,
}

impl Areas {
    /// 縦にBody/HELP/STATUS、Bodyを横にJOBS 60%とINFO 40%で割る。
    fn split(area: Rect) -> Self {
        let [body, help, status] = Layout::vertical([
            Constraint::Min(1),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .areas(area);
        let [jobs, info] =
            Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)])
                .areas(body);
        Self {
            jobs,
            info,
            help,
            status,
        }
    }
}

/// 一覧のstatus列：エラーがあればエラーを優先する。
fn row_status(row: &JobRow) -> String {
    match &row.snap.error {
        Some(e) => e.clone(),
        None => row.snap.status.clone(),
    }
}

/// メイン画面用の情報テキストを構築する。
fn build_main_info_text(app: &App) -> String {
    let mut lines = Vec::new();

    // 選択中ジョブの詳細。
    match app.jobs.get(app.ui.selected) {
        Some(row) => {
            lines.push(format!("Job: {}", row.snap.id));
            lines.push(format!("Name: {}", row.snap.name));
            lines.push(format!(
                "State: {} ({:.1}%)",
                state_label(row.snap.state),
                row.snap.progress
            ));
            if let Some(err) = &row.snap.error {
                lines.push(format!("Error: {err}"));
            }
            if let Some(result) = &row.result {
                if let Some(p) = &result.output_path {
                    lines.push(format!("File: {}", p.display()));
                }
                if let Some(size) = result.file_size {
                    lines.push(format!("Size: {}", format_size(size)));
                }
                if let Some(url) = &result.share_url {
                    lines.push(format!("Link: {url}"));
                }
            }
        }
        None => lines.push("No jobs yet".into()),
    }

    // 次のジョブに適用される設定。
    lines.push(String::new());
    lines.push(format!(
        "Next: name={} convert={} upload={}",
        app.pending_name.as_deref().unwrap_or("(title)"),
        on_off(app.toggles.convert),
        on_off(app.toggles.upload)
    ));
    lines.push(format!(
        "Backend: {} | Dir: {}",
        app.cfg.execution_backend,
        app.cfg.download_dir.display()
    ));

    // ログの末尾。
    lines.push(String::new());
    lines.push("Log:".into());
    let skip = app.ui.log.len().saturating_sub(LOG_TAIL);
    lines.extend(app.ui.log.iter().skip(skip).cloned());
    lines.join("\n")
}

/// 設定画面用の情報テキストを構築する。
fn build_settings_info_text(app: &App) -> String {
    let d = &app.draft;
    let sc = &app.shortcuts.settings;
    [
        "Settings (unsaved until Enter)".to_string(),
        String::new(),
        format!("[{}] Download dir: {}", format_keys(&sc.download_dir), d.download_dir.display()),
        format!(
            "[{}] Cookies from: {}",
            format_keys(&sc.cookies),
            d.cookies_browser.as_deref().unwrap_or("none")
        ),
        format!("[{}] Auto upload: {}", format_keys(&sc.auto_upload), on_off(d.auto_upload)),
        format!(
            "[{}] Skip conversion: {}",
            format_keys(&sc.skip_conversion),
            on_off(d.skip_conversion)
        ),
        format!("[{}] Backend: {}", format_keys(&sc.backend), d.execution_backend),
        format!(
            "[{}] Image: {}",
            format_keys(&sc.image),
            d.container_image.as_deref().unwrap_or("(default)")
        ),
        format!("[{}] Verbose log: {}", format_keys(&sc.verbose), on_off(d.verbose)),
    ]
    .join("\n")
}

/// ステータスバーを構築する。
fn build_status_bar(app: &App) -> Paragraph<'static> {
    let screen_name = match app.ui.screen {
        Screen::Main => "Main",
        Screen::Settings => "Settings",
    };

    // ジョブ件数・実行中・完了数を集計する。
    let job_info = format!(
        "Jobs: {} total, {} active, {} done",
        app.jobs.len(),
        active_jobs(app),
        app.jobs
            .iter()
            .filter(|j| j.snap.state == OperationState::Completed)
            .count()
    );

    // エラーの有無でステータス文字列を切り替える。
    let status_text = if let Some(err) = &app.ui.error {
        format!("[{}] {} | ERROR: {}", screen_name, job_info, err)
    } else {
        format!("[{}] {} | {}", screen_name, job_info, app.ui.status)
    };

    // ステータスバーのウィジェットを生成する。
    let mut status_bar = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });

    // エラー時は赤色で強調表示する。
    if app.ui.error.is_some() {
        status_bar = status_bar.style(Style::default().fg(Color::Red));
    }

    status_bar
}

/// 現在画面に応じたヘルプ文字列を返す。
fn get_help_text(screen: &Screen, shortcuts: &Shortcuts) -> String {
    match screen {
        Screen::Main => {
            let m = &shortcuts.main;
            let nav = format!("{}/{}", format_keys(&m.up), format_keys(&m.down));
            [
                (format_keys(&m.add), "add"),
                (format_keys(&m.name), "name"),
                (format_keys(&m.cancel), "cancel"),
                (format_keys(&m.cancel_all), "cancel all"),
                (format_keys(&m.toggle_convert), "convert"),
                (format_keys(&m.toggle_upload), "upload"),
                (format_keys(&m.settings), "settings"),
                (format_keys(&m.clear_history), "clear history"),
                (nav, "navigate"),
                (format_keys(&m.quit), "quit"),
            ]
            .iter()
            .map(|(keys, what)| format!("{keys}: {what}"))
            .collect::<Vec<_>>()
            .join(" | ")
        }
        Screen::Settings => format!(
            "letters: edit/toggle field | {}: save | {}: cancel",
            format_keys(&shortcuts.settings.save),
            format_keys(&shortcuts.settings.cancel)
        ),
    }
}

/// ショートカットキーの配列を表示用文字列に変換する。
fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}

/// ジョブ状態を一覧表示用の短いラベルへ変換する。
fn state_label(s: OperationState) -> &'static str {
    match s {
        OperationState::Idle => "Queued",
        OperationState::FetchingMetadata => "Metadata",
        OperationState::Downloading => "Download",
        OperationState::Converting => "Convert",
        OperationState::Uploading => "Upload",
        OperationState::Completed => "Done",
        OperationState::Cancelled => "Cancelled",
        OperationState::Error => "Error",
    }
}

/// 終了状態は色で区別する。
fn state_style(s: OperationState) -> Style {
    match s {
        OperationState::Completed => Style::default().fg(Color::Green),
        OperationState::Error => Style::default().fg(Color::Red),
        OperationState::Cancelled => Style::default().fg(Color::DarkGray),
        _ => Style::default(),
    }
}

/// バイト数を読みやすい単位へ変換する。
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
