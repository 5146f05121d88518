//! キー入力ハンドラー関数。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::path::PathBuf;

use crate::{
    config,
    events::Screen,
    input::{InputBoxState, InputCallbackId},
    shortcuts,
    worker::WorkerCmd,
};

use super::{App, submit_url};

/// キー入力を1件処理し、終了すべきならtrueを返す。
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックスが開いていれば最優先で処理する。
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }

    // 画面ごとのハンドラへ委譲する。
    match app.ui.screen {
        Screen::Main => handle_main_key(app, k).await,
        Screen::Settings => handle_settings_key(app, k).await,
    }
}

/// Ctrl+Cかどうかを判定する。
pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

/// メイン画面のキー処理。
async fn handle_main_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 前回のエラー表示はキー操作で消す。
    app.ui.error = None;
    // メイン画面のショートカットを参照する。
    let sc = &app.shortcuts.main;

    if shortcuts::matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if shortcuts::matches_shortcut(&k, &sc.settings) {
        // 設定画面へ遷移し、編集用の下書きを現在値から作り直す。
        app.draft = app.cfg.clone();
        app.ui.screen = Screen::Settings;
        app.ui.status = "Settings".into();
    } else if shortcuts::matches_shortcut(&k, &sc.add) {
        // URL入力ボックスを開く。
        app.input_box = Some(InputBoxState::new("Video URL:", "", InputCallbackId::AddUrl));
    } else if shortcuts::matches_shortcut(&k, &sc.name) {
        // 次のジョブ用のカスタム名を入力する。
        let current = app.pending_name.clone().unwrap_or_default();
        app.input_box = Some(InputBoxState::new(
            "File name for the next job (empty = video title):",
            current,
            InputCallbackId::CustomName,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 選択中のジョブが実行中なら取り消す。
        if let Some(row) = app.jobs.get(app.ui.selected)
            && row.result.is_none()
        {
            let id = row.snap.id.clone();
            app.worker_tx.send(WorkerCmd::CancelJob(id.clone())).await?;
            app.ui.status = format!("Cancelling {id}...");
        }
    } else if shortcuts::matches_shortcut(&k, &sc.cancel_all) {
        // 実行中の全ジョブを取り消す。
        app.worker_tx.send(WorkerCmd::CancelAll).await?;
        app.ui.status = "Cancelling all jobs...".into();
    } else if shortcuts::matches_shortcut(&k, &sc.toggle_convert) {
        // 次のジョブの変換有無を切り替える。
        app.toggles.convert = !app.toggles.convert;
        app.ui.status = format!("Convert next job: {}", on_off(app.toggles.convert));
    } else if shortcuts::matches_shortcut(&k, &sc.toggle_upload) {
        // 次のジョブのアップロード有無を切り替える。
        app.toggles.upload = !app.toggles.upload;
        app.ui.status = format!("Upload next job: {}", on_off(app.toggles.upload));
    } else if shortcuts::matches_shortcut(&k, &sc.clear_history) {
        // ダウンロード履歴を空にする。
        let n = app.history.records().len();
        match app.history.clear() {
            Ok(()) => {
                tracing::info!("history cleared ({n} records)");
                app.ui.push_log(format!("Cleared {n} history record(s)"));
                app.ui.status = "History cleared".into();
            }
            Err(e) => {
                tracing::error!("failed to clear history: {e}");
                app.ui.error = Some(format!("Could not clear history: {e}"));
            }
        }
    } else if shortcuts::matches_shortcut(&k, &sc.down) {
        // 次の行へ移動する。
        if app.ui.selected + 1 < app.jobs.len() {
            app.ui.selected += 1;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.up) {
        // 前の行へ移動する。
        if app.ui.selected > 0 {
            app.ui.selected -= 1;
        }
    }

    Ok(false)
}

/// 設定画面のキー処理。
async fn handle_settings_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 設定画面のショートカットを参照する。
    let sc = &app.shortcuts.settings;

    if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 変更を破棄してメイン画面へ戻る。
        app.draft = app.cfg.clone();
        app.ui.screen = Screen::Main;
        app.ui.status = "Settings discarded".into();
    } else if shortcuts::matches_shortcut(&k, &sc.save) {
        // 下書きを設定へ反映して保存する。
        app.cfg = app.draft.clone();
        app.cfg.save(&app.cfg_path)?;
        tracing::info!("settings saved to {}", app.cfg_path.display());

        // Workerにも設定更新を通知する。
        app.worker_tx
            .send(WorkerCmd::SaveSettings(app.cfg.clone()))
            .await?;
        // 次のジョブの切り替えも新しい既定値に合わせる。
        app.toggles = app.cfg.job_toggles();
        app.ui.screen = Screen::Main;
        app.ui.status = "Saved settings".into();
    } else if shortcuts::matches_shortcut(&k, &sc.download_dir) {
        // 保存先ディレクトリの入力ボックスを開く。
        app.input_box = Some(InputBoxState::new(
            "Download directory:",
            app.draft.download_dir.display().to_string(),
            InputCallbackId::SettingsDownloadDir,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.cookies) {
        // クッキー取得元ブラウザを順に切り替える。
        app.draft.cookies_browser =
            config::next_cookie_browser(app.draft.cookies_browser.as_deref());
    } else if shortcuts::matches_shortcut(&k, &sc.auto_upload) {
        app.draft.auto_upload = !app.draft.auto_upload;
    } else if shortcuts::matches_shortcut(&k, &sc.skip_conversion) {
        app.draft.skip_conversion = !app.draft.skip_conversion;
    } else if shortcuts::matches_shortcut(&k, &sc.backend) {
        app.draft.execution_backend = app.draft.execution_backend.toggled();
    } else if shortcuts::matches_shortcut(&k, &sc.image) {
        // コンテナイメージの入力ボックスを開く。
        app.input_box = Some(InputBoxState::new(
            "Container image (empty = default):",
            app.draft.container_image.clone().unwrap_or_default(),
            InputCallbackId::SettingsContainerImage,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.verbose) {
        app.draft.verbose = !app.draft.verbose;
    }

    Ok(false)
}

/// 入力ボックスのキー処理。
async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックスが無ければ何もしない。
    let Some(input_state) = &mut app.input_box else {
        return Ok(false);
    };

    // 入力ボックス用ショートカットを参照する。
    let sc = &app.shortcuts.input_box;

    // 入力ボックス中でもCtrl+Cで終了できるようにする。
    if is_ctrl_c(&k) {
        return Ok(true);
    }

    if shortcuts::matches_shortcut(&k, &sc.confirm) {
        // 入力ボックスを閉じる前に値とコールバック種別を保存する。
        let value = input_state.value.clone();
        let callback_id = input_state.callback_id;
        app.input_box = None;

        // コールバック種別に応じて値を反映する。
        apply_input_callback(app, callback_id, value).await?;
    } else if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 入力を破棄して入力ボックスを閉じる。
        app.input_box = None;
    } else if shortcuts::matches_shortcut(&k, &sc.backspace) {
        input_state.backspace();
    } else if shortcuts::matches_shortcut(&k, &sc.delete) {
        input_state.delete();
    } else if shortcuts::matches_shortcut(&k, &sc.left) {
        input_state.move_left();
    } else if shortcuts::matches_shortcut(&k, &sc.right) {
        input_state.move_right();
    } else if shortcuts::matches_shortcut(&k, &sc.home) {
        input_state.move_home();
    } else if shortcuts::matches_shortcut(&k, &sc.end) {
        input_state.move_end();
    } else if shortcuts::matches_shortcut(&k, &sc.clear_line) {
        input_state.clear_line();
    } else if let KeyCode::Char(c) = k.code {
        // コントロールキーでない場合のみ挿入する。
        if !k.modifiers.contains(KeyModifiers::CONTROL) {
            input_state.insert_char(c);
        }
    }

    Ok(false)
}

/// 入力ボックスのコールバックを適用する。
async fn apply_input_callback(
    app: &mut App,
    callback_id: InputCallbackId,
    value: String,
) -> Result<()> {
    match callback_id {
        InputCallbackId::AddUrl => submit_url(app, value).await?,
        InputCallbackId::CustomName => {
            // 空欄なら動画タイトルに戻す。
            let name = value.trim();
            app.pending_name = (!name.is_empty()).then(|| name.to_string());
            app.ui.status = match &app.pending_name {
                Some(n) => format!("Next job will be saved as {n:?}"),
                None => "Next job uses the video title".into(),
            };
        }
        InputCallbackId::SettingsDownloadDir => {
            if let Some(dir) = expand_dir(&value) {
                app.draft.download_dir = dir;
            }
        }
        InputCallbackId::SettingsContainerImage => {
            let image = value.trim();
            app.draft.container_image = (!image.is_empty()).then(|| image.to_string());
        }
    }
    Ok(())
}

/// `~/` をホームディレクトリに展開する。空欄はNone。
fn expand_dir(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return Some(home.join(rest));
    }
    Some(PathBuf::from(value))
}

/// 表示用のon/off。
pub fn on_off(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_dir() {
        // 空欄は無視し、それ以外はパスとして受け取る。
        assert_eq!(expand_dir("   "), None);
        assert_eq!(expand_dir("/srv/dl"), Some(PathBuf::from("/srv/dl")));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_dir("~/Videos"), Some(home.join("Videos")));
        }
    }
}
