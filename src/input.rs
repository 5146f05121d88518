//! 1行入力のポップアップ（InputBox）。

use ratatui::{
    layout::{Alignment, Flex, Position},
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph},
};

/// 入力確定時に値を渡す先。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputCallbackId {
    AddUrl,
    CustomName,
    SettingsDownloadDir,
    SettingsContainerImage,
}

impl InputCallbackId {
    /// ポップアップ下部に出す補足。
    fn hint(self) -> &'static str {
        match self {
            Self::AddUrl => "YouTube / Vimeo / X / TikTok ... の動画URL",
            Self::CustomName => "拡張子は不要。空欄で動画タイトルを使う",
            Self::SettingsDownloadDir => "~/ はホームディレクトリに展開される",
            Self::SettingsContainerImage => "空欄で既定のイメージを使う",
        }
    }
}

/// 入力中の状態。カーソルは文字単位（バイト位置ではない）。
#[derive(Clone, Debug)]
pub struct InputBoxState {
    pub prompt: String,
    pub value: String,
    pub cursor: usize,
    pub callback_id: InputCallbackId,
}

impl InputBoxState {
    /// 初期値を入れ、カーソルを末尾に置いた状態で開く。
    pub fn new(
        prompt: impl Into<String>,
        value: impl Into<String>,
        callback_id: InputCallbackId,
    ) -> Self {
        let value = value.into();
        Self {
            prompt: prompt.into(),
            cursor: value.chars().count(),
            value,
            callback_id,
        }
    }

    fn len(&self) -> usize {
        self.value.chars().count()
    }

    /// 文字位置をバイト位置に変換する。末尾は `value.len()`。
    fn byte_at(&self, char_idx: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_idx)
            .map_or(self.value.len(), |(i, _)| i)
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_at(self.cursor);
        self.value.insert(at, c);
        self.cursor += 1;
    }

    /// カーソル直前の1文字を消す。
    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_at(self.cursor);
        self.value.remove(at);
    }

    /// カーソル位置の1文字を消す。
    pub fn delete(&mut self) {
        if self.cursor < self.len() {
            let at = self.byte_at(self.cursor);
            self.value.remove(at);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.len());
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.len();
    }

    pub fn clear_line(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    /// 幅 `width` の欄に表示する先頭の文字位置。カーソルは常に見える。
    fn scroll_offset(&self, width: usize) -> usize {
        // 末尾のカーソル用に1桁空けておく。
        let room = width.saturating_sub(1);
        self.cursor.saturating_sub(room)
    }
}

/// InputBoxを画面中央に描画し、端末カーソルを入力位置に置く。
pub fn render_input_box(f: &mut Frame, state: &InputBoxState) {
    let area = centered(f.area(), 70, 7);
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Input ")
        .style(Style::default().bg(Color::DarkGray));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let [prompt, field, hint, keys] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(inner);

    f.render_widget(
        Paragraph::new(state.prompt.as_str())
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        prompt,
    );

    // 長い入力は横スクロールさせる。
    let offset = state.scroll_offset(field.width as usize);
    let visible: String = state
        .value
        .chars()
        .skip(offset)
        .take(field.width as usize)
        .collect();
    f.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Green)),
        field,
    );
    let column = (state.cursor - offset).min(field.width.saturating_sub(1) as usize) as u16;
    f.set_cursor_position(Position::new(field.x + column, field.y));

    f.render_widget(
        Paragraph::new(state.callback_id.hint()).style(Style::default().fg(Color::Gray)),
        hint,
    );
    f.render_widget(
        Paragraph::new("Enter=確定 | ESC=キャンセル | Ctrl+U=クリア")
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center),
        keys,
    );
}

/// `area` の中央に幅 `width_percent`%、高さ `height` 行の領域を取る。
fn centered(area: Rect, width_percent: u16, height: u16) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [cell] = Layout::horizontal([Constraint::Percentage(width_percent)])
        .flex(Flex::Center)
        .areas(row);
    cell
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editing_is_char_based() {
        // マルチバイト文字でもカーソルは文字単位で動く。
        let mut b = InputBoxState::new("URL:", "héllo", InputCallbackId::AddUrl);
        assert_eq!(b.cursor, 5);
        b.move_left();
        b.backspace();
        assert_eq!(b.value, "hélo");
        b.move_home();
        b.delete();
        b.insert_char('j');
        assert_eq!(b.value, "jélo");
        b.clear_line();
        assert_eq!((b.value.as_str(), b.cursor), ("", 0));
    }

    #[test]
    fn test_cursor_stays_within_bounds() {
        let mut b = InputBoxState::new("Name:", "日本", InputCallbackId::CustomName);
        b.move_right();
        assert_eq!(b.cursor, 2);
        b.delete();
        assert_eq!(b.value, "日本");
        b.move_home();
        b.move_left();
        b.backspace();
        assert_eq!((b.value.as_str(), b.cursor), ("日本", 0));
        b.insert_char('a');
        b.move_end();
        b.insert_char('z');
        assert_eq!(b.value, "a日本z");
    }

    #[test]
    fn test_scroll_keeps_cursor_visible() {
        let b = InputBoxState::new("URL:", "x".repeat(30), InputCallbackId::AddUrl);
        // 幅10では末尾9文字とカーソル用の1桁が見える。
        assert_eq!(b.scroll_offset(10), 21);
        assert_eq!(b.scroll_offset(40), 0);
        let mut head = b.clone();
        head.move_home();
        assert_eq!(head.scroll_offset(10), 0);
    }
}
