//! キーバインド設定（`shortcut.toml`）の読み込みと照合。
//!
//! 各キーは `"q"`, `"Enter"`, `"Ctrl+u"` のような文字列で書く。
//! ファイルに無いセクションや項目は既定値で補う。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// キー文字列を解析した結果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyChord {
    /// 押されたキーがこの組み合わせか判定する。
    pub fn matches(&self, key: &KeyEvent) -> bool {
        // 大文字はShift付きで届く端末とそうでない端末がある。
        let actual = match key.code {
            KeyCode::Char(c) if c.is_uppercase() => key.modifiers.difference(KeyModifiers::SHIFT),
            _ => key.modifiers,
        };
        key.code == self.code && actual == self.modifiers
    }
}

/// `"Ctrl+u"` 形式の文字列を解析する。解釈できなければNone。
pub fn parse_key(spec: &str) -> Option<KeyChord> {
    let (mods, key) = match spec.rsplit_once('+') {
        // "+" 単体や "Ctrl++" はキー本体を "+" とみなす。
        Some((head, "")) => (head.strip_suffix('+').unwrap_or(head), "+"),
        Some((head, key)) => (head, key),
        None => ("", spec),
    };

    let mut modifiers = KeyModifiers::empty();
    for m in mods.split('+').filter(|m| !m.is_empty()) {
        modifiers |= match m.to_ascii_lowercase().as_str() {
            "ctrl" => KeyModifiers::CONTROL,
            "alt" => KeyModifiers::ALT,
            "shift" => KeyModifiers::SHIFT,
            _ => return None,
        };
    }

    let code = match key.to_ascii_lowercase().as_str() {
        "enter" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" => KeyCode::Delete,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "space" => KeyCode::Char(' '),
        _ => {
            // 1文字だけなら大文字小文字を区別してCharにする。
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return None,
            }
        }
    };
    Some(KeyChord { code, modifiers })
}

/// KeyEventがいずれかのキー文字列と一致するか判定する。
pub fn matches_shortcut(key: &KeyEvent, bindings: &[String]) -> bool {
    bindings
        .iter()
        .filter_map(|s| parse_key(s))
        .any(|chord| chord.matches(key))
}

/// `shortcut.toml` 全体。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Shortcuts {
    pub main: MainShortcuts,
    pub settings: SettingsShortcuts,
    pub input_box: InputBoxShortcuts,
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// メイン画面。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainShortcuts {
    pub quit: Vec<String>,
    pub settings: Vec<String>,
    pub add: Vec<String>,
    pub name: Vec<String>,
    pub cancel: Vec<String>,
    pub cancel_all: Vec<String>,
    pub toggle_convert: Vec<String>,
    pub toggle_upload: Vec<String>,
    pub clear_history: Vec<String>,
    pub down: Vec<String>,
    pub up: Vec<String>,
}

impl Default for MainShortcuts {
    fn default() -> Self {
        Self {
            quit: keys(&["q"]),
            settings: keys(&["t"]),
            add: keys(&["a"]),
            name: keys(&["n"]),
            cancel: keys(&["x"]),
            cancel_all: keys(&["Esc", "X"]),
            toggle_convert: keys(&["c"]),
            toggle_upload: keys(&["u"]),
            clear_history: keys(&["H"]),
            down: keys(&["Down", "j"]),
            up: keys(&["Up", "k"]),
        }
    }
}

/// 設定画面。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsShortcuts {
    pub cancel: Vec<String>,
    pub save: Vec<String>,
    pub download_dir: Vec<String>,
    pub cookies: Vec<String>,
    pub auto_upload: Vec<String>,
    pub skip_conversion: Vec<String>,
    pub backend: Vec<String>,
    pub image: Vec<String>,
    pub verbose: Vec<String>,
}

impl Default for SettingsShortcuts {
    fn default() -> Self {
        Self {
            cancel: keys(&["Esc"]),
            save: keys(&["Enter"]),
            download_dir: keys(&["d"]),
            cookies: keys(&["b"]),
            auto_upload: keys(&["u"]),
            skip_conversion: keys(&["c"]),
            backend: keys(&["e"]),
            image: keys(&["i"]),
            verbose: keys(&["v"]),
        }
    }
}

/// 入力ボックス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Default for InputBoxShortcuts {
    fn default() -> Self {
        Self {
            confirm: keys(&["Enter"]),
            cancel: keys(&["Esc"]),
            backspace: keys(&["Backspace"]),
            delete: keys(&["Delete"]),
            left: keys(&["Left"]),
            right: keys(&["Right"]),
            home: keys(&["Home", "Ctrl+a"]),
            end: keys(&["End", "Ctrl+e"]),
            clear_line: keys(&["Ctrl+u"]),
        }
    }
}

impl Shortcuts {
    /// ファイルが無ければ既定値。壊れていれば警告して既定値を使う。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match toml::from_str::<Shortcuts>(&content) {
            Ok(sc) => {
                sc.warn_unparsable();
                Ok(sc)
            }
            Err(e) => {
                tracing::warn!("{} is invalid, using default keys: {e}", path.display());
                Ok(Self::default())
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 解釈できないキー文字列をログに残す（照合では無視される）。
    fn warn_unparsable(&self) {
        let m = &self.main;
        let s = &self.settings;
        let i = &self.input_box;
        let all = [
            &m.quit, &m.settings, &m.add, &m.name, &m.cancel, &m.cancel_all,
            &m.toggle_convert, &m.toggle_upload, &m.clear_history, &m.down, &m.up,
            &s.cancel, &s.save, &s.download_dir, &s.cookies, &s.auto_upload,
            &s.skip_conversion, &s.backend, &s.image, &s.verbose,
            &i.confirm, &i.cancel, &i.backspace, &i.delete, &i.left, &i.right,
            &i.home, &i.end, &i.clear_line,
        ];
        for spec in all.into_iter().flatten() {
            if parse_key(spec).is_none() {
                tracing::warn!("ignoring unknown key binding {spec:?}");
            }
        }
    }
}
