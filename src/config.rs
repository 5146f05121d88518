//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{backend::BackendKind, jobs::JobToggles};

/// Browsers yt-dlp can read cookies from.
pub const COOKIE_BROWSERS: [&str; 5] = ["chrome", "firefox", "safari", "edge", "brave"];

/// Top-level configuration stored in `config.toml`.
///
/// Every field has a default so files written by older versions still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where downloads and converted files land.
    pub download_dir: PathBuf,
    /// Upload finished files by default.
    pub auto_upload: bool,
    /// Keep the downloaded container as-is.
    pub skip_conversion: bool,
    /// Browser to borrow cookies from; `None` disables cookie attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies_browser: Option<String>,
    /// Host tools or a container runtime.
    pub execution_backend: BackendKind,
    /// Image override for the container backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// Mirror raw tool output into the log panel.
    pub verbose: bool,
}

impl Config {
    /// Load from disk or create defaults when missing.
    ///
    /// A file that does not parse is left alone and defaults are used.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            match toml::from_str(&s) {
                Ok(cfg) => Ok(cfg),
                Err(e) => {
                    tracing::warn!("config at {} is invalid, using defaults: {e}", path.display());
                    Ok(Self::default())
                }
            }
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    /// Phase toggles a new job starts with.
    pub fn job_toggles(&self) -> JobToggles {
        JobToggles {
            convert: !self.skip_conversion,
            upload: self.auto_upload,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Downloads")
                .join("yt_tmp"),
            auto_upload: false,
            skip_conversion: false,
            cookies_browser: None,
            execution_backend: BackendKind::Local,
            container_image: None,
            verbose: true,
        }
    }
}

/// `<config dir>/dl-video`, falling back to the working directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dl-video")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Next entry in the settings screen's cookie cycle: none, then each browser.
pub fn next_cookie_browser(current: Option<&str>) -> Option<String> {
    let next = match current {
        None => 0,
        Some(b) => match COOKIE_BROWSERS.iter().position(|c| *c == b) {
            Some(i) => i + 1,
            None => 0,
        },
    };
    COOKIE_BROWSERS.get(next).map(|b| b.to_string())
}
