//! Video metadata as reported by the downloader's JSON dump.

use serde::Deserialize;

/// Immutable metadata snapshot. Display helpers derive from stored fields only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    /// The URL the job was started with.
    pub url: String,
    /// Canonical page URL as resolved by the downloader.
    pub webpage_url: Option<String>,
    /// Seconds.
    pub duration: u64,
    pub uploader: String,
    pub uploader_id: Option<String>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    /// `YYYYMMDD` as the tool reports it.
    pub upload_date: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    /// `WIDTHxHEIGHT`.
    pub resolution: Option<String>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Source-site identifier (e.g. `youtube`).
    pub extractor: Option<String>,
}

/// Raw shape of the JSON dump; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    title: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    uploader_id: Option<String>,
    channel: Option<String>,
    channel_id: Option<String>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    comment_count: Option<u64>,
    upload_date: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
    categories: Option<Vec<String>>,
    width: Option<u64>,
    height: Option<u64>,
    fps: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    thumbnail: Option<String>,
    extractor: Option<String>,
}

impl VideoMetadata {
    /// Parse one JSON object. Missing optional fields become `None`/empty.
    pub fn from_json(url: &str, json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMetadata = serde_json::from_str(json)?;
        let resolution = match (raw.width, raw.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{w}x{h}")),
            _ => None,
        };
        Ok(Self {
            title: raw
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unknown".into()),
            url: url.to_string(),
            webpage_url: raw.webpage_url.filter(|u| !u.is_empty()),
            duration: raw.duration.filter(|d| *d > 0.0).map(|d| d as u64).unwrap_or(0),
            uploader: raw
                .uploader
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "Unknown".into()),
            uploader_id: raw.uploader_id,
            channel: raw.channel,
            channel_id: raw.channel_id,
            view_count: raw.view_count,
            like_count: raw.like_count,
            comment_count: raw.comment_count,
            upload_date: raw.upload_date,
            description: raw.description,
            tags: raw.tags.unwrap_or_default(),
            categories: raw.categories.unwrap_or_default(),
            resolution,
            fps: raw.fps,
            vcodec: raw.vcodec,
            acodec: raw.acodec,
            thumbnail_url: raw.thumbnail,
            extractor: raw.extractor,
        })
    }

    /// `H:MM:SS` for an hour or more, otherwise `M:SS`.
    pub fn duration_display(&self) -> String {
        let h = self.duration / 3600;
        let m = (self.duration % 3600) / 60;
        let s = self.duration % 60;
        if h > 0 {
            format!("{h}:{m:02}:{s:02}")
        } else {
            format!("{m}:{s:02}")
        }
    }

    /// `YYYY-MM-DD`, or the raw value when it is not an 8-digit date.
    pub fn upload_date_display(&self) -> Option<String> {
        let d = self.upload_date.as_deref()?;
        if d.len() == 8 && d.chars().all(|c| c.is_ascii_digit()) {
            Some(format!("{}-{}-{}", &d[0..4], &d[4..6], &d[6..8]))
        } else {
            Some(d.to_string())
        }
    }

    pub fn view_count_display(&self) -> Option<String> {
        self.view_count.map(compact_count)
    }
}

/// `1234567` -> `1.2M`, `4500` -> `4.5K`.
fn compact_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
