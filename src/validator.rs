//! Gatekeeping for URLs entered by the user.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// Sites we recognise explicitly. The downloader supports many more.
const SUPPORTED_PATTERNS: &[&str] = &[
    r"^https?://(www\.)?youtube\.com/watch\?v=[\w-]+",
    r"^https?://youtu\.be/[\w-]+",
    r"^https?://(www\.)?vimeo\.com/\d+",
    r"^https?://(www\.)?twitter\.com/.+/status/\d+",
    r"^https?://(www\.)?x\.com/.+/status/\d+",
    r"^https?://(www\.)?twitch\.tv/.+",
    r"^https?://(www\.)?dailymotion\.com/video/[\w-]+",
    r"^https?://(www\.)?tiktok\.com/.+",
    r"^https?://(www\.)?instagram\.com/(p|reel)/[\w-]+",
    r"^https?://(www\.)?facebook\.com/.+/videos/\d+",
];

static COMPILED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SUPPORTED_PATTERNS
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    pub accepted: bool,
    pub message: String,
}

impl Validation {
    fn accept(message: &str) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }

    fn reject(message: &str) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}

/// Deterministic check run before a job is accepted.
pub fn validate_url(url: &str) -> Validation {
    let url = url.trim();
    if url.is_empty() {
        return Validation::reject("URL cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Validation::reject("URL must start with http:// or https://");
    }
    if COMPILED.iter().any(|re| re.is_match(url)) {
        return Validation::accept("Valid URL");
    }
    Validation::accept("URL format not recognized, but will attempt download")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_blank_rejected() {
        assert!(!validate_url("").accepted);
        assert_eq!(validate_url("   ").message, "URL cannot be empty");
    }

    #[test]
    fn test_scheme_required() {
        let v = validate_url("youtube.com/watch?v=abc");
        assert!(!v.accepted);
        assert_eq!(v.message, "URL must start with http:// or https://");
    }

    #[test]
    fn test_known_sites() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "http://vimeo.com/123456",
            "https://x.com/someone/status/1234",
            "https://www.instagram.com/reel/AbC-123",
            "https://WWW.YouTube.COM/watch?v=abc",
        ] {
            let v = validate_url(url);
            assert!(v.accepted, "{url}");
            assert_eq!(v.message, "Valid URL", "{url}");
        }
    }

    #[test]
    fn test_scheme_is_case_sensitive() {
        // Only the host part is matched case-insensitively.
        let v = validate_url("HTTPS://WWW.YOUTUBE.COM/watch?v=abc");
        assert!(!v.accepted);
        assert_eq!(v.message, "URL must start with http:// or https://");
    }

    #[test]
    fn test_unknown_site_still_accepted() {
        let v = validate_url("https://example.org/some/video");
        assert!(v.accepted);
        assert!(v.message.contains("not recognized"));
    }

    #[test]
    fn test_deterministic() {
        let url = "https://vimeo.com/42";
        assert_eq!(validate_url(url), validate_url(url));
    }
}
