//! Turns raw container-runtime output into a user-facing diagnosis.

use regex::{Regex, RegexBuilder};
use std::{sync::LazyLock, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerErrorKind {
    RuntimeNotInstalled,
    RuntimeUnhealthy,
    ImagePullFailed,
    ImageNotFound,
    ContainerStartFailed,
    VolumePermissionDenied,
    VolumePathNotFound,
    CommandFailed,
    Timeout,
    Unknown,
}

/// Structured diagnosis. Derived purely from text plus call-site context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerError {
    pub kind: ContainerErrorKind,
    pub message: String,
    pub details: Option<String>,
    pub suggestion: Option<String>,
}

impl ContainerError {
    fn new(kind: ContainerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            suggestion: None,
        }
    }

    fn details(mut self, details: &str) -> Self {
        if !details.is_empty() {
            self.details = Some(details.to_string());
        }
        self
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Message, then `Details: ...`, then `Suggestion: ...`, one per line.
    pub fn format_message(&self) -> String {
        let mut parts = vec![self.message.clone()];
        if let Some(d) = &self.details {
            parts.push(format!("Details: {d}"));
        }
        if let Some(s) = &self.suggestion {
            parts.push(format!("Suggestion: {s}"));
        }
        parts.join("\n")
    }
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_message())
    }
}

pub fn runtime_not_installed() -> ContainerError {
    ContainerError::new(
        ContainerErrorKind::RuntimeNotInstalled,
        "Podman is not installed.",
    )
    .suggest(
        "Install it with: brew install podman (macOS) or \
         see https://podman.io/getting-started/installation",
    )
}

pub fn runtime_not_working(stderr: &str) -> ContainerError {
    ContainerError::new(
        ContainerErrorKind::RuntimeUnhealthy,
        "Podman is not working correctly.",
    )
    .details(stderr)
    .suggest(
        "Try running 'podman machine start' if using Podman Desktop, or \
         check your Podman installation with 'podman info'",
    )
}

pub fn image_pull_failed(image: &str, output: &str) -> ContainerError {
    let lower = output.to_lowercase();
    let suggestion = if lower.contains("unauthorized") || lower.contains("authentication") {
        "The image may require authentication. \
         Try 'podman login' if accessing a private registry."
            .to_string()
    } else if lower.contains("not found") || lower.contains("manifest unknown") {
        format!("The image '{image}' was not found. Check the image name and tag are correct.")
    } else if lower.contains("timeout") || lower.contains("connection") {
        "Check your internet connection and try again. \
         You may also try a different registry mirror."
            .to_string()
    } else {
        format!(
            "Check your internet connection and verify the image name is correct. \
             You can try pulling manually with: podman pull {image}"
        )
    };
    ContainerError::new(
        ContainerErrorKind::ImagePullFailed,
        format!("Failed to pull container image '{image}'."),
    )
    .details(output)
    .suggest(suggestion)
}

pub fn image_not_found(image: &str) -> ContainerError {
    ContainerError::new(
        ContainerErrorKind::ImageNotFound,
        format!("Container image '{image}' not found locally."),
    )
    .suggest(format!("Pull the image with: podman pull {image}"))
}

pub fn container_start_failed(stderr: &str, logs: &str) -> ContainerError {
    let mut details = Vec::new();
    if !stderr.is_empty() {
        details.push(format!("Error: {stderr}"));
    }
    if !logs.is_empty() {
        details.push(format!("Container logs: {logs}"));
    }
    ContainerError::new(
        ContainerErrorKind::ContainerStartFailed,
        "Container failed to start.",
    )
    .details(&details.join("\n"))
    .suggest(
        "Check that Podman is running correctly with 'podman info'. \
         If using Podman Desktop, ensure the machine is started.",
    )
}

pub fn volume_permission_denied(path: &str, output: &str) -> ContainerError {
    ContainerError::new(
        ContainerErrorKind::VolumePermissionDenied,
        format!("Cannot access directory '{path}'."),
    )
    .details(output)
    .suggest(format!(
        "Check that the directory exists and has correct permissions. \
         On SELinux systems, try: chcon -Rt svirt_sandbox_file_t {path}"
    ))
}

pub fn volume_path_not_found(path: &str) -> ContainerError {
    ContainerError::new(
        ContainerErrorKind::VolumePathNotFound,
        format!("Directory '{path}' does not exist."),
    )
    .suggest(format!("Create the directory with: mkdir -p {path}"))
}

pub fn command_timeout(command: &str, after: Duration) -> ContainerError {
    let secs = after.as_secs();
    let elapsed = if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{secs} seconds")
    };
    ContainerError::new(
        ContainerErrorKind::Timeout,
        format!("Operation timed out after {elapsed}."),
    )
    .details(&format!("Command: {command}"))
    .suggest(
        "The operation may be taking longer than expected. \
         Check your network connection or try again later.",
    )
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
}

static PERMISSION_PATHS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"permission denied[:\s]+['"]?([^'":\n]+)['"]?"#,
        r#"cannot access[:\s]+['"]?([^'":\n]+)['"]?"#,
        r#"open[:\s]+['"]?([^'":\n]+)['"]?[:\s]+permission denied"#,
    ])
});

static NOT_FOUND_PATHS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"no such file or directory[:\s]+['"]?([^'":\n]+)['"]?"#,
        r#"['"]?([^'":\n]+)['"]?[:\s]+no such file or directory"#,
        r#"cannot find[:\s]+['"]?([^'":\n]+)['"]?"#,
    ])
});

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Classify one chunk of output. `None` only means no known pattern matched.
pub fn detect(output: &str, context: &str) -> Option<ContainerError> {
    let lower = output.to_lowercase();

    if lower.contains("permission denied") || lower.contains("selinux") || lower.contains("avc:")
    {
        let path = first_capture(&PERMISSION_PATHS, output).unwrap_or_else(|| context.to_string());
        return Some(volume_permission_denied(&path, output));
    }

    if lower.contains("no such file or directory")
        && let Some(path) = first_capture(&NOT_FOUND_PATHS, output)
    {
        return Some(volume_path_not_found(&path));
    }

    if lower.contains("image not known") || lower.contains("unable to find image") {
        return Some(image_not_found(context));
    }

    if lower.contains("connection refused") || lower.contains("cannot connect") {
        return Some(
            ContainerError::new(
                ContainerErrorKind::RuntimeUnhealthy,
                "Cannot connect to Podman.",
            )
            .details(output)
            .suggest(
                "Ensure Podman is running. If using Podman Desktop, \
                 start the Podman machine with 'podman machine start'.",
            ),
        );
    }

    None
}
