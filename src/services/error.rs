//! Phase-boundary errors. Cancellation is a variant, never a message match.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Metadata fetch cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Download cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Conversion cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl MetadataError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MetadataError::Cancelled)
    }
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl ConversionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConversionError::Cancelled)
    }
}

impl UploadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

/// Any phase failure, as seen by the workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    /// Anything outside the four phase services (filesystem, bookkeeping).
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PhaseError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            PhaseError::Metadata(e) => e.is_cancelled(),
            PhaseError::Download(e) => e.is_cancelled(),
            PhaseError::Conversion(e) => e.is_cancelled(),
            PhaseError::Upload(e) => e.is_cancelled(),
            PhaseError::Unexpected(_) => false,
        }
    }
}

impl From<std::io::Error> for PhaseError {
    fn from(e: std::io::Error) -> Self {
        PhaseError::Unexpected(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_a_variant_not_a_message() {
        assert!(DownloadError::Cancelled.is_cancelled());
        // A failure whose text mentions cancellation is still a failure.
        assert!(!DownloadError::Failed("user cancelled the stream".into()).is_cancelled());

        let e: PhaseError = ConversionError::Cancelled.into();
        assert!(e.is_cancelled());
        assert_eq!(e.to_string(), "Conversion cancelled");

        let e: PhaseError = UploadError::Failed("Cannot upload empty file".into()).into();
        assert!(!e.is_cancelled());
        assert_eq!(e.to_string(), "Cannot upload empty file");
    }

    #[test]
    fn test_io_errors_are_unexpected() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let e = PhaseError::from(io);
        assert!(!e.is_cancelled());
        assert_eq!(e.to_string(), "Unexpected error: disk full");
        assert!(!MetadataError::Failed("x".into()).is_cancelled());
        assert!(MetadataError::Cancelled.is_cancelled());
    }
}
