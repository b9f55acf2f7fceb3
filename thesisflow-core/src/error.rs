use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors raised while loading, mutating or persisting a project.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Manifest not found at {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Manifest at {} is corrupt: {reason}", .path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("Path escapes the project root: {0}")]
    UnsafePath(String),

    #[error("Duplicate id in manifest: {0}")]
    DuplicateId(String),

    #[error("Chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("Paragraph {paragraph} not found in chapter {chapter}")]
    ParagraphNotFound { chapter: String, paragraph: String },

    #[error("Project already exists: {}", .0.display())]
    ProjectExists(PathBuf),

    #[error("Refusing to touch {}: not inside the projects root", .0.display())]
    OutsideProjectsRoot(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a fresh manifest may replace the on-disk one after the user confirms.
    pub fn is_recoverable_with_reset(&self) -> bool {
        matches!(self, Self::ManifestCorrupt { .. })
    }
}
