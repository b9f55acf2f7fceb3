use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::toolchain::{headline, Diagnostic, ToolError};

/// Why a build run did not produce an artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{tool} executable not found: {}", .program.display())]
    MissingExecutable { tool: String, program: PathBuf },

    #[error("converting chapter {chapter} failed: {}", headline(.diagnostics).unwrap_or("no output"))]
    Conversion {
        chapter: String,
        stderr: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("compilation failed: {}", headline(.diagnostics).unwrap_or("no output"))]
    Compile {
        stderr: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fieldless classification of [`BuildError`] for callers that only branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildErrorKind {
    MissingExecutable,
    ConversionFailure,
    CompileFailure,
    Cancelled,
    Io,
}

impl BuildError {
    pub fn kind(&self) -> BuildErrorKind {
        match self {
            Self::MissingExecutable { .. } => BuildErrorKind::MissingExecutable,
            Self::Conversion { .. } => BuildErrorKind::ConversionFailure,
            Self::Compile { .. } => BuildErrorKind::CompileFailure,
            Self::Cancelled => BuildErrorKind::Cancelled,
            Self::Io(_) => BuildErrorKind::Io,
        }
    }

    /// User-initiated aborts need no error report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Conversion { diagnostics, .. } | Self::Compile { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }

    /// Attach chapter context to a converter failure.
    pub(crate) fn from_conversion(chapter: &str, err: ToolError) -> Self {
        match err {
            ToolError::Conversion {
                stderr,
                diagnostics,
                ..
            } => Self::Conversion {
                chapter: chapter.to_string(),
                stderr,
                diagnostics,
            },
            other => other.into(),
        }
    }
}

impl From<ToolError> for BuildError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::MissingExecutable { tool, program } => Self::MissingExecutable { tool, program },
            ToolError::Conversion {
                stderr,
                diagnostics,
                ..
            } => Self::Conversion {
                chapter: String::new(),
                stderr,
                diagnostics,
            },
            ToolError::Compile {
                stderr,
                diagnostics,
                ..
            } => Self::Compile { stderr, diagnostics },
            ToolError::Cancelled => Self::Cancelled,
            ToolError::Io(e) => Self::Io(e),
        }
    }
}
