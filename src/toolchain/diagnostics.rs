//! Classification of external tool stderr into structured diagnostics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    /// `error:` wins over `warning:`; anything else is informational.
    pub fn classify(line: &str) -> Self {
        let lower = line.to_lowercase();
        if lower.contains("error:") {
            Self::Error
        } else if lower.contains("warning:") {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

/// One line of tool output with its classification. `message` is the raw line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Split stderr into diagnostics, one per non-blank line, in original order.
pub fn parse_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    stderr
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| Diagnostic {
            severity: Severity::classify(line),
            message: line.to_string(),
        })
        .collect()
}

/// The first error line, falling back to the first line of any kind.
pub fn headline(diagnostics: &[Diagnostic]) -> Option<&str> {
    diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
        .or_else(|| diagnostics.first())
        .map(|d| d.message.as_str())
}
