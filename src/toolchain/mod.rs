//! External converter and compiler processes.
//!
//! Both tools are opaque: they are located, spawned with a fixed argument
//! contract, and judged by exit status. Their stderr is kept verbatim and also
//! split into [`Diagnostic`]s.

mod compiler;
mod converter;
mod diagnostics;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

pub use compiler::{Compiler, TypstCompiler};
pub use converter::{Converter, PandocConverter};
pub use diagnostics::{headline, parse_diagnostics, Diagnostic, Severity};

use crate::config::{AppConfig, ToolConfig};

/// Errors from one invocation of an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} executable not found: {}", .program.display())]
    MissingExecutable { tool: String, program: PathBuf },

    #[error("conversion failed with exit code {code:?}")]
    Conversion {
        code: Option<i32>,
        stderr: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("compilation failed with exit code {code:?}")]
    Compile {
        code: Option<i32>,
        stderr: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A configured executable and the name it is reported under.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: &'static str,
    config: ToolConfig,
}

impl ExternalTool {
    pub fn new(name: &'static str, config: ToolConfig) -> Self {
        Self { name, config }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Find the executable without running it.
    ///
    /// A path with a directory part must exist as given. A bare name is looked
    /// up in `bin/` next to the running executable, then on `PATH`.
    pub fn locate(&self) -> Result<PathBuf, ToolError> {
        let program = &self.config.program;
        let missing = || ToolError::MissingExecutable {
            tool: self.name.to_string(),
            program: program.clone(),
        };

        let is_bare = program.components().count() == 1 && !program.is_absolute();
        if !is_bare {
            return if program.is_file() { Ok(program.clone()) } else { Err(missing()) };
        }

        if let Some(bundled) = bundled_path(program) {
            return Ok(bundled);
        }

        which::which(program).map_err(|_| missing())
    }

    /// A command for `program` with the configured leading arguments, ready for
    /// the contract arguments to be appended.
    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.config.args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn bundled_path(program: &Path) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let mut name = program.as_os_str().to_os_string();
    name.push(std::env::consts::EXE_SUFFIX);
    let candidate = exe.parent()?.join("bin").join(name);
    candidate.is_file().then_some(candidate)
}

/// Drain a child's stderr pipe to a string, lossily.
async fn read_stderr(stderr: Option<tokio::process::ChildStderr>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut stderr) = stderr {
        stderr.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// The converter and compiler configured for this installation.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub converter: ExternalTool,
    pub compiler: ExternalTool,
}

impl Toolchain {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            converter: ExternalTool::new("converter", config.converter.clone()),
            compiler: ExternalTool::new("compiler", config.compiler.clone()),
        }
    }

    /// Tools that cannot be located, as `(name, configured program)`.
    pub fn missing(&self) -> Vec<(&'static str, PathBuf)> {
        [&self.converter, &self.compiler]
            .into_iter()
            .filter(|tool| tool.locate().is_err())
            .map(|tool| (tool.name(), tool.config.program.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_path_is_reported() {
        let tool = ExternalTool::new("compiler", ToolConfig::new("/definitely/not/here/typst"));
        match tool.locate() {
            Err(ToolError::MissingExecutable { tool, program }) => {
                assert_eq!(tool, "compiler");
                assert_eq!(program, PathBuf::from("/definitely/not/here/typst"));
            }
            other => panic!("expected MissingExecutable, got {:?}", other),
        }
    }

    #[test]
    fn unknown_bare_name_is_missing() {
        let tool = ExternalTool::new("converter", ToolConfig::new("thesisflow-no-such-tool-1b2c"));
        assert!(matches!(tool.locate(), Err(ToolError::MissingExecutable { .. })));
    }
}
