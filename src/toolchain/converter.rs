use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{parse_diagnostics, read_stderr, ExternalTool, ToolError};

/// Turns one chapter's markdown into an intermediate-markup fragment.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Fail with [`ToolError::MissingExecutable`] without spawning anything.
    fn ensure_available(&self) -> Result<(), ToolError>;

    /// Convert `markdown` and materialize the result at `output`.
    async fn convert(&self, markdown: &str, output: &Path) -> Result<(), ToolError>;
}

/// Pandoc-style converter: `<exe> --from <fmt> --to <fmt> --output <path>`,
/// markdown on stdin.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    tool: ExternalTool,
    from: String,
    to: String,
}

impl PandocConverter {
    pub fn new(tool: ExternalTool, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            tool,
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl Converter for PandocConverter {
    fn ensure_available(&self) -> Result<(), ToolError> {
        self.tool.locate().map(|_| ())
    }

    async fn convert(&self, markdown: &str, output: &Path) -> Result<(), ToolError> {
        let program = self.tool.locate()?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = self.tool.command(&program);
        cmd.arg("--from")
            .arg(&self.from)
            .arg("--to")
            .arg(&self.to)
            .arg("--output")
            .arg(output)
            .stdin(Stdio::piped());
        tracing::debug!(?cmd, "Spawning converter");

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let write_input = async move {
            if let Some(mut stdin) = stdin {
                // The tool may exit before reading everything; its exit status decides.
                match stdin.write_all(markdown.as_bytes()).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
                drop(stdin);
            }
            Ok(())
        };

        let (written, stderr, status) =
            tokio::join!(write_input, read_stderr(stderr), child.wait());
        written?;
        let stderr = stderr?;
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            tracing::debug!(code = ?status.code(), %stderr, "Converter failed");
            Err(ToolError::Conversion {
                code: status.code(),
                diagnostics: parse_diagnostics(&stderr),
                stderr,
            })
        }
    }
}
