use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{parse_diagnostics, read_stderr, ExternalTool, ToolError};

/// Turns the master document into the final artifact.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Fail with [`ToolError::MissingExecutable`] without spawning anything.
    fn ensure_available(&self) -> Result<(), ToolError>;

    /// Compile `master` into `output`, resolving absolute imports against `root`.
    async fn compile(&self, master: &Path, output: &Path, root: &Path) -> Result<(), ToolError>;

    /// Terminate the in-flight compile, if any. Calling it with nothing running does nothing.
    fn cancel(&self);
}

/// Typst-style compiler: `<exe> compile <input> <output> --root <root>`.
#[derive(Debug)]
pub struct TypstCompiler {
    tool: ExternalTool,
    next_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    token: CancellationToken,
}

impl TypstCompiler {
    pub fn new(tool: ExternalTool) -> Self {
        Self {
            tool,
            next_id: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    fn begin(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut in_flight = self.in_flight.lock().expect("compiler lock poisoned");
        let previous = in_flight.replace(InFlight {
            id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        (id, token)
    }

    fn finish(&self, id: u64) {
        let mut in_flight = self.in_flight.lock().expect("compiler lock poisoned");
        // A newer compile may have replaced ours.
        if in_flight.as_ref().is_some_and(|f| f.id == id) {
            *in_flight = None;
        }
    }
}

#[async_trait]
impl Compiler for TypstCompiler {
    fn ensure_available(&self) -> Result<(), ToolError> {
        self.tool.locate().map(|_| ())
    }

    async fn compile(&self, master: &Path, output: &Path, root: &Path) -> Result<(), ToolError> {
        let program = self.tool.locate()?;

        let mut cmd = self.tool.command(&program);
        cmd.arg("compile").arg(master).arg(output).arg("--root").arg(root);
        tracing::debug!(?cmd, "Spawning compiler");

        let (id, token) = self.begin();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.finish(id);
                return Err(e.into());
            }
        };
        let stderr = tokio::spawn(read_stderr(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = token.cancelled() => {
                tracing::info!("Cancelling compiler process");
                let _ = child.kill().await;
                self.finish(id);
                return Err(ToolError::Cancelled);
            }
        };
        self.finish(id);

        let status = status?;
        let stderr = stderr
            .await
            .map_err(std::io::Error::other)??;

        if status.success() {
            Ok(())
        } else {
            tracing::debug!(code = ?status.code(), %stderr, "Compiler failed");
            Err(ToolError::Compile {
                code: status.code(),
                diagnostics: parse_diagnostics(&stderr),
                stderr,
            })
        }
    }

    fn cancel(&self) {
        let in_flight = self.in_flight.lock().expect("compiler lock poisoned");
        if let Some(current) = in_flight.as_ref() {
            current.token.cancel();
        }
    }
}
