//! Build orchestration.
//!
//! A run resolves every chapter, converts the chapters (concurrently, bounded by
//! `parallelism`), writes the master document, compiles it, and atomically
//! replaces the project's artifact. Runs execute on a spawned task and report
//! through a [`BuildHandle`].
//!
//! Progress fractions: `0.0` preparing, `0.1` once the toolchain and working
//! directory are ready, `0.1 + 0.5·i/N` per converted chapter, `0.6`
//! assembling, `0.7` compiling, `1.0` succeeded.
//!
//! Only one run owns the toolchain at a time. Starting a run cancels the
//! previous one, and the new run waits for it to wind down before spawning any
//! process.

mod error;
mod progress;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use thesisflow_core::models::ProjectManifest;
use thesisflow_core::ProjectLayout;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use error::{BuildError, BuildErrorKind};
pub use progress::{BuildArtifact, BuildEvent, BuildHandle, BuildStage};

use crate::assembler;
use crate::config::AppConfig;
use crate::resolver::ContentResolver;
use crate::toolchain::{Compiler, Converter, PandocConverter, Toolchain, TypstCompiler};
use progress::ProgressReporter;

const FRAGMENTS_DIR: &str = "chapters";
const FRAGMENT_EXTENSION: &str = "typ";
const BIBLIOGRAPHY_INCLUDE: &str = "/references.bib";
const TEMPLATE_IMPORT: &str = "/template.typ";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// File name of the artifact at the project root.
    pub output_name: String,
    /// Maximum number of chapters converted at once.
    pub parallelism: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_name: "thesis.pdf".to_string(),
            parallelism: 4,
        }
    }
}

pub struct Pipeline {
    converter: Arc<dyn Converter>,
    compiler: Arc<dyn Compiler>,
    options: PipelineOptions,
    slot: Arc<tokio::sync::Mutex<()>>,
    active: Mutex<Option<CancellationToken>>,
    next_id: AtomicU64,
}

impl Pipeline {
    pub fn new(
        converter: Arc<dyn Converter>,
        compiler: Arc<dyn Compiler>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            converter,
            compiler,
            options,
            slot: Arc::new(tokio::sync::Mutex::new(())),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// A pipeline driving the configured converter and compiler executables.
    pub fn from_config(config: &AppConfig) -> Self {
        let toolchain = Toolchain::from_config(config);
        Self::new(
            Arc::new(PandocConverter::new(
                toolchain.converter,
                &config.converter_from,
                &config.converter_to,
            )),
            Arc::new(TypstCompiler::new(toolchain.compiler)),
            PipelineOptions {
                output_name: config.output_name.clone(),
                parallelism: config.parallelism(),
            },
        )
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Start building `manifest` for the project at `root` and return at once.
    ///
    /// The manifest is an owned snapshot; later edits do not affect this run.
    /// Must be called from within a Tokio runtime.
    pub fn run_async(&self, manifest: ProjectManifest, root: PathBuf) -> BuildHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let previous = self
            .active
            .lock()
            .expect("pipeline lock poisoned")
            .replace(cancel.clone());
        if let Some(previous) = previous {
            tracing::info!(run = id, "Superseding previous build");
            previous.cancel();
            self.compiler.cancel();
        }

        let run = Run {
            id,
            manifest,
            layout: ProjectLayout::new(root),
            converter: Arc::clone(&self.converter),
            compiler: Arc::clone(&self.compiler),
            options: self.options.clone(),
            slot: Arc::clone(&self.slot),
            cancel: cancel.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut progress = ProgressReporter::new(tx);
            let started = Instant::now();
            let outcome = run.execute(&mut progress).await;
            match &outcome {
                Ok(artifact) => tracing::info!(
                    run = run.id,
                    path = %artifact.path.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Build succeeded"
                ),
                Err(e) if e.is_cancelled() => tracing::info!(run = run.id, "Build cancelled"),
                Err(e) => tracing::error!(run = run.id, error = %e, "Build failed"),
            }
            progress.finish(outcome);
        });

        BuildHandle::new(id, rx, cancel, task)
    }

    /// Cancel the active run, if any. Safe to call repeatedly.
    pub fn cancel(&self) {
        if let Some(token) = self.active.lock().expect("pipeline lock poisoned").as_ref() {
            token.cancel();
        }
        self.compiler.cancel();
    }
}

/// Everything one run needs, detached from the [`Pipeline`] that started it.
struct Run {
    id: u64,
    manifest: ProjectManifest,
    layout: ProjectLayout,
    converter: Arc<dyn Converter>,
    compiler: Arc<dyn Compiler>,
    options: PipelineOptions,
    slot: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(&self, progress: &mut ProgressReporter) -> Result<BuildArtifact, BuildError> {
        let _slot = tokio::select! {
            guard = Arc::clone(&self.slot).lock_owned() => guard,
            _ = self.cancel.cancelled() => return Err(BuildError::Cancelled),
        };
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        // Preparing: nothing touches the disk until both tools are located.
        progress.report(BuildStage::Preparing, 0.0);
        self.converter.ensure_available()?;
        self.compiler.ensure_available()?;

        let build_dir = self.layout.build_dir();
        tokio::fs::create_dir_all(&build_dir).await?;
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("run-{}-", self.id))
            .tempdir_in(&build_dir)?;
        let fragments_dir = work_dir.path().join(FRAGMENTS_DIR);
        tokio::fs::create_dir_all(&fragments_dir).await?;
        tracing::info!(run = self.id, dir = %work_dir.path().display(), "Build started");

        let total = self.manifest.chapters.len();
        progress.report(BuildStage::Converting { done: 0, total }, 0.1);

        let fragments = self.convert_chapters(&fragments_dir, progress).await?;

        progress.report(BuildStage::Assembling, 0.6);
        let template = self.layout.template_path().is_file().then_some(TEMPLATE_IMPORT);
        let bibliography = self
            .layout
            .bibliography_path()
            .is_file()
            .then_some(BIBLIOGRAPHY_INCLUDE);
        let master = assembler::build_master(&self.manifest, &fragments, work_dir.path(), template, bibliography)?;

        progress.report(BuildStage::Compiling, 0.7);
        let staged = work_dir.path().join(&self.options.output_name);
        tokio::select! {
            result = self.compiler.compile(&master, &staged, self.layout.root()) => result?,
            _ = self.cancel.cancelled() => {
                self.compiler.cancel();
                return Err(BuildError::Cancelled);
            }
        }

        let artifact = self.layout.root().join(&self.options.output_name);
        tokio::fs::rename(&staged, &artifact).await?;

        Ok(BuildArtifact {
            path: artifact,
            chapters: total,
            finished_at: Utc::now(),
        })
    }

    /// Resolve and convert every chapter. Fragments come back in manifest
    /// order whatever order the conversions finish in.
    async fn convert_chapters(
        &self,
        fragments_dir: &std::path::Path,
        progress: &mut ProgressReporter,
    ) -> Result<Vec<PathBuf>, BuildError> {
        let chapters = self.manifest.chapters.clone();
        let resolver = ContentResolver::new(self.layout.clone());
        let resolved = tokio::task::spawn_blocking(move || {
            chapters
                .iter()
                .map(|chapter| (chapter.id.clone(), resolver.resolve_chapter(chapter)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(std::io::Error::other)?;

        let total = resolved.len();
        let jobs = resolved.into_iter().enumerate().map(|(index, (chapter_id, markdown))| {
            let converter = Arc::clone(&self.converter);
            let output = fragments_dir.join(format!("{:03}-{}.{}", index, chapter_id, FRAGMENT_EXTENSION));
            async move {
                tracing::debug!(chapter = %chapter_id, output = %output.display(), "Converting chapter");
                converter
                    .convert(&markdown, &output)
                    .await
                    .map(|()| output)
                    .map_err(|e| BuildError::from_conversion(&chapter_id, e))
            }
        });
        let mut conversions = stream::iter(jobs).buffered(self.options.parallelism.max(1));

        let mut fragments = Vec::with_capacity(total);
        loop {
            let next = tokio::select! {
                next = conversions.next() => next,
                _ = self.cancel.cancelled() => return Err(BuildError::Cancelled),
            };
            let Some(fragment) = next else { break };
            fragments.push(fragment?);

            let done = fragments.len();
            progress.report(
                BuildStage::Converting { done, total },
                0.1 + 0.5 * done as f32 / total as f32,
            );
        }

        Ok(fragments)
    }
}
