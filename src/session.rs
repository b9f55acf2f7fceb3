//! The editing session: the single owner of the open project.
//!
//! A [`Session`] is created once at startup and passed to whatever needs it.
//! All manifest mutations and file writes go through `&mut Session`, so they
//! are serialized by ownership. Background work only reads snapshots (the
//! build pipeline) or posts requests back to the session (autosave).

use std::path::{Path, PathBuf};

use thesisflow_core::{Project, StoreError};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::autosave::{AutosaveScheduler, DirtyFlag, SaveRequest};
use crate::config::AppConfig;
use crate::pipeline::{BuildHandle, Pipeline};

const REQUEST_QUEUE: usize = 8;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No project is open")]
    NoProject,

    #[error("No document is open")]
    NoDocument,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which file an open document is backed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    Chapter { chapter: String },
    Paragraph { chapter: String, paragraph: String },
}

#[derive(Debug, Clone)]
struct OpenDocument {
    target: DocumentRef,
    text: String,
}

/// Result of handling one autosave request.
#[derive(Debug)]
pub enum AutosaveOutcome {
    Saved,
    Clean,
    /// The write failed; the document stays dirty and the session carries on.
    Failed(SessionError),
}

pub struct Session {
    config: AppConfig,
    pipeline: Pipeline,
    project: Option<Project>,
    document: Option<OpenDocument>,
    dirty: DirtyFlag,
    requests_tx: mpsc::Sender<SaveRequest>,
    requests_rx: mpsc::Receiver<SaveRequest>,
    autosave: Option<AutosaveScheduler>,
}

impl Session {
    pub fn new(config: AppConfig) -> Self {
        let pipeline = Pipeline::from_config(&config);
        Self::with_pipeline(config, pipeline)
    }

    pub fn with_pipeline(config: AppConfig, pipeline: Pipeline) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE);
        Self {
            config,
            pipeline,
            project: None,
            document: None,
            dirty: DirtyFlag::default(),
            requests_tx,
            requests_rx,
            autosave: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    // ============================================================
    // Project lifecycle
    // ============================================================

    /// Open the project at `root`, saving any pending edit to the current one first.
    pub fn open_project(&mut self, root: impl AsRef<Path>) -> Result<&mut Project, SessionError> {
        self.open_project_or_reset(root, |_| false)
    }

    /// Like [`open_project`](Self::open_project), but a corrupt manifest is
    /// replaced by a rebuilt one when `confirm` agrees.
    pub fn open_project_or_reset(
        &mut self,
        root: impl AsRef<Path>,
        confirm: impl FnOnce(&StoreError) -> bool,
    ) -> Result<&mut Project, SessionError> {
        self.flush()?;
        let project = Project::open_or_reset(root, confirm)?;
        tracing::info!(root = %project.root().display(), "Opened project");
        self.document = None;
        self.dirty.clear();
        Ok(self.project.insert(project))
    }

    pub fn create_project(&mut self, name: &str, author: &str) -> Result<&mut Project, SessionError> {
        self.create_project_with_template(name, author, None)
    }

    /// Create a project whose front-matter template is copied from `template`.
    pub fn create_project_with_template(
        &mut self,
        name: &str,
        author: &str,
        template: Option<&Path>,
    ) -> Result<&mut Project, SessionError> {
        self.flush()?;
        let project = Project::create_with_template(&self.config.projects_root, name, author, template)?;
        self.document = None;
        self.dirty.clear();
        Ok(self.project.insert(project))
    }

    /// Stop autosave, save the open document, and drop the project.
    ///
    /// If the save fails the project stays open with the edit still pending.
    pub async fn close_project(&mut self) -> Result<(), SessionError> {
        self.stop_autosave().await;
        self.flush()?;
        self.pipeline.cancel();
        self.document = None;
        if let Some(project) = self.project.take() {
            tracing::info!(root = %project.root().display(), "Closed project");
        }
        Ok(())
    }

    pub fn project(&self) -> Result<&Project, SessionError> {
        self.project.as_ref().ok_or(SessionError::NoProject)
    }

    pub fn project_mut(&mut self) -> Result<&mut Project, SessionError> {
        self.project.as_mut().ok_or(SessionError::NoProject)
    }

    pub fn project_root(&self) -> Option<PathBuf> {
        self.project.as_ref().map(|p| p.root().to_path_buf())
    }

    // ============================================================
    // Documents
    // ============================================================

    /// Load a chapter or paragraph into the session's edit buffer. A pending
    /// edit to the previous document is saved first; if that fails nothing changes.
    pub fn open_document(&mut self, target: DocumentRef) -> Result<&str, SessionError> {
        self.flush()?;
        let project = self.project()?;
        let text = match &target {
            DocumentRef::Chapter { chapter } => project.read_chapter(chapter)?,
            DocumentRef::Paragraph { chapter, paragraph } => project.read_paragraph(chapter, paragraph)?,
        };
        self.dirty.clear();
        let document = self.document.insert(OpenDocument { target, text });
        Ok(&document.text)
    }

    pub fn edit_document(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        let document = self.document.as_mut().ok_or(SessionError::NoDocument)?;
        document.text = text.into();
        self.dirty.mark();
        Ok(())
    }

    pub fn document_text(&self) -> Option<&str> {
        self.document.as_ref().map(|d| d.text.as_str())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    /// Write the open document. The dirty flag is cleared only after the write succeeds.
    pub fn save(&mut self) -> Result<(), SessionError> {
        let document = self.document.as_ref().ok_or(SessionError::NoDocument)?;
        let project = self.project.as_ref().ok_or(SessionError::NoProject)?;
        match &document.target {
            DocumentRef::Chapter { chapter } => project.write_chapter(chapter, &document.text)?,
            DocumentRef::Paragraph { chapter, paragraph } => {
                project.write_paragraph(chapter, paragraph, &document.text)?
            }
        }
        self.dirty.clear();
        tracing::debug!(target = ?document.target, "Saved document");
        Ok(())
    }

    /// Save the open document if it has unsaved edits.
    fn flush(&mut self) -> Result<(), SessionError> {
        if self.dirty.is_dirty() && self.document.is_some() {
            self.save()?;
        }
        Ok(())
    }

    // ============================================================
    // Autosave
    // ============================================================

    /// Start the autosave timer using the configured interval. Restarts it if running.
    pub async fn start_autosave(&mut self) {
        self.stop_autosave().await;
        self.autosave = Some(AutosaveScheduler::start(
            self.config.autosave_interval(),
            self.dirty.clone(),
            self.requests_tx.clone(),
        ));
    }

    /// Stop the timer. Requests it posted before stopping are discarded, so no
    /// autosave happens after this returns.
    pub async fn stop_autosave(&mut self) {
        if let Some(autosave) = self.autosave.take() {
            autosave.stop().await;
        }
        while self.requests_rx.try_recv().is_ok() {}
    }

    /// Wait for the next request posted to the session.
    pub async fn next_request(&mut self) -> Option<SaveRequest> {
        self.requests_rx.recv().await
    }

    pub fn handle_request(&mut self, request: SaveRequest) -> AutosaveOutcome {
        match request {
            SaveRequest::Autosave => self.autosave_now(),
        }
    }

    fn autosave_now(&mut self) -> AutosaveOutcome {
        if !self.dirty.is_dirty() || self.document.is_none() {
            return AutosaveOutcome::Clean;
        }
        match self.save() {
            Ok(()) => AutosaveOutcome::Saved,
            Err(e) => {
                tracing::warn!(error = %e, "Autosave failed");
                AutosaveOutcome::Failed(e)
            }
        }
    }

    // ============================================================
    // Build
    // ============================================================

    /// Save pending edits, then start a build of a snapshot of the manifest.
    /// A build already running is superseded.
    pub fn build(&mut self) -> Result<BuildHandle, SessionError> {
        self.flush()?;
        let project = self.project()?;
        Ok(self
            .pipeline
            .run_async(project.snapshot(), project.root().to_path_buf()))
    }

    pub fn cancel_build(&self) {
        self.pipeline.cancel();
    }
}
