use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::layout::ProjectLayout;
use crate::models::*;
use crate::store::{write_atomic, ManifestStore};
use crate::template::DEFAULT_TEMPLATE;

/// Title given to the chapter every new project starts with.
pub const DEFAULT_CHAPTER_TITLE: &str = "Chapter 1: Introduction";

/// An open project: its store plus the in-memory manifest.
///
/// Every structural operation is applied to a copy of the manifest, persisted,
/// and only then committed, so the in-memory state never runs ahead of disk.
#[derive(Debug, Clone)]
pub struct Project {
    store: ManifestStore,
    manifest: ProjectManifest,
}

impl Project {
    /// Scaffold a new project directory under `projects_root` with the default
    /// front-matter template.
    ///
    /// The directory name is `name` with everything except alphanumerics,
    /// spaces, `_` and `-` removed.
    pub fn create(projects_root: &Path, name: &str, author: &str) -> Result<Self> {
        Self::create_with_template(projects_root, name, author, None)
    }

    /// Like [`create`](Self::create), copying `template.typ` from `template` when given.
    pub fn create_with_template(
        projects_root: &Path,
        name: &str,
        author: &str,
        template: Option<&Path>,
    ) -> Result<Self> {
        let safe_name = sanitize(name);
        if safe_name.is_empty() {
            return Err(StoreError::UnsafePath(name.to_string()));
        }
        let root = projects_root.join(&safe_name);
        if root.exists() {
            return Err(StoreError::ProjectExists(root));
        }
        // Read before creating anything so a bad template leaves no directory behind.
        let template = match template {
            Some(path) => fs::read(path)?,
            None => DEFAULT_TEMPLATE.as_bytes().to_vec(),
        };

        let layout = ProjectLayout::new(&root);
        fs::create_dir_all(layout.data_dir())?;
        fs::create_dir_all(layout.assets_dir())?;
        fs::create_dir_all(layout.chapters_dir())?;
        write_atomic(&layout.template_path(), &template)?;

        let store = ManifestStore::new(layout);
        let manifest = ProjectManifest::new(name.trim(), author);
        store.save(&manifest)?;

        let mut project = Self { store, manifest };
        project.add_chapter(DEFAULT_CHAPTER_TITLE)?;

        tracing::info!(root = %root.display(), "Created project");
        Ok(project)
    }

    /// Load the manifest and reattach orphan paragraph files.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_or_reset(root, |_| false)
    }

    /// Open the project, rebuilding a corrupt manifest with
    /// [`ManifestStore::reset`] if `confirm` returns true for the load error.
    /// Any other error, or a refusal, is returned unchanged.
    pub fn open_or_reset(root: impl AsRef<Path>, confirm: impl FnOnce(&StoreError) -> bool) -> Result<Self> {
        let store = ManifestStore::at(root);
        let manifest = match store.load() {
            Ok(manifest) => manifest,
            Err(e) => {
                if !(e.is_recoverable_with_reset() && confirm(&e)) {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Resetting manifest");
                store.reset()?
            }
        };
        let (manifest, changed) = store.reconcile_orphans(manifest)?;
        if changed {
            tracing::info!(root = %store.layout().root().display(), "Reconciled orphan files on open");
        }
        Ok(Self { store, manifest })
    }

    pub fn root(&self) -> &Path {
        self.store.layout().root()
    }

    pub fn layout(&self) -> &ProjectLayout {
        self.store.layout()
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn manifest(&self) -> &ProjectManifest {
        &self.manifest
    }

    /// An owned copy for background readers such as the build pipeline.
    pub fn snapshot(&self) -> ProjectManifest {
        self.manifest.clone()
    }

    /// Persist the current manifest unchanged.
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.manifest)
    }

    pub fn reconcile_orphans(&mut self) -> Result<bool> {
        let (manifest, changed) = self.store.reconcile_orphans(self.manifest.clone())?;
        self.manifest = manifest;
        Ok(changed)
    }

    fn mutate<T>(&mut self, f: impl FnOnce(&mut ProjectManifest) -> Result<T>) -> Result<T> {
        let mut next = self.manifest.clone();
        let value = f(&mut next)?;
        self.store.save(&next)?;
        self.manifest = next;
        Ok(value)
    }

    // ============================================================
    // Settings
    // ============================================================

    pub fn apply_settings(&mut self, patch: SettingsPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(false);
        }
        self.mutate(|m| Ok(patch.apply_to(m)))
    }

    // ============================================================
    // Chapter operations
    // ============================================================

    pub fn add_chapter(&mut self, title: &str) -> Result<Chapter> {
        let id = fresh_id(|id| self.manifest.chapter(id).is_some());
        let chapter = Chapter::new(&id, title, format!("chap_{}.md", id));

        let path = self.layout().chapter_file(&chapter)?;
        fs::create_dir_all(self.layout().chapters_dir())?;
        write_atomic(&path, format!("# {}\n\n", title).as_bytes())?;

        let added = chapter.clone();
        if let Err(e) = self.mutate(|m| {
            m.chapters.push(added);
            Ok(())
        }) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        tracing::info!(chapter = %chapter.id, title = %title, "Added chapter");
        Ok(chapter)
    }

    pub fn rename_chapter(&mut self, id: &str, title: &str) -> Result<()> {
        self.mutate(|m| {
            let chapter = m
                .chapter_mut(id)
                .ok_or_else(|| StoreError::ChapterNotFound(id.to_string()))?;
            chapter.title = title.to_string();
            Ok(())
        })
    }

    /// Remove the chapter from the manifest, then delete its body file and
    /// paragraph directory.
    pub fn delete_chapter(&mut self, id: &str) -> Result<Chapter> {
        let removed = self.mutate(|m| {
            let index = m
                .chapter_index(id)
                .ok_or_else(|| StoreError::ChapterNotFound(id.to_string()))?;
            Ok(m.chapters.remove(index))
        })?;

        let body = self.layout().chapter_file(&removed)?;
        if body.exists() {
            if let Err(e) = fs::remove_file(&body) {
                tracing::warn!(path = %body.display(), error = %e, "Failed to remove chapter file");
            }
        }
        let dir = self.layout().chapter_dir(&removed)?;
        if dir.is_dir() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to remove chapter directory");
            }
        }

        tracing::info!(chapter = %id, "Deleted chapter");
        Ok(removed)
    }

    pub fn move_chapter(&mut self, id: &str, direction: MoveDirection) -> Result<bool> {
        let index = self
            .manifest
            .chapter_index(id)
            .ok_or_else(|| StoreError::ChapterNotFound(id.to_string()))?;
        let mut chapters = self.manifest.chapters.clone();
        if !direction.apply(&mut chapters, index) {
            return Ok(false);
        }
        self.mutate(|m| {
            m.chapters = chapters;
            Ok(true)
        })
    }

    pub fn read_chapter(&self, id: &str) -> Result<String> {
        let chapter = self.chapter(id)?;
        read_or_empty(&self.layout().chapter_file(chapter)?)
    }

    pub fn write_chapter(&self, id: &str, content: &str) -> Result<()> {
        let chapter = self.chapter(id)?;
        write_atomic(&self.layout().chapter_file(chapter)?, content.as_bytes())?;
        Ok(())
    }

    fn chapter(&self, id: &str) -> Result<&Chapter> {
        self.manifest
            .chapter(id)
            .ok_or_else(|| StoreError::ChapterNotFound(id.to_string()))
    }

    // ============================================================
    // Paragraph operations
    // ============================================================

    /// Create a paragraph file named after `title` and append it to the chapter.
    pub fn add_paragraph(&mut self, chapter_id: &str, title: &str) -> Result<Paragraph> {
        let chapter = self.chapter(chapter_id)?.clone();
        let dir = self.layout().chapter_dir(&chapter)?;
        fs::create_dir_all(&dir)?;

        let stem = match sanitize(title).replace(' ', "_") {
            s if s.is_empty() => "section".to_string(),
            s => s,
        };
        let mut filename = format!("{}.md", stem);
        while dir.join(&filename).exists() || chapter.references_file(&filename) {
            filename = format!("{}_{}.md", stem, &Uuid::new_v4().simple().to_string()[..4]);
        }

        let paragraph = Paragraph {
            id: fresh_id(|id| chapter.paragraph(id).is_some()),
            title: title.to_string(),
            filename,
        };
        let path = self.layout().paragraph_file(&chapter, &paragraph)?;
        write_atomic(&path, format!("## {}\n\n", title).as_bytes())?;

        let added = paragraph.clone();
        if let Err(e) = self.mutate(|m| {
            m.chapter_mut(chapter_id)
                .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()))?
                .paragraphs
                .push(added);
            Ok(())
        }) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        tracing::info!(chapter = %chapter_id, paragraph = %paragraph.id, "Added paragraph");
        Ok(paragraph)
    }

    pub fn rename_paragraph(&mut self, chapter_id: &str, paragraph_id: &str, title: &str) -> Result<()> {
        self.mutate(|m| {
            paragraph_mut(m, chapter_id, paragraph_id)?.title = title.to_string();
            Ok(())
        })
    }

    pub fn delete_paragraph(&mut self, chapter_id: &str, paragraph_id: &str) -> Result<Paragraph> {
        let removed = self.mutate(|m| {
            let chapter = m
                .chapter_mut(chapter_id)
                .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()))?;
            let index = chapter
                .paragraphs
                .iter()
                .position(|p| p.id == paragraph_id)
                .ok_or_else(|| not_found(chapter_id, paragraph_id))?;
            Ok(chapter.paragraphs.remove(index))
        })?;

        let chapter = self.chapter(chapter_id)?;
        let path = self.layout().paragraph_file(chapter, &removed)?;
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove paragraph file");
            }
        }
        Ok(removed)
    }

    pub fn move_paragraph(
        &mut self,
        chapter_id: &str,
        paragraph_id: &str,
        direction: MoveDirection,
    ) -> Result<bool> {
        let chapter = self.chapter(chapter_id)?;
        let index = chapter
            .paragraphs
            .iter()
            .position(|p| p.id == paragraph_id)
            .ok_or_else(|| not_found(chapter_id, paragraph_id))?;
        let mut paragraphs = chapter.paragraphs.clone();
        if !direction.apply(&mut paragraphs, index) {
            return Ok(false);
        }
        self.mutate(|m| {
            if let Some(chapter) = m.chapter_mut(chapter_id) {
                chapter.paragraphs = paragraphs;
            }
            Ok(true)
        })
    }

    pub fn read_paragraph(&self, chapter_id: &str, paragraph_id: &str) -> Result<String> {
        let (chapter, paragraph) = self.paragraph(chapter_id, paragraph_id)?;
        read_or_empty(&self.layout().paragraph_file(chapter, paragraph)?)
    }

    pub fn write_paragraph(&self, chapter_id: &str, paragraph_id: &str, content: &str) -> Result<()> {
        let (chapter, paragraph) = self.paragraph(chapter_id, paragraph_id)?;
        let path = self.layout().paragraph_file(chapter, paragraph)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, content.as_bytes())?;
        Ok(())
    }

    fn paragraph(&self, chapter_id: &str, paragraph_id: &str) -> Result<(&Chapter, &Paragraph)> {
        let chapter = self.chapter(chapter_id)?;
        let paragraph = chapter
            .paragraph(paragraph_id)
            .ok_or_else(|| not_found(chapter_id, paragraph_id))?;
        Ok((chapter, paragraph))
    }

    // ============================================================
    // Assets
    // ============================================================

    /// Copy a file into `assets/`, suffixing `_1`, `_2`, ... on name clashes.
    /// Returns the path to use from markdown, e.g. `assets/figure.png`.
    pub fn add_asset(&self, source: &Path) -> Result<String> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::UnsafePath(source.display().to_string()))?;
        let assets = self.layout().assets_dir();
        fs::create_dir_all(&assets)?;

        let mut dest = assets.join(name);
        let stem = Path::new(name).file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        let ext = Path::new(name).extension().and_then(|s| s.to_str());
        let mut counter = 1;
        while dest.exists() {
            let candidate = match ext {
                Some(ext) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", stem, counter),
            };
            dest = assets.join(candidate);
            counter += 1;
        }

        fs::copy(source, &dest)?;
        let file_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or(name);
        Ok(format!("{}/{}", crate::layout::ASSETS_DIR, file_name))
    }
}

/// Project directories under `projects_root` that contain a manifest, sorted by path.
pub fn list_projects(projects_root: &Path) -> Result<Vec<PathBuf>> {
    if !projects_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut projects = Vec::new();
    for entry in fs::read_dir(projects_root)? {
        let path = entry?.path();
        if path.is_dir() && ProjectLayout::new(&path).manifest_path().is_file() {
            projects.push(path);
        }
    }
    projects.sort();
    Ok(projects)
}

/// Remove a project directory. Refuses anything that is not strictly inside `projects_root`.
pub fn delete_project(projects_root: &Path, project: &Path) -> Result<()> {
    if !project.exists() {
        return Ok(());
    }
    let resolved = project.canonicalize()?;
    let root = projects_root.canonicalize()?;
    if !resolved.starts_with(&root) || resolved == root {
        return Err(StoreError::OutsideProjectsRoot(project.to_path_buf()));
    }
    fs::remove_dir_all(&resolved)?;
    tracing::info!(path = %resolved.display(), "Deleted project");
    Ok(())
}

fn paragraph_mut<'a>(
    manifest: &'a mut ProjectManifest,
    chapter_id: &str,
    paragraph_id: &str,
) -> Result<&'a mut Paragraph> {
    manifest
        .chapter_mut(chapter_id)
        .ok_or_else(|| StoreError::ChapterNotFound(chapter_id.to_string()))?
        .paragraph_mut(paragraph_id)
        .ok_or_else(|| not_found(chapter_id, paragraph_id))
}

fn not_found(chapter_id: &str, paragraph_id: &str) -> StoreError {
    StoreError::ParagraphNotFound {
        chapter: chapter_id.to_string(),
        paragraph: paragraph_id.to_string(),
    }
}

fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Eight hex characters from a random UUID, retried until `taken` says no.
fn fresh_id(taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        if !taken(&id) {
            return id;
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim()
        .to_string()
}
