use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::layout::{is_file_name, ProjectLayout, CHAPTERS_DIR};
use crate::models::*;

/// Namespace for ids given to paragraph files found on disk without a manifest entry.
const ORPHAN_NAMESPACE: Uuid = Uuid::from_u128(0x6f7a_1c2e_4d0b_5b8e_9a31_7c44_e2f0_b915);

/// Reads and writes `.thesis_data/manifest.json` for one project.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    layout: ProjectLayout,
}

impl ManifestStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn at(root: impl AsRef<Path>) -> Self {
        Self::new(ProjectLayout::new(root.as_ref()))
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Load and validate the manifest.
    ///
    /// Fails with [`StoreError::ManifestMissing`] if the file does not exist and
    /// [`StoreError::ManifestCorrupt`] if it is not a valid manifest. A corrupt
    /// manifest is never replaced here.
    pub fn load(&self) -> Result<ProjectManifest> {
        let path = self.layout.manifest_path();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ManifestMissing(path));
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = ProjectManifest::from_json(&json).map_err(|e| StoreError::ManifestCorrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        validate(&manifest).map_err(|e| StoreError::ManifestCorrupt {
            path,
            reason: e.to_string(),
        })?;

        tracing::debug!(
            root = %self.layout.root().display(),
            chapters = manifest.chapters.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Persist the manifest by writing a sibling temp file and renaming it over
    /// the target.
    pub fn save(&self, manifest: &ProjectManifest) -> Result<()> {
        validate(manifest)?;
        let json = manifest
            .to_json()
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

        let path = self.layout.manifest_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, json.as_bytes())?;

        tracing::debug!(path = %path.display(), "Saved manifest");
        Ok(())
    }

    /// Attach paragraph files found under `chapters/<id>/` that the manifest
    /// does not reference, then persist if anything was added.
    ///
    /// Files are visited in name order so the result is deterministic. Only
    /// `.md` files are considered; hidden files are skipped.
    pub fn reconcile_orphans(&self, mut manifest: ProjectManifest) -> Result<(ProjectManifest, bool)> {
        let mut changed = false;

        for chapter in &mut manifest.chapters {
            let dir = self.layout.chapter_dir(chapter)?;
            if !dir.is_dir() {
                continue;
            }

            for name in markdown_files(&dir)? {
                if chapter.references_file(&name) {
                    continue;
                }
                let id = orphan_id(chapter, &name);
                tracing::info!(chapter = %chapter.id, file = %name, id = %id, "Reattaching orphan paragraph");
                chapter.paragraphs.push(Paragraph {
                    id,
                    title: title_from_filename(&name),
                    filename: name,
                });
                changed = true;
            }
        }

        if changed {
            self.save(&manifest)?;
        }
        Ok((manifest, changed))
    }

    /// Replace the manifest with one rebuilt from the files on disk.
    ///
    /// Only call this once the user has agreed to discard a corrupt manifest.
    /// The old file is kept as `manifest.json.corrupt`. Every `.md` file directly
    /// under `chapters/` becomes a chapter, in name order, titled by its first
    /// `# ` heading; paragraph files are then reattached as orphans.
    pub fn reset(&self) -> Result<ProjectManifest> {
        let path = self.layout.manifest_path();
        if path.is_file() {
            fs::copy(&path, self.layout.corrupt_manifest_path())?;
        }

        let title = self
            .layout
            .root()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let mut manifest = ProjectManifest::new(title, "");

        let chapters_dir = self.layout.chapters_dir();
        if chapters_dir.is_dir() {
            for name in markdown_files(&chapters_dir)? {
                let id = recovered_chapter_id(&manifest, &name);
                let title = fs::read_to_string(chapters_dir.join(&name))
                    .ok()
                    .and_then(|body| first_heading(&body))
                    .unwrap_or_else(|| title_from_filename(&name));
                manifest.chapters.push(Chapter::new(id, title, name));
            }
        }

        self.save(&manifest)?;
        tracing::warn!(
            path = %path.display(),
            chapters = manifest.chapters.len(),
            "Replaced corrupt manifest"
        );

        let (manifest, _) = self.reconcile_orphans(manifest)?;
        Ok(manifest)
    }
}

/// Visible `.md` files directly inside `dir`, sorted by name.
fn markdown_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };
        if name.starts_with('.') || !name.ends_with(".md") || !is_file_name(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Write `contents` to a temp file next to `path`, flush it, and rename it into place.
///
/// Readers observe either the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent directory", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Reject manifests that break id uniqueness or point outside the project.
fn validate(manifest: &ProjectManifest) -> Result<()> {
    let mut chapter_ids = HashSet::new();
    for chapter in &manifest.chapters {
        if !is_file_name(&chapter.id) {
            return Err(StoreError::UnsafePath(chapter.id.clone()));
        }
        if !is_file_name(&chapter.filename) {
            return Err(StoreError::UnsafePath(chapter.filename.clone()));
        }
        if !chapter_ids.insert(chapter.id.as_str()) {
            return Err(StoreError::DuplicateId(chapter.id.clone()));
        }

        let mut paragraph_ids = HashSet::new();
        for paragraph in &chapter.paragraphs {
            if !is_file_name(&paragraph.filename) {
                return Err(StoreError::UnsafePath(paragraph.filename.clone()));
            }
            if !paragraph_ids.insert(paragraph.id.as_str()) {
                return Err(StoreError::DuplicateId(format!("{}/{}", chapter.id, paragraph.id)));
            }
        }
    }
    Ok(())
}

/// Name-based id for an orphan file: stable across reloads, and extended to
/// the full UUID if the short form is already taken in this chapter.
fn orphan_id(chapter: &Chapter, filename: &str) -> String {
    derived_id(&format!("{}/{}", chapter.id, filename), |id| chapter.paragraph(id).is_some())
}

/// `chap_<id>.md` keeps its id so `chapters/<id>/` still matches; any other
/// file gets a name-based one.
fn recovered_chapter_id(manifest: &ProjectManifest, filename: &str) -> String {
    let taken = |id: &str| manifest.chapter(id).is_some();
    let stem = filename.strip_suffix(".md").unwrap_or(filename);
    match stem.strip_prefix("chap_") {
        Some(id) if !id.is_empty() && is_file_name(id) && !taken(id) => id.to_string(),
        _ => derived_id(&format!("{}/{}", CHAPTERS_DIR, filename), taken),
    }
}

fn derived_id(key: &str, taken: impl Fn(&str) -> bool) -> String {
    let uuid = Uuid::new_v5(&ORPHAN_NAMESPACE, key.as_bytes());
    let full = uuid.simple().to_string();
    let short = full[..8].to_string();

    if !taken(&short) {
        return short;
    }
    if !taken(&full) {
        return full;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", full, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

/// `"My_New-Section.md"` -> `"My New Section"`
fn title_from_filename(filename: &str) -> String {
    let stem = filename.strip_suffix(".md").unwrap_or(filename);
    let title = stem
        .split(['_', '-'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        stem.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_ids_are_stable() {
        let chapter = Chapter::new("abc", "A", "abc.md");
        assert_eq!(orphan_id(&chapter, "x.md"), orphan_id(&chapter, "x.md"));
        assert_ne!(orphan_id(&chapter, "x.md"), orphan_id(&chapter, "y.md"));
        assert_eq!(orphan_id(&chapter, "x.md").len(), 8);
    }

    #[test]
    fn orphan_id_avoids_collisions() {
        let mut chapter = Chapter::new("abc", "A", "abc.md");
        let short = orphan_id(&chapter, "x.md");
        chapter.paragraphs.push(Paragraph {
            id: short.clone(),
            title: String::new(),
            filename: "other.md".to_string(),
        });
        let next = orphan_id(&chapter, "x.md");
        assert_ne!(next, short);
        assert!(next.starts_with(&short));
    }

    #[test]
    fn recovered_chapters_keep_their_ids() {
        let mut manifest = ProjectManifest::default();
        assert_eq!(recovered_chapter_id(&manifest, "chap_1a2b3c4d.md"), "1a2b3c4d");

        manifest.chapters.push(Chapter::new("1a2b3c4d", "A", "chap_1a2b3c4d.md"));
        let clash = recovered_chapter_id(&manifest, "chap_1a2b3c4d.md");
        assert_ne!(clash, "1a2b3c4d");
        assert_eq!(recovered_chapter_id(&manifest, "notes.md").len(), 8);
    }

    #[test]
    fn first_heading_skips_other_levels() {
        assert_eq!(first_heading("## Sub\n# Main \n"), Some("Main".to_string()));
        assert_eq!(first_heading("no heading"), None);
    }

    #[test]
    fn titles_come_from_file_names() {
        assert_eq!(title_from_filename("My_New_Section.md"), "My New Section");
        assert_eq!(title_from_filename("results-part-2.md"), "results part 2");
        assert_eq!(title_from_filename("_.md"), "_");
    }
}
