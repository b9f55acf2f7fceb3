//! On-disk layout of a project directory.
//!
//! ```text
//! <root>/
//! ├── .thesis_data/manifest.json
//! ├── .thesis_data/manifest.json.corrupt   kept after a reset
//! ├── .thesis_data/build/          per-run working directories
//! ├── chapters/<chapter.filename>
//! ├── chapters/<chapter.id>/<paragraph.filename>
//! ├── assets/
//! ├── template.typ                 front matter, optional
//! └── references.bib               optional
//! ```

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::models::{Chapter, Paragraph};

pub const DATA_DIR: &str = ".thesis_data";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const BUILD_DIR: &str = "build";
pub const CHAPTERS_DIR: &str = "chapters";
pub const ASSETS_DIR: &str = "assets";
pub const BIBLIOGRAPHY_FILE: &str = "references.bib";
pub const TEMPLATE_FILE: &str = "template.typ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir().join(MANIFEST_FILE)
    }

    pub fn corrupt_manifest_path(&self) -> PathBuf {
        self.data_dir().join(format!("{}.corrupt", MANIFEST_FILE))
    }

    pub fn build_dir(&self) -> PathBuf {
        self.data_dir().join(BUILD_DIR)
    }

    pub fn chapters_dir(&self) -> PathBuf {
        self.root.join(CHAPTERS_DIR)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub fn bibliography_path(&self) -> PathBuf {
        self.root.join(BIBLIOGRAPHY_FILE)
    }

    pub fn template_path(&self) -> PathBuf {
        self.root.join(TEMPLATE_FILE)
    }

    /// `chapters/<chapter.filename>`
    pub fn chapter_file(&self, chapter: &Chapter) -> Result<PathBuf> {
        ensure_file_name(&chapter.filename)?;
        Ok(self.chapters_dir().join(&chapter.filename))
    }

    /// `chapters/<chapter.id>/`
    pub fn chapter_dir(&self, chapter: &Chapter) -> Result<PathBuf> {
        ensure_file_name(&chapter.id)?;
        Ok(self.chapters_dir().join(&chapter.id))
    }

    /// `chapters/<chapter.id>/<paragraph.filename>`
    pub fn paragraph_file(&self, chapter: &Chapter, paragraph: &Paragraph) -> Result<PathBuf> {
        ensure_file_name(&paragraph.filename)?;
        Ok(self.chapter_dir(chapter)?.join(&paragraph.filename))
    }
}

/// Whether `name` is exactly one normal path component.
pub fn is_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn ensure_file_name(name: &str) -> Result<()> {
    if is_file_name(name) {
        Ok(())
    } else {
        Err(StoreError::UnsafePath(name.to_string()))
    }
}

/// Join a relative path onto `base` lexically, rejecting absolute paths and any
/// result that leaves `root`.
///
/// `..` is allowed as long as the result stays under `root`; `base` is expected
/// to be inside `root` already.
pub fn contained_join(root: &Path, base: &Path, relative: &str) -> Option<PathBuf> {
    let mut joined = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !joined.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if joined.starts_with(root) && joined != root {
        Some(joined)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_must_be_single_components() {
        assert!(is_file_name("chap_1.md"));
        assert!(!is_file_name("../secret.md"));
        assert!(!is_file_name("a/b.md"));
        assert!(!is_file_name("/etc/passwd"));
        assert!(!is_file_name(".."));
        assert!(!is_file_name(""));
    }

    #[test]
    fn contained_join_allows_sibling_directories() {
        let root = Path::new("/p");
        let base = Path::new("/p/chapters/a");
        assert_eq!(
            contained_join(root, base, "../b/x.md"),
            Some(PathBuf::from("/p/chapters/b/x.md"))
        );
    }

    #[test]
    fn contained_join_rejects_escape() {
        let root = Path::new("/p");
        let base = Path::new("/p/chapters");
        assert_eq!(contained_join(root, base, "../../etc/passwd"), None);
        assert_eq!(contained_join(root, base, "/etc/passwd"), None);
    }

    #[test]
    fn paragraph_file_rejects_traversal() {
        let layout = ProjectLayout::new("/p");
        let chapter = Chapter::new("a", "A", "a.md");
        let paragraph = Paragraph {
            id: "x".to_string(),
            title: String::new(),
            filename: "../../x.md".to_string(),
        };
        assert!(matches!(
            layout.paragraph_file(&chapter, &paragraph),
            Err(StoreError::UnsafePath(_))
        ));
    }
}
