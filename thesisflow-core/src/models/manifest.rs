use serde::{Deserialize, Serialize};

use super::chapter::Chapter;

/// Manifest schema version written by this build.
///
/// - `0`: unversioned manifests (no `version`, `citationStyle` or `paragraphs`)
/// - `1`: current
pub const MANIFEST_VERSION: u32 = 1;

/// Citation style used when a manifest does not name one.
pub const DEFAULT_CITATION_STYLE: &str = "ieee";

/// The authoritative description of a project's metadata and structure.
///
/// Every optional field has exactly one default, applied while deserializing:
///
/// | field           | default  |
/// |-----------------|----------|
/// | `version`       | `0`, then upgraded to [`MANIFEST_VERSION`] |
/// | `title` .. `year` | `""`   |
/// | `citationStyle` | `"ieee"` |
/// | `chapters`      | `[]`     |
///
/// Unknown fields are ignored so newer manifests still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectManifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub candidate: String,
    #[serde(default)]
    pub supervisor: String,
    #[serde(default)]
    pub year: String,
    #[serde(default = "default_citation_style", alias = "citation_style")]
    pub citation_style: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

fn default_citation_style() -> String {
    DEFAULT_CITATION_STYLE.to_string()
}

impl Default for ProjectManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            title: String::new(),
            author: String::new(),
            candidate: String::new(),
            supervisor: String::new(),
            year: String::new(),
            citation_style: default_citation_style(),
            chapters: Vec::new(),
        }
    }
}

impl ProjectManifest {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            ..Self::default()
        }
    }

    /// Parse manifest JSON and bring it to the current schema version.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut manifest: Self = serde_json::from_str(json)?;
        manifest.upgrade();
        Ok(manifest)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Field defaults are already applied by serde; older versions only need
    /// an empty citation style filled in.
    fn upgrade(&mut self) {
        if self.version < MANIFEST_VERSION {
            if self.citation_style.trim().is_empty() {
                self.citation_style = default_citation_style();
            }
            self.version = MANIFEST_VERSION;
        }
    }

    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    pub fn chapter_mut(&mut self, id: &str) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.id == id)
    }

    pub fn chapter_index(&self, id: &str) -> Option<usize> {
        self.chapters.iter().position(|c| c.id == id)
    }
}
