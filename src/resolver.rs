//! Flattening of a chapter and its paragraphs into one markdown document.
//!
//! Text may contain `{{ include: <relative/path.md> }}` directives. A directive
//! is replaced by the referenced file's content, itself resolved recursively.
//! Problems never abort resolution; they become visible markers in the text so
//! the author can find them in the compiled document:
//!
//! - a chapter or paragraph file that does not exist: `content missing: <file>`
//! - a chapter or paragraph file name that is not a plain file name: `unsafe path: <file>`
//! - an include that points nowhere: `include not found: <path>`
//! - an include that leaves the project: `include rejected: <path>`
//! - nesting deeper than [`MAX_INCLUDE_DEPTH`]: the directive is kept verbatim
//!   behind an `include depth limit` marker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thesisflow_core::layout::contained_join;
use thesisflow_core::models::Chapter;
use thesisflow_core::ProjectLayout;

/// Nesting bound for include expansion.
pub const MAX_INCLUDE_DEPTH: usize = 5;

static INCLUDE_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*include:\s*([^}]+?)\s*\}\}").expect("include directive pattern is valid")
});

/// Resolves chapter content for one project. Only reads from disk.
#[derive(Debug, Clone)]
pub struct ContentResolver {
    layout: ProjectLayout,
}

impl ContentResolver {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// The chapter body followed by each paragraph, in manifest order, with
    /// includes expanded. Parts are separated by a blank line.
    pub fn resolve_chapter(&self, chapter: &Chapter) -> String {
        let mut parts = Vec::with_capacity(chapter.paragraphs.len() + 1);

        match self.layout.chapter_file(chapter) {
            Ok(path) => parts.push(self.resolve_file(&path, &chapter.filename)),
            Err(_) => parts.push(unsafe_path_marker(&chapter.filename)),
        }

        for paragraph in &chapter.paragraphs {
            match self.layout.paragraph_file(chapter, paragraph) {
                Ok(path) => parts.push(self.resolve_file(&path, &paragraph.filename)),
                Err(_) => parts.push(unsafe_path_marker(&paragraph.filename)),
            }
        }

        parts.join("\n\n")
    }

    fn resolve_file(&self, path: &Path, display_name: &str) -> String {
        match fs::read_to_string(path) {
            Ok(text) => {
                let base = path.parent().unwrap_or(self.layout.root());
                self.resolve_includes(&text, base, 0)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Content file unavailable");
                missing_marker(display_name)
            }
        }
    }

    /// Expand include directives in `text`, resolving paths against `base_dir`.
    ///
    /// A path is looked up relative to `base_dir` first, then relative to the
    /// `chapters/` directory, so chapter-relative paths keep working from
    /// inside paragraph directories. `depth` is the current nesting level;
    /// callers start at `0`.
    pub fn resolve_includes(&self, text: &str, base_dir: &Path, depth: usize) -> String {
        INCLUDE_DIRECTIVE
            .replace_all(text, |caps: &Captures| {
                let directive = &caps[0];
                let relative = caps[1].trim();

                if depth >= MAX_INCLUDE_DEPTH {
                    tracing::warn!(include = %relative, depth, "Include depth limit reached");
                    return format!(
                        "**[include depth limit ({}) reached]** {}",
                        MAX_INCLUDE_DEPTH, directive
                    );
                }

                let Some(candidates) = self.candidates(base_dir, relative) else {
                    tracing::warn!(include = %relative, "Include escapes the project");
                    return rejected_marker(relative);
                };

                match candidates.iter().find(|p| p.is_file()) {
                    Some(path) => match fs::read_to_string(path) {
                        Ok(included) => {
                            let next_base = path.parent().unwrap_or(base_dir);
                            self.resolve_includes(&included, next_base, depth + 1)
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Include unreadable");
                            not_found_marker(relative)
                        }
                    },
                    None => {
                        tracing::warn!(include = %relative, base = %base_dir.display(), "Include not found");
                        not_found_marker(relative)
                    }
                }
            })
            .into_owned()
    }

    /// Lookup order for an include path. `None` if the path escapes the project.
    fn candidates(&self, base_dir: &Path, relative: &str) -> Option<Vec<PathBuf>> {
        let root = self.layout.root();
        let primary = contained_join(root, base_dir, relative)?;

        let chapters = self.layout.chapters_dir();
        let mut candidates = vec![primary];
        if base_dir != chapters {
            if let Some(fallback) = contained_join(root, &chapters, relative) {
                if !candidates.contains(&fallback) {
                    candidates.push(fallback);
                }
            }
        }
        Some(candidates)
    }
}

fn missing_marker(filename: &str) -> String {
    format!("**[content missing: {}]**", filename)
}

fn unsafe_path_marker(filename: &str) -> String {
    format!("**[unsafe path: {}]**", filename)
}

fn not_found_marker(path: &str) -> String {
    format!("**[include not found: {}]**", path)
}

fn rejected_marker(path: &str) -> String {
    format!("**[include rejected: {}]**", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_pattern_tolerates_spacing() {
        let caps = INCLUDE_DIRECTIVE.captures("a {{include:x/y.md}} b").unwrap();
        assert_eq!(&caps[1], "x/y.md");

        let caps = INCLUDE_DIRECTIVE.captures("{{   include:   sub.md   }}").unwrap();
        assert_eq!(&caps[1], "sub.md");
    }

    #[test]
    fn ordinary_braces_are_left_alone() {
        let layout = ProjectLayout::new("/nonexistent");
        let resolver = ContentResolver::new(layout);
        let text = "{{ not an include }} and $x^{2}$";
        assert_eq!(resolver.resolve_includes(text, Path::new("/nonexistent/chapters"), 0), text);
    }
}
