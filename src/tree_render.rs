//! ASCII outline rendering for a project's document structure.

use std::path::Path;

use thesisflow_core::models::ProjectManifest;
use thesisflow_core::ProjectLayout;

const PRESENT: char = '●';
const MISSING: char = '○';

/// Render the manifest as an outline with a marker for whether each file exists.
///
/// Example output:
/// ```text
/// Quantum Widgets
/// ├── ● Chapter 1: Introduction
/// │   ├── ● Motivation
/// │   └── ○ Related Work
/// └── ● Chapter 2: Method
/// ```
pub fn render_outline(manifest: &ProjectManifest, root: &Path) -> String {
    let layout = ProjectLayout::new(root);
    let mut output = String::new();
    output.push_str(&manifest.title);
    output.push('\n');

    for (i, chapter) in manifest.chapters.iter().enumerate() {
        let is_last = i == manifest.chapters.len() - 1;
        let present = layout.chapter_file(chapter).is_ok_and(|p| p.is_file());
        push_line(&mut output, "", is_last, present, &chapter.title);

        let prefix = if is_last { "    " } else { "│   " };
        for (j, paragraph) in chapter.paragraphs.iter().enumerate() {
            let paragraph_last = j == chapter.paragraphs.len() - 1;
            let present = layout
                .paragraph_file(chapter, paragraph)
                .is_ok_and(|p| p.is_file());
            let title = if paragraph.title.is_empty() {
                &paragraph.filename
            } else {
                &paragraph.title
            };
            push_line(&mut output, prefix, paragraph_last, present, title);
        }
    }
    output
}

fn push_line(output: &mut String, prefix: &str, is_last: bool, present: bool, title: &str) {
    let branch = if is_last { "└── " } else { "├── " };
    output.push_str(prefix);
    output.push_str(branch);
    output.push(if present { PRESENT } else { MISSING });
    output.push(' ');
    output.push_str(title);
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use thesisflow_core::models::{Chapter, Paragraph};

    fn paragraph(id: &str, title: &str) -> Paragraph {
        Paragraph {
            id: id.to_string(),
            title: title.to_string(),
            filename: format!("{}.md", id),
        }
    }

    #[test]
    fn test_title_only() {
        let manifest = ProjectManifest::new("Empty", "A. Author");
        assert_eq!(render_outline(&manifest, Path::new("/nonexistent")), "Empty\n");
    }

    #[test]
    fn test_nested_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("chapters")).unwrap();
        std::fs::write(dir.path().join("chapters/c1.md"), "# One\n").unwrap();

        let mut manifest = ProjectManifest::new("Thesis", "A. Author");
        let mut first = Chapter::new("c1", "One", "c1.md");
        first.paragraphs = vec![paragraph("p1", "Motivation"), paragraph("p2", "")];
        manifest.chapters = vec![first, Chapter::new("c2", "Two", "c2.md")];

        let output = render_outline(&manifest, dir.path());
        let expected = "Thesis\n├── ● One\n│   ├── ○ Motivation\n│   └── ○ p2.md\n└── ○ Two\n";
        assert_eq!(output, expected);
    }
}
