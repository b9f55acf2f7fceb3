//! Master document generation.
//!
//! The master document is Typst markup: manifest metadata bound as string
//! variables, the front matter rendered from them, one `#include` per chapter
//! fragment in manifest order, and an optional bibliography. The output
//! depends only on its inputs so repeated builds of the same project produce
//! identical bytes.
//!
//! The front matter comes from the project's `template.typ` when there is one,
//! otherwise the default template is inlined.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thesisflow_core::models::ProjectManifest;
use thesisflow_core::template::{DEFAULT_TEMPLATE, FRONT_MATTER};

pub const MASTER_FILE: &str = "master.typ";

/// Metadata passed to the front-matter function, in call order.
const FRONT_MATTER_ARGS: [&str; 5] = ["title", "author", "candidate", "supervisor", "year"];

/// Render the master document. `fragments` are include paths relative to the
/// master file, one per chapter, already in manifest order. `template` is the
/// import path of a file defining the front-matter function.
pub fn render_master(
    manifest: &ProjectManifest,
    fragments: &[String],
    template: Option<&str>,
    bibliography: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str("// Generated by thesisflow. Changes are overwritten on the next build.\n\n");

    let fields = [
        ("title", &manifest.title),
        ("author", &manifest.author),
        ("candidate", &manifest.candidate),
        ("supervisor", &manifest.supervisor),
        ("year", &manifest.year),
        ("citation-style", &manifest.citation_style),
    ];
    for (name, value) in fields {
        let _ = writeln!(out, "#let {} = {}", name, string_literal(value));
    }
    out.push('\n');

    match template {
        Some(template) => {
            let _ = writeln!(out, "#import {}: {}", string_literal(template), FRONT_MATTER);
        }
        None => out.push_str(DEFAULT_TEMPLATE),
    }
    let args = FRONT_MATTER_ARGS
        .iter()
        .map(|name| format!("{}: {}", name, name))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "#{}({})\n", FRONT_MATTER, args);

    for (index, fragment) in fragments.iter().enumerate() {
        if let Some(chapter) = manifest.chapters.get(index) {
            let _ = writeln!(out, "// chapter {}", chapter.id);
        }
        let _ = writeln!(out, "#include {}", string_literal(fragment));
    }

    if let Some(bibliography) = bibliography {
        let _ = writeln!(
            out,
            "\n#bibliography({}, style: citation-style)",
            string_literal(bibliography)
        );
    }

    out
}

/// Write the master document into `work_dir` and return its path.
pub fn build_master(
    manifest: &ProjectManifest,
    fragments: &[PathBuf],
    work_dir: &Path,
    template: Option<&str>,
    bibliography: Option<&str>,
) -> std::io::Result<PathBuf> {
    let includes: Vec<String> = fragments
        .iter()
        .map(|path| {
            let relative = path.strip_prefix(work_dir).unwrap_or(path);
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();

    let master = work_dir.join(MASTER_FILE);
    fs::write(&master, render_master(manifest, &includes, template, bibliography))?;
    Ok(master)
}

/// Quote `value` as a Typst string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use thesisflow_core::models::Chapter;

    #[test]
    fn escapes_string_literals() {
        assert_eq!(string_literal("plain"), "\"plain\"");
        assert_eq!(string_literal("a \"quoted\" \\ path"), "\"a \\\"quoted\\\" \\\\ path\"");
        assert_eq!(string_literal("two\nlines"), "\"two\\nlines\"");
        assert_eq!(string_literal("bell\u{7}"), "\"bell\\u{7}\"");
    }

    #[test]
    fn metadata_cannot_break_out_of_the_literal() {
        let mut manifest = ProjectManifest::new("\"\n#panic(\"boom\")\n//", "A");
        manifest.chapters.push(Chapter::new("a", "A", "a.md"));
        let master = render_master(&manifest, &["chapters/a.typ".to_string()], None, None);

        assert!(!master.lines().any(|line| line.starts_with("#panic")));
        assert!(master.contains("#let title = \"\\\"\\n#panic(\\\"boom\\\")\\n//\""));
    }

    #[test]
    fn includes_follow_fragment_order() {
        let mut manifest = ProjectManifest::new("T", "A");
        manifest.chapters.push(Chapter::new("b", "B", "b.md"));
        manifest.chapters.push(Chapter::new("a", "A", "a.md"));
        let master = render_master(
            &manifest,
            &["chapters/000-b.typ".to_string(), "chapters/001-a.typ".to_string()],
            None,
            Some("/references.bib"),
        );

        let b = master.find("000-b.typ").unwrap();
        let a = master.find("001-a.typ").unwrap();
        assert!(b < a);
        assert!(master.ends_with("#bibliography(\"/references.bib\", style: citation-style)\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let manifest = ProjectManifest::new("T", "A");
        let fragments = vec!["x.typ".to_string()];
        assert_eq!(
            render_master(&manifest, &fragments, None, None),
            render_master(&manifest, &fragments, None, None)
        );
    }

    #[test]
    fn front_matter_uses_the_metadata_before_the_first_chapter() {
        let mut manifest = ProjectManifest::new("On Engines", "Ada");
        manifest.chapters.push(Chapter::new("a", "A", "a.md"));
        let master = render_master(&manifest, &["chapters/000-a.typ".to_string()], None, None);

        let call = "#front-matter(title: title, author: author, candidate: candidate, supervisor: supervisor, year: year)";
        let defined = master.find("#let front-matter(").unwrap();
        let called = master.find(call).unwrap();
        let first_chapter = master.find("#include").unwrap();
        assert!(master.find("#let year = ").unwrap() < defined);
        assert!(defined < called);
        assert!(called < first_chapter);
    }

    #[test]
    fn project_template_is_imported_instead_of_inlined() {
        let manifest = ProjectManifest::new("T", "A");
        let master = render_master(&manifest, &[], Some("/template.typ"), None);

        assert!(master.contains("#import \"/template.typ\": front-matter\n"));
        assert!(!master.contains("#let front-matter("));
        assert!(master.contains("#front-matter(title: title,"));
    }
}
