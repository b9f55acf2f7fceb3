//! The front-matter template every project starts with.
//!
//! A template is a Typst file defining [`FRONT_MATTER`]. The master document
//! imports it and calls it with the project metadata before the first chapter.

/// Name of the function a template must define.
pub const FRONT_MATTER: &str = "front-matter";

pub const DEFAULT_TEMPLATE: &str = r#"// Front matter for this thesis. Edit freely, but keep the signature:
// thesisflow calls `front-matter` with the project metadata before chapter one.
#let front-matter(title: "", author: "", candidate: "", supervisor: "", year: "") = {
  page(numbering: none, align(center + horizon)[
    #text(size: 24pt, weight: "bold")[#title]
    #v(2em)
    #if candidate != "" [#candidate] else [#author]
    #if supervisor != "" [
      #v(1em)
      Supervisor: #supervisor
    ]
    #if year != "" [
      #v(1em)
      #year
    ]
  ])
}
"#;
