//! Project model and on-disk store for thesisflow.
//!
//! A project is a directory holding a JSON manifest under `.thesis_data/` and
//! the markdown sources it describes under `chapters/`. The manifest is the
//! single source of truth for document structure; the file tree is derived
//! from it.

mod error;
pub mod layout;
pub mod models;
mod project;
mod store;
pub mod template;

pub use error::{Result, StoreError};
pub use layout::ProjectLayout;
pub use project::{delete_project, list_projects, Project};
pub use store::{write_atomic, ManifestStore};
