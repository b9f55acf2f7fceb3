//! thesisflow: write a thesis as chapter and paragraph markdown files, build it
//! into one PDF through an external converter and typesetting compiler.

pub mod assembler;
pub mod autosave;
pub mod config;
pub mod pipeline;
pub mod resolver;
pub mod session;
pub mod toolchain;
pub mod tree_render;

pub use thesisflow_core::{layout, models, ManifestStore, Project, ProjectLayout, StoreError};
