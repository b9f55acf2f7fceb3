//! Domain models for thesisflow.
//!
//! # Core Concepts
//!
//! - [`ProjectManifest`]: Title metadata plus the ordered chapter list. Persisted
//!   as `.thesis_data/manifest.json` and authoritative for document order.
//! - [`Chapter`]: A top-level body file under `chapters/` followed by its ordered
//!   [`Paragraph`]s.
//! - [`Paragraph`]: A leaf content file under `chapters/<chapter id>/`.
//! - [`SettingsPatch`]: Typed partial update of the manifest metadata.

mod chapter;
mod manifest;
mod settings;

pub use chapter::*;
pub use manifest::*;
pub use settings::*;
