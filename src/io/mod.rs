//! Input files.

mod manifest;

pub use manifest::{ManifestEntry, load_manifest, parse_manifest};
