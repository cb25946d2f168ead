//! Typed, read-modify-save access to an on-disk OCI image layout (C2), and
//! a reader for the source-container layer tarballs the external "BSI"
//! layer builder produces (C3).

pub mod bsi;
pub mod config;
pub mod error;
pub mod index;
pub mod layout;
pub mod manifest;
pub mod model;

pub use bsi::{inspect_layer, BsiIdentity};
pub use config::Config;
pub use error::{OciError, Result};
pub use index::Index;
pub use layout::OciLayout;
pub use manifest::Manifest;
pub use model::{Descriptor, History, ImageConfiguration, ImageIndex, ImageManifest, RootFs};
