//! Shared data model for the source-container-builder / SBOM toolkit:
//! purl and image-reference parsing (C1), and the uniform SBOM item
//! abstraction (C7) that `srcbom-sbom` builds its merge and annotation
//! logic on top of.

pub mod error;
pub mod imageref;
pub mod purl;
pub mod sbom_item;

pub use error::{CoreError, Result};
pub use imageref::ImageReference;
pub use purl::Purl;
pub use sbom_item::SbomItem;
