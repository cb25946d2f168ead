//! The source-image build pipeline: gathering app/prefetch sources (C5)
//! and orchestrating the external layer builder, parent-source merge, and
//! registry push around it (C6).

pub mod assemble;
pub mod error;
pub mod gather;

pub use assemble::{run, AssembleConfig, BuildResult, DEFAULT_BSI_PATH};
pub use error::{AssembleError, Result};
pub use gather::{gather_app_source, gather_prefetched_sources, GatherDirs};
