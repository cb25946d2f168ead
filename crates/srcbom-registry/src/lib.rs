//! Registry operator (C4): `exists`, `inspect_config`,
//! `inspect_manifest_digest`, `copy`, each a bounded-retry `skopeo`
//! invocation. No transport URI parsing happens here beyond the
//! `docker://` prefix `exists`/`inspect_*` add for bare image references.

pub mod error;
pub mod operator;

pub use error::{RegistryError, Result};
pub use operator::{CopyOptions, RegistryOperator, MAX_RETRY_TIMES};
