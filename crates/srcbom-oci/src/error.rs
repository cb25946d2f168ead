use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, OciError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OciError {
    #[snafu(display("reading {path:?}"))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("writing {path:?}"))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("removing {path:?}"))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("parsing JSON at {path:?}"))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("serializing JSON for {path:?}"))]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("blob {digest} not found under {root:?}"))]
    BlobNotFound { root: PathBuf, digest: String },

    #[snafu(display("unsupported digest algorithm in {digest:?}"))]
    UnsupportedDigest { digest: String },

    #[snafu(display("layer descriptor not found in manifest: {digest}"))]
    LayerNotFound { digest: String },

    #[snafu(display("missing index.json under {root:?}"))]
    MissingIndex { root: PathBuf },

    #[snafu(display("image layout has no manifests"))]
    EmptyIndex,

    #[snafu(display("layer tarball missing member: {what}"))]
    MissingMember { what: String },

    #[snafu(display("layer tarball symlink target {target:?} does not normalize to a blob path"))]
    BadSymlinkTarget { target: String },

    #[snafu(display("extra-source layer has no content member"))]
    EmptyExtraSource,

    #[snafu(display("reading layer tarball"))]
    Tar { source: std::io::Error },
}
