use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, AssembleError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AssembleError {
    #[snafu(display("spawning {tool:?}"))]
    Spawn { tool: String, source: std::io::Error },

    #[snafu(display("{tool:?} exited non-zero: {stderr}"))]
    NonZeroExit { tool: String, stderr: String },

    #[snafu(display("creating directory {path:?}"))]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("reading {path:?}"))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("copying {src:?} to {dest:?}"))]
    Copy {
        src: PathBuf,
        dest: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("walking {path:?}"))]
    WalkDir { path: PathBuf, source: walkdir::Error },

    #[snafu(display("{path:?} is not a git repository checkout we can read (missing HEAD info)"))]
    NotAGitRepo { path: PathBuf },

    #[snafu(display("parsing JSON from {what}"))]
    Json { what: String, source: serde_json::Error },

    #[snafu(transparent)]
    Core { source: srcbom_core::CoreError },

    #[snafu(transparent)]
    Oci { source: srcbom_oci::OciError },

    #[snafu(transparent)]
    Registry { source: srcbom_registry::RegistryError },
}
