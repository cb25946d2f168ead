use snafu::Snafu;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistryError {
    #[snafu(display("spawning {tool:?}"))]
    Spawn { tool: String, source: std::io::Error },

    #[snafu(display("{tool:?} not found on PATH"))]
    NotFound { tool: String, source: which::Error },

    #[snafu(display("reading digest file {path:?}"))]
    DigestFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{op} {reference:?} exited non-zero: {stderr}"))]
    NonZeroExit {
        op: String,
        reference: String,
        stderr: String,
    },

    #[snafu(display("parsing JSON from {op} {reference:?}"))]
    Json {
        op: String,
        reference: String,
        source: serde_json::Error,
    },
}
