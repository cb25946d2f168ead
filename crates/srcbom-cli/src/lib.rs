//! Shared plumbing for the six command-line tools: JSON/YAML file IO,
//! tracing setup, and a top-level error type each binary's `main` reports
//! through `#[snafu::report]`.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("reading {path:?}"))]
    Read { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("writing {path:?}"))]
    Write { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("parsing JSON from {path:?}"))]
    Json { path: std::path::PathBuf, source: serde_json::Error },

    #[snafu(display("parsing YAML from {path:?}"))]
    Yaml { path: std::path::PathBuf, source: serde_yaml::Error },

    #[snafu(display("serializing JSON output"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("{what}"))]
    Usage { what: String },

    #[snafu(transparent)]
    Core { source: srcbom_core::CoreError },

    #[snafu(transparent)]
    Oci { source: srcbom_oci::OciError },

    #[snafu(transparent)]
    Registry { source: srcbom_registry::RegistryError },

    #[snafu(transparent)]
    Sbom { source: srcbom_sbom::SbomError },

    #[snafu(transparent)]
    Assemble { source: srcbom_assemble::AssembleError },
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    serde_json::from_str(&text).context(JsonSnafu { path })
}

pub fn read_json_as<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    serde_json::from_str(&text).context(JsonSnafu { path })
}

pub fn read_yaml_as<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    serde_yaml::from_str(&text).context(YamlSnafu { path })
}

/// Parses whitespace-separated `<original-ref> <resolved-ref-with-digest>`
/// lines (the `--base-images-digests` file format, §6).
pub fn read_space_separated_map(path: &Path) -> Result<std::collections::HashMap<String, String>> {
    let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    let mut map = std::collections::HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((original, resolved)) = line.split_once(char::is_whitespace) {
            map.insert(original.trim().to_string(), resolved.trim().to_string());
        }
    }
    Ok(map)
}

/// Splits a `--registry-allowlist`/`--base-images`-style value into its
/// newline-separated entries, dropping blank lines.
pub fn split_lines(value: &str) -> Vec<String> {
    value.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

pub fn write_json_to(path: &Path, value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context(SerializeSnafu)?;
    std::fs::write(path, text).context(WriteSnafu { path })
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context(SerializeSnafu)?);
    Ok(())
}

pub fn write_result_to(path: Option<&Path>, value: impl Serialize) -> Result<()> {
    let value = serde_json::to_value(value).context(SerializeSnafu)?;
    match path {
        Some(path) => write_json_to(path, &value),
        None => print_json(&value),
    }
}
