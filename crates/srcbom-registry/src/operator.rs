//! Thin wrapper around `skopeo` (§4.4): four operations, each a single
//! `skopeo` invocation carrying `--retry-times`. Retry on transport
//! failures happens inside `skopeo` itself — that's what the flag is for —
//! so there is no retry loop here; a non-zero exit after `skopeo` has
//! already retried is simply reported as a failed operation.

use std::path::Path;

use serde_json::Value;
use snafu::{ensure, ResultExt};

use crate::error::{DigestFileSnafu, JsonSnafu, NonZeroExitSnafu, NotFoundSnafu, Result, SpawnSnafu};

/// Bounded retry count passed to `skopeo --retry-times` (§4.4).
pub const MAX_RETRY_TIMES: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub remove_signatures: bool,
    pub digest_file: Option<std::path::PathBuf>,
}

/// Talks to `skopeo` on `$PATH` by default; tests and callers that need a
/// stand-in binary can point it elsewhere with `with_binary`.
#[derive(Debug, Clone)]
pub struct RegistryOperator {
    binary: String,
}

impl Default for RegistryOperator {
    fn default() -> Self {
        RegistryOperator {
            binary: "skopeo".to_string(),
        }
    }
}

impl RegistryOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        RegistryOperator {
            binary: binary.into(),
        }
    }

    /// Resolve the binary on `$PATH` up front, so a missing `skopeo`
    /// surfaces as a clear startup error instead of a confusing spawn
    /// failure from the first operation attempted.
    pub fn ensure_available(&self) -> Result<()> {
        which::which(&self.binary).context(NotFoundSnafu {
            tool: self.binary.clone(),
        })?;
        Ok(())
    }

    /// `exists(ref)`: a non-zero exit (image absent, or a transport failure
    /// that survived `skopeo`'s own retries) is reported as `false`, not an
    /// error — only a failure to spawn `skopeo` itself propagates.
    pub fn exists(&self, reference: &str) -> Result<bool> {
        let output = self.run_unchecked(&[
            "inspect",
            "--raw",
            "--retry-times",
            &MAX_RETRY_TIMES.to_string(),
            &docker_uri(reference),
        ])?;
        Ok(output.status.success())
    }

    pub fn inspect_config(&self, reference: &str) -> Result<Value> {
        let output = self.run_checked(
            "inspect_config",
            reference,
            &[
                "inspect",
                "--config",
                "--retry-times",
                &MAX_RETRY_TIMES.to_string(),
                &docker_uri(reference),
            ],
        )?;
        serde_json::from_slice(&output.stdout).context(JsonSnafu {
            op: "inspect_config",
            reference: reference.to_string(),
        })
    }

    pub fn inspect_manifest_digest(&self, reference: &str) -> Result<String> {
        let output = self.run_checked(
            "inspect_manifest_digest",
            reference,
            &[
                "inspect",
                "--format",
                "{{.Digest}}",
                "--no-tags",
                "--retry-times",
                &MAX_RETRY_TIMES.to_string(),
                &docker_uri(reference),
            ],
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `copy(src, dest, ...)`: `src`/`dest` are full transport URIs
    /// (`docker://`, `oci:`, `dir:`) — passed through untouched.
    pub fn copy(&self, src: &str, dest: &str, opts: &CopyOptions) -> Result<()> {
        let mut args: Vec<String> = vec!["copy".to_string()];
        if opts.remove_signatures {
            args.push("--remove-signatures".to_string());
        }
        if let Some(digest_file) = &opts.digest_file {
            args.push("--digestfile".to_string());
            args.push(digest_file.display().to_string());
        }
        args.push("--retry-times".to_string());
        args.push(MAX_RETRY_TIMES.to_string());
        args.push(src.to_string());
        args.push(dest.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked("copy", &format!("{src} -> {dest}"), &arg_refs)?;
        Ok(())
    }

    /// Read back a digest file written by `copy`'s `digest_file` option.
    pub fn read_digest_file(&self, path: &Path) -> Result<String> {
        let contents = std::fs::read_to_string(path).context(DigestFileSnafu {
            path: path.to_path_buf(),
        })?;
        Ok(contents.trim().to_string())
    }

    fn run_unchecked(&self, args: &[&str]) -> Result<std::process::Output> {
        tracing::debug!(component = "registry", tool = %self.binary, args = ?args, "invoking skopeo");
        duct::cmd(self.binary.as_str(), args.iter().copied())
            .unchecked()
            .stdout_capture()
            .stderr_capture()
            .run()
            .context(SpawnSnafu {
                tool: self.binary.clone(),
            })
    }

    fn run_checked(&self, op: &str, reference: &str, args: &[&str]) -> Result<std::process::Output> {
        let output = self.run_unchecked(args)?;
        ensure!(
            output.status.success(),
            NonZeroExitSnafu {
                op: op.to_string(),
                reference: reference.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
        );
        Ok(output)
    }
}

fn docker_uri(reference: &str) -> String {
    if reference.contains("://") || reference.starts_with("dir:") || reference.starts_with("oci:") {
        reference.to_string()
    } else {
        format!("docker://{reference}")
    }
}
