//! Image reference parsing: `[registry[:port]/]name[:tag][@algo:hex]`.
//!
//! This is string-only — no network lookups happen here. See
//! `srcbom-registry` for the operations that actually talk to a registry.

use crate::error::{InvalidReferenceSnafu, Result};
use snafu::ensure;

/// A parsed image reference.
///
/// `repository` is the full `[registry/]path` portion (matching the way
/// the upstream scripts use the term): it includes the registry host when
/// one is present. `registry` is only populated when the first path
/// segment looks like a registry host (contains `.` or `:`, or is
/// `localhost`) — see Design Note 9.6: this is a strictly string-based
/// heuristic, never canonicalized, and a bare `name` with no such segment
/// yields `registry: None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference. A reference with neither tag nor digest is
    /// legal; most callers that need a digest fetch one via the registry
    /// operator instead of treating its absence here as an error.
    pub fn parse(s: &str) -> Result<Self> {
        ensure!(
            !s.is_empty(),
            InvalidReferenceSnafu {
                reference: s,
                reason: "empty reference",
            }
        );

        let (rest, digest) = match s.split_once('@') {
            Some((left, right)) => (left, Some(right.to_string())),
            None => (s, None),
        };

        let (repository, tag) = split_tag(rest);

        ensure!(
            !repository.is_empty(),
            InvalidReferenceSnafu {
                reference: s,
                reason: "missing repository",
            }
        );

        let name = repository
            .rsplit('/')
            .next()
            .unwrap_or(repository)
            .to_string();
        let registry = detect_registry(repository);

        Ok(ImageReference {
            registry,
            repository: repository.to_string(),
            name,
            tag,
            digest,
        })
    }

    /// `registry[:port]`, the form checked against an allow-list. `None`
    /// when no registry-looking segment is present.
    pub fn registry_host(&self) -> Option<&str> {
        self.registry.as_deref()
    }
}

/// Split `repository[:tag]` at the rightmost `:` that is not part of a
/// `host:port` prefix with no actual tag — i.e. a `:` immediately followed
/// (until the next `/` or end) by a `/` belongs to the host, not a tag.
fn split_tag(s: &str) -> (&str, Option<String>) {
    match s.rfind(':') {
        Some(idx) => {
            let after = &s[idx + 1..];
            if after.contains('/') {
                (s, None)
            } else {
                (&s[..idx], Some(after.to_string()))
            }
        }
        None => (s, None),
    }
}

fn detect_registry(repository: &str) -> Option<String> {
    let first = repository.split('/').next()?;
    if repository.contains('/') && (first.contains('.') || first.contains(':') || first == "localhost") {
        Some(first.to_string())
    } else {
        None
    }
}
