//! A uniform view over CycloneDX components and SPDX packages.
//!
//! See Design Note 9.1: the dynamic-typed original represents both as
//! plain dicts behind a structural protocol; here that becomes a small
//! sum type carrying the raw `serde_json::Value` so re-serialization
//! preserves unknown fields.

use crate::error::{MultiplePurlsSnafu, NoPurlSnafu, Result};
use crate::purl::Purl;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum SbomItem {
    Cdx(Value),
    Spdx(Value),
}

impl SbomItem {
    pub fn id(&self) -> String {
        match self {
            SbomItem::Cdx(v) => v
                .get("bom-ref")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            SbomItem::Spdx(v) => v
                .get("SPDXID")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn name(&self) -> String {
        let v = self.raw();
        v.get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn version(&self) -> String {
        match self {
            SbomItem::Cdx(v) => v
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            SbomItem::Spdx(v) => v
                .get("versionInfo")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// `None` when absent. For SPDX, more than one `purl` external
    /// reference is an error — never silently pick one.
    pub fn purl(&self) -> Result<Option<Purl>> {
        match self {
            SbomItem::Cdx(v) => Ok(v
                .get("purl")
                .and_then(Value::as_str)
                .and_then(Purl::from_string)),
            SbomItem::Spdx(v) => {
                let purls: Vec<&str> = v
                    .get("externalRefs")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter(|r| r.get("referenceType").and_then(Value::as_str) == Some("purl"))
                    .filter_map(|r| r.get("referenceLocator").and_then(Value::as_str))
                    .collect();
                match purls.as_slice() {
                    [] => Ok(None),
                    [one] => Ok(Purl::from_string(one)),
                    _ => MultiplePurlsSnafu { id: self.id() }.fail(),
                }
            }
        }
    }

    pub fn unwrap(&self) -> &Value {
        self.raw()
    }

    pub fn into_inner(self) -> Value {
        match self {
            SbomItem::Cdx(v) | SbomItem::Spdx(v) => v,
        }
    }

    fn raw(&self) -> &Value {
        match self {
            SbomItem::Cdx(v) | SbomItem::Spdx(v) => v,
        }
    }
}

/// `"<name>@<version>"` when `name` is non-empty and doesn't look like a
/// local path, else the item's own id. Used by every key function below
/// as the no-purl fallback.
pub fn fallback_key(item: &SbomItem) -> String {
    let name = item.name();
    if !name.is_empty() && !name.starts_with('.') && !name.starts_with('/') {
        format!("{name}@{}", item.version())
    } else {
        item.id()
    }
}

/// Strip qualifiers and subpath from the purl and serialize; this is the
/// key cachi2-flavoured items are indexed by in a cross-scanner merge.
pub fn qualifierless_key(item: &SbomItem) -> Result<String> {
    match item.purl()? {
        Some(purl) => Ok(purl.without_qualifiers_and_subpath().to_string_canonical()),
        None => Ok(fallback_key(item)),
    }
}

/// Normalizes ecosystem-specific quirks so equivalent packages reported
/// slightly differently by a scanner still produce matching keys:
/// lowercase `name` for `pypi`, percent-encode `version` for `golang`, and
/// fold a golang version-shaped subpath (`v2`, `v3`, ...) into the module
/// name the way cachi2 already does, clearing the subpath afterwards.
pub fn normalized_key(item: &SbomItem) -> Result<String> {
    match item.purl()? {
        Some(purl) => {
            let mut purl = purl;
            if purl.ty == "pypi" {
                purl.name = purl.name.to_lowercase();
            }
            if purl.ty == "golang" {
                if let Some(version) = &purl.version {
                    purl.version = Some(
                        percent_encoding::utf8_percent_encode(
                            version,
                            percent_encoding::NON_ALPHANUMERIC,
                        )
                        .to_string(),
                    );
                }
                if let Some(subpath) = purl.subpath.take() {
                    if is_version_subpath(&subpath) {
                        purl.name = format!("{}/{}", purl.name, subpath);
                    } else {
                        purl.subpath = Some(subpath);
                    }
                }
            }
            Ok(purl.to_string_canonical())
        }
        None => Ok(fallback_key(item)),
    }
}

/// A cachi2 component must carry a purl; there's no fallback for it the
/// way there is for the generic `fallback_key` used elsewhere.
pub fn require_purl(item: &SbomItem) -> Result<Purl> {
    item.purl()?.ok_or_else(|| {
        NoPurlSnafu {
            name: item.name(),
            version: item.version(),
        }
        .build()
    })
}

/// `true` for purl subpaths that are actually a version Syft folded in as a
/// subpath instead (`v2`, `v3`, ...) — shared with the cross-scanner merge's
/// local-golang-replacement detection in `srcbom-sbom`.
pub fn is_version_subpath(subpath: &str) -> bool {
    subpath
        .strip_prefix('v')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
