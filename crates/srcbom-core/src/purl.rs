//! Package-URL (purl) parsing and serialization.
//!
//! Implements the subset of the [package-url spec] this system needs:
//! `type`, `namespace`, `name`, `version`, `qualifiers`, `subpath`.
//!
//! [package-url spec]: https://github.com/package-url/purl-spec

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use std::fmt;

/// Characters that are safe to leave unescaped in a purl component.
const PURL_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A parsed package-URL.
///
/// Equality is value equality over all fields; qualifier order is
/// insignificant for equality (it's a `BTreeMap`, keyed and ordered).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Purl {
    pub ty: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub qualifiers: BTreeMap<String, String>,
    pub subpath: Option<String>,
}

impl Purl {
    /// Parse a purl string. Unparsable input yields `None` — a purl is
    /// never load-bearing enough to abort a workflow over.
    pub fn from_string(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("pkg:").or_else(|| s.strip_prefix("PKG:"))?;

        let (rest, subpath) = match rest.split_once('#') {
            Some((left, right)) => (left, Some(decode_path(right))),
            None => (rest, None),
        };
        let subpath = subpath.filter(|s| !s.is_empty());

        let (rest, qualifiers) = match rest.split_once('?') {
            Some((left, right)) => (left, parse_qualifiers(right)),
            None => (rest, BTreeMap::new()),
        };

        let (rest, version) = match rsplit_once_respecting_scheme(rest) {
            Some((left, right)) => (left, Some(decode_component(right))),
            None => (rest, None),
        };

        let slash = rest.find('/')?;
        let ty = rest[..slash].to_ascii_lowercase();
        if ty.is_empty() {
            return None;
        }
        let path = &rest[slash + 1..];
        if path.is_empty() {
            return None;
        }
        let (namespace, name) = match path.rfind('/') {
            Some(idx) => (
                Some(decode_path(&path[..idx])),
                decode_component(&path[idx + 1..]),
            ),
            None => (None, decode_component(path)),
        };
        if name.is_empty() {
            return None;
        }

        Some(Purl {
            ty,
            namespace,
            name,
            version,
            qualifiers,
            subpath,
        })
    }

    /// Serialize back to a purl string. Deterministic: qualifier keys are
    /// sorted (guaranteed by `BTreeMap`) and reserved characters are
    /// percent-encoded.
    pub fn to_string_canonical(&self) -> String {
        let mut out = String::from("pkg:");
        out.push_str(&self.ty);
        out.push('/');
        if let Some(ns) = &self.namespace {
            for seg in ns.split('/').filter(|s| !s.is_empty()) {
                out.push_str(&encode(seg));
                out.push('/');
            }
        }
        out.push_str(&encode(&self.name));
        if let Some(version) = &self.version {
            out.push('@');
            out.push_str(&encode(version));
        }
        if !self.qualifiers.is_empty() {
            out.push('?');
            let mut first = true;
            for (k, v) in &self.qualifiers {
                if !first {
                    out.push('&');
                }
                first = false;
                out.push_str(k);
                out.push('=');
                out.push_str(&encode(v));
            }
        }
        if let Some(subpath) = &self.subpath {
            out.push('#');
            let segs: Vec<_> = subpath
                .split('/')
                .filter(|s| !s.is_empty())
                .map(encode)
                .collect();
            out.push_str(&segs.join("/"));
        }
        out
    }

    /// Return a new purl with the given mutation applied to a clone.
    /// Mirrors Python's `NamedTuple._replace(**kwargs)`.
    pub fn replace(&self, f: impl FnOnce(&mut Purl)) -> Purl {
        let mut p = self.clone();
        f(&mut p);
        p
    }

    /// A copy with qualifiers and subpath cleared — the "qualifierless key"
    /// building block (see `crate::sbom_item`).
    pub fn without_qualifiers_and_subpath(&self) -> Purl {
        self.replace(|p| {
            p.qualifiers.clear();
            p.subpath = None;
        })
    }
}

impl fmt::Display for Purl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_canonical())
    }
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, PURL_UNRESERVED).to_string()
}

fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn decode_path(s: &str) -> String {
    s.split('/')
        .map(decode_component)
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_qualifiers(s: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for pair in s.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => continue,
        };
        if v.is_empty() {
            continue;
        }
        map.insert(k.to_ascii_lowercase(), decode_component(v));
    }
    map
}

/// Split a `type/namespace/name@version` prefix at the rightmost `@` that
/// isn't part of something else. Purl versions never contain `@`, so a
/// plain rightmost split is correct here.
fn rsplit_once_respecting_scheme(s: &str) -> Option<(&str, &str)> {
    s.rfind('@').map(|idx| (&s[..idx], &s[idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_oci_purl_with_qualifier() {
        let s = "pkg:oci/app@sha256:DEAD?repository_url=reg/ns/app";
        let purl = Purl::from_string(s).unwrap();
        assert_eq!(purl.ty, "oci");
        assert_eq!(purl.name, "app");
        assert_eq!(purl.version.as_deref(), Some("sha256:DEAD"));
        assert_eq!(
            purl.qualifiers.get("repository_url").map(String::as_str),
            Some("reg/ns/app")
        );
        assert_eq!(purl.to_string_canonical(), s);
    }

    #[test]
    fn parses_namespace_and_subpath() {
        let purl = Purl::from_string("pkg:golang/github.com/x/y@v2.1.1#v2").unwrap();
        assert_eq!(purl.ty, "golang");
        assert_eq!(purl.namespace.as_deref(), Some("github.com/x"));
        assert_eq!(purl.name, "y");
        assert_eq!(purl.subpath.as_deref(), Some("v2"));
    }

    #[test]
    fn qualifier_keys_serialize_sorted() {
        let mut qualifiers = BTreeMap::new();
        qualifiers.insert("z".to_string(), "1".to_string());
        qualifiers.insert("a".to_string(), "2".to_string());
        let purl = Purl {
            ty: "generic".into(),
            namespace: None,
            name: "thing".into(),
            version: None,
            qualifiers,
            subpath: None,
        };
        assert_eq!(purl.to_string_canonical(), "pkg:generic/thing?a=2&z=1");
    }

    #[test]
    fn unparsable_input_yields_none() {
        assert!(Purl::from_string("not-a-purl").is_none());
        assert!(Purl::from_string("pkg:").is_none());
        assert!(Purl::from_string("pkg:type/").is_none());
    }

    #[test]
    fn without_qualifiers_and_subpath_clears_both() {
        let purl = Purl::from_string("pkg:npm/%40scope/name@1.0.0?vcs_url=x#sub/path").unwrap();
        let stripped = purl.without_qualifiers_and_subpath();
        assert!(stripped.qualifiers.is_empty());
        assert!(stripped.subpath.is_none());
        assert_eq!(stripped.namespace.as_deref(), Some("@scope"));
    }
}
