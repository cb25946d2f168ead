//! SBOM merging (§4.7 / §4.8): fold N syft-flavoured documents together by
//! apparent sameness, then optionally layer a single cachi2-flavoured
//! document on top, preferring its reports over syft's for anything it
//! covers.
//!
//! Grounded directly on `merge_sboms.py` — the key functions, drop rules and
//! relationship-rewrite logic below are a line-for-line port of that
//! script's `merge_by_apparent_sameness` / `merge_by_prefering_cachi2` /
//! `merge_cyclonedx_sboms` / `merge_spdx_sboms`.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::{json, Value};
use snafu::{ensure, OptionExt};

use crate::error::{CrossFormatMergeSnafu, NotAnObjectSnafu, Result, UnknownFormatSnafu, UnknownToolsShapeSnafu};
use srcbom_core::sbom_item::{fallback_key, is_version_subpath, SbomItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbomFormat {
    CycloneDx,
    Spdx,
}

pub fn detect_format(doc: &Value) -> Result<SbomFormat> {
    if doc.get("bomFormat").and_then(Value::as_str) == Some("CycloneDX") {
        Ok(SbomFormat::CycloneDx)
    } else if doc.get("spdxVersion").is_some() {
        Ok(SbomFormat::Spdx)
    } else {
        UnknownFormatSnafu.fail()
    }
}

type MergeComponents = dyn Fn(Vec<SbomItem>, Vec<SbomItem>) -> Result<Vec<SbomItem>>;

/// Key used by a general N-way merge of same-flavoured documents: the purl
/// string if there is one, else the name/version fallback.
fn apparent_sameness_key(item: &SbomItem) -> Result<String> {
    Ok(match item.purl()? {
        Some(purl) => purl.to_string_canonical(),
        None => fallback_key(item),
    })
}

pub fn merge_by_apparent_sameness(a: Vec<SbomItem>, b: Vec<SbomItem>) -> Result<Vec<SbomItem>> {
    dedupe_keeping_first(a.into_iter().chain(b), apparent_sameness_key)
}

/// `_unique_key_cachi2`: purl stripped of qualifiers and subpath, or the
/// name/version fallback.
fn cachi2_key(item: &SbomItem) -> Result<String> {
    match item.purl()? {
        Some(purl) => Ok(purl.without_qualifiers_and_subpath().to_string_canonical()),
        None => Ok(fallback_key(item)),
    }
}

/// `_unique_key_syft`: lowercase pypi names, percent-encoded golang
/// versions, and a golang version-shaped subpath folded back into the name.
fn syft_key(item: &SbomItem) -> Result<String> {
    let Some(mut purl) = item.purl()? else {
        return Ok(fallback_key(item));
    };
    if purl.ty == "pypi" {
        purl.name = purl.name.to_lowercase();
    }
    if purl.ty == "golang" {
        if let Some(version) = &purl.version {
            purl.version = Some(
                percent_encoding::utf8_percent_encode(version, percent_encoding::NON_ALPHANUMERIC).to_string(),
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

/// `_is_syft_local_golang_component`.
fn is_syft_local_golang_component(item: &SbomItem) -> Result<bool> {
    let Some(purl) = item.purl()? else {
        return Ok(false);
    };
    if purl.ty != "golang" {
        return Ok(false);
    }
    if let Some(subpath) = &purl.subpath {
        if !is_version_subpath(subpath) {
            return Ok(true);
        }
    }
    Ok(item.name().starts_with('.') || item.version() == "(devel)")
}

/// `_is_cachi2_non_registry_dependency`.
fn is_cachi2_non_registry_dependency(item: &SbomItem) -> Result<bool> {
    let Some(purl) = item.purl()? else {
        return Ok(false);
    };
    Ok((purl.ty == "pypi" || purl.ty == "npm")
        && (purl.qualifiers.contains_key("vcs_url") || purl.qualifiers.contains_key("download_url")))
}

/// `merge_by_prefering_cachi2`: drop any syft component that duplicates a
/// cachi2 one by key, by name (non-registry pip/npm), by npm local path, or
/// that is a local golang replacement, then append all cachi2 components.
pub fn merge_by_prefering_cachi2(syft: Vec<SbomItem>, cachi2: Vec<SbomItem>) -> Result<Vec<SbomItem>> {
    let mut cachi2_non_registry_names: HashSet<String> = HashSet::new();
    let mut cachi2_local_paths: HashSet<std::path::PathBuf> = HashSet::new();
    let mut cachi2_indexed: HashSet<String> = HashSet::new();

    for item in &cachi2 {
        if is_cachi2_non_registry_dependency(item)? {
            cachi2_non_registry_names.insert(item.name());
        }
        if let Some(purl) = item.purl()? {
            if let Some(subpath) = &purl.subpath {
                cachi2_local_paths.insert(Path::new(subpath).to_path_buf());
            }
        }
        cachi2_indexed.insert(cachi2_key(item)?);
    }

    let mut merged = Vec::with_capacity(syft.len() + cachi2.len());
    for item in syft {
        if is_syft_local_golang_component(&item)? {
            continue;
        }
        if cachi2_non_registry_names.contains(&item.name()) {
            continue;
        }
        if let Some(purl) = item.purl()? {
            if purl.ty == "npm" {
                let candidate = match &purl.namespace {
                    Some(ns) => Path::new(ns).join(&purl.name),
                    None => Path::new(&purl.name).to_path_buf(),
                };
                if cachi2_local_paths.contains(&candidate) {
                    continue;
                }
            }
        }
        if cachi2_indexed.contains(&syft_key(&item)?) {
            continue;
        }
        merged.push(item);
    }
    merged.extend(cachi2);
    Ok(merged)
}

fn dedupe_keeping_first(
    items: impl Iterator<Item = SbomItem>,
    key: impl Fn(&SbomItem) -> Result<String>,
) -> Result<Vec<SbomItem>> {
    let mut by_key: IndexMap<String, SbomItem> = IndexMap::new();
    for item in items {
        let k = key(&item)?;
        by_key.entry(k).or_insert(item);
    }
    Ok(by_key.into_values().collect())
}

fn array_field(doc: &Value, key: &str) -> Vec<Value> {
    doc.get(key).and_then(Value::as_array).cloned().unwrap_or_default()
}

const TOOL_SHARED_KEYS: [&str; 4] = ["name", "version", "hashes", "externalReferences"];

fn tool_to_component(tool: &Value) -> Value {
    let mut component = serde_json::Map::new();
    for key in TOOL_SHARED_KEYS {
        if let Some(v) = tool.get(key) {
            component.insert(key.to_string(), v.clone());
        }
    }
    if let Some(vendor) = tool.get("vendor") {
        component.insert("author".to_string(), vendor.clone());
    }
    component.insert("type".to_string(), json!("application"));
    Value::Object(component)
}

fn component_to_tool(component: &Value) -> Value {
    let mut tool = serde_json::Map::new();
    for key in TOOL_SHARED_KEYS {
        if let Some(v) = component.get(key) {
            tool.insert(key.to_string(), v.clone());
        }
    }
    if let Some(author) = component.get("author") {
        tool.insert("vendor".to_string(), author.clone());
    }
    Value::Object(tool)
}

/// Merge `.metadata.tools` of `right` into `left` in place. CycloneDX 1.4
/// uses a bare tool list there, 1.5 a `{components: [...]}` dict; whichever
/// shape `left` already uses wins, and `right`'s tools are converted to
/// match before merging.
fn merge_tools_metadata(left: &mut Value, right: &Value) -> Result<()> {
    let Some(tools_a) = left.pointer("/metadata/tools").cloned() else {
        return Ok(());
    };
    let tools_b = right.pointer("/metadata/tools").cloned().unwrap_or(Value::Null);

    if tools_a.is_object() {
        let components_a = tools_a
            .get("components")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let components_b: Vec<Value> = if let Some(comps) = tools_b.get("components").and_then(Value::as_array) {
            comps.clone()
        } else if let Some(list) = tools_b.as_array() {
            list.iter().map(tool_to_component).collect()
        } else {
            Vec::new()
        };

        let merged = merge_by_apparent_sameness(
            components_a.into_iter().map(SbomItem::Cdx).collect(),
            components_b.into_iter().map(SbomItem::Cdx).collect(),
        )?;
        let merged: Vec<Value> = merged.into_iter().map(SbomItem::into_inner).collect();
        left["metadata"]["tools"]["components"] = Value::Array(merged);
    } else if let Some(tools_a_list) = tools_a.as_array() {
        let tools_b_list: Vec<Value> = if let Some(comps) = tools_b.get("components").and_then(Value::as_array) {
            comps.iter().map(component_to_tool).collect()
        } else if let Some(list) = tools_b.as_array() {
            list.clone()
        } else {
            Vec::new()
        };

        let merged = dedupe_tool_list(tools_a_list.clone(), tools_b_list);
        left["metadata"]["tools"] = Value::Array(merged);
    } else {
        return UnknownToolsShapeSnafu.fail();
    }
    Ok(())
}

fn dedupe_tool_list(a: Vec<Value>, b: Vec<Value>) -> Vec<Value> {
    let mut by_key: IndexMap<(String, String), Value> = IndexMap::new();
    for tool in a.into_iter().chain(b) {
        let name = tool.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let version = tool.get("version").and_then(Value::as_str).unwrap_or_default().to_string();
        by_key.entry((name, version)).or_insert(tool);
    }
    by_key.into_values().collect()
}

fn merge_cyclonedx_sboms(mut left: Value, right: Value, merge_components: &MergeComponents) -> Result<Value> {
    ensure!(left.is_object(), NotAnObjectSnafu { what: "left SBOM" });
    ensure!(right.is_object(), NotAnObjectSnafu { what: "right SBOM" });

    let components_a: Vec<SbomItem> = array_field(&left, "components").into_iter().map(SbomItem::Cdx).collect();
    let components_b: Vec<SbomItem> = array_field(&right, "components").into_iter().map(SbomItem::Cdx).collect();

    let merged = merge_components(components_a, components_b)?;
    left["components"] = Value::Array(merged.into_iter().map(SbomItem::into_inner).collect());
    merge_tools_metadata(&mut left, &right)?;
    Ok(left)
}

/// Given an SPDXID from either document, decide its fate in the merged one:
/// the right document's root folds into the left's, ids that survived the
/// component merge (or are the left root) pass through unchanged, anything
/// else referred to a package that got dropped and the relationship goes
/// with it.
fn replace_spdxid<'a>(spdxid: &'a str, left_root: &'a str, right_root: &str, merged_ids: &HashSet<String>) -> Option<&'a str> {
    if spdxid == right_root {
        Some(left_root)
    } else if spdxid == left_root || merged_ids.contains(spdxid) {
        Some(spdxid)
    } else {
        None
    }
}

fn merge_spdx_relationships(
    left: &[Value],
    right: &[Value],
    left_root: &str,
    right_root: &str,
    merged_ids: &HashSet<String>,
) -> Vec<Value> {
    let mut merged = Vec::new();
    for rel in left.iter().chain(right) {
        let element = rel.get("spdxElementId").and_then(Value::as_str).unwrap_or_default();
        let related = rel.get("relatedSpdxElement").and_then(Value::as_str).unwrap_or_default();

        let element = replace_spdxid(element, left_root, right_root, merged_ids);
        let related = replace_spdxid(related, left_root, right_root, merged_ids);

        if let (Some(element), Some(related)) = (element, related) {
            let mut rel = rel.clone();
            rel["spdxElementId"] = json!(element);
            rel["relatedSpdxElement"] = json!(related);
            merged.push(rel);
        }
    }

    let mut seen = HashSet::new();
    merged.retain(|r| {
        let key = (
            r["spdxElementId"].as_str().unwrap_or_default().to_string(),
            r["relationshipType"].as_str().unwrap_or_default().to_string(),
            r["relatedSpdxElement"].as_str().unwrap_or_default().to_string(),
        );
        seen.insert(key)
    });
    merged
}

fn merge_spdx_creation_info(left: &Value, right: &Value) -> Value {
    let creators_a = left.get("creators").and_then(Value::as_array).cloned().unwrap_or_default();
    let creators_b = right.get("creators").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut seen = IndexMap::new();
    for creator in creators_a.into_iter().chain(creators_b) {
        let key = creator.as_str().unwrap_or_default().to_string();
        seen.entry(key).or_insert(creator);
    }

    let mut merged = left.clone();
    merged["creators"] = Value::Array(seen.into_values().collect());
    merged
}

fn merge_spdx_sboms(mut left: Value, right: Value, merge_components: &MergeComponents) -> Result<Value> {
    ensure!(left.is_object(), NotAnObjectSnafu { what: "left SBOM" });
    ensure!(right.is_object(), NotAnObjectSnafu { what: "right SBOM" });

    let packages_a: Vec<SbomItem> = array_field(&left, "packages").into_iter().map(SbomItem::Spdx).collect();
    let packages_b: Vec<SbomItem> = array_field(&right, "packages").into_iter().map(SbomItem::Spdx).collect();

    let merged_packages = merge_components(packages_a, packages_b)?;
    let merged_ids: HashSet<String> = merged_packages.iter().map(SbomItem::id).collect();
    let merged_packages_json: Vec<Value> = merged_packages.into_iter().map(SbomItem::into_inner).collect();

    let left_root = left
        .get("SPDXID")
        .and_then(Value::as_str)
        .context(NotAnObjectSnafu { what: "left SBOM SPDXID" })?
        .to_string();
    let right_root = right
        .get("SPDXID")
        .and_then(Value::as_str)
        .context(NotAnObjectSnafu { what: "right SBOM SPDXID" })?
        .to_string();

    let empty = Vec::new();
    let rel_a = left.get("relationships").and_then(Value::as_array).unwrap_or(&empty);
    let rel_b = right.get("relationships").and_then(Value::as_array).unwrap_or(&empty);
    let merged_relationships = merge_spdx_relationships(rel_a, rel_b, &left_root, &right_root, &merged_ids);

    let merged_creation_info = merge_spdx_creation_info(
        left.get("creationInfo").unwrap_or(&Value::Null),
        right.get("creationInfo").unwrap_or(&Value::Null),
    );

    left["packages"] = Value::Array(merged_packages_json);
    left["relationships"] = Value::Array(merged_relationships);
    left["creationInfo"] = merged_creation_info;
    if let Some(obj) = left.as_object_mut() {
        obj.remove("files");
    }
    Ok(left)
}

/// Merge two documents of the same format, dispatching on that format.
pub fn merge_sboms(left: Value, right: Value, merge_components: &MergeComponents) -> Result<Value> {
    let fmt_left = detect_format(&left)?;
    let fmt_right = detect_format(&right)?;
    ensure!(fmt_left == fmt_right, CrossFormatMergeSnafu);

    match fmt_left {
        SbomFormat::CycloneDx => merge_cyclonedx_sboms(left, right, merge_components),
        SbomFormat::Spdx => merge_spdx_sboms(left, right, merge_components),
    }
}

/// Fold N same-flavoured (syft-style) documents left to right.
pub fn merge_n_way(docs: Vec<Value>) -> Result<Value> {
    let mut docs = docs.into_iter();
    let first = docs.next().context(NotAnObjectSnafu { what: "sbom list (empty)" })?;
    docs.try_fold(first, |acc, doc| merge_sboms(acc, doc, &merge_by_apparent_sameness))
}

/// Merge N syft-flavoured documents together, then layer the single
/// cachi2-flavoured document on top, preferring its reports.
pub fn merge_with_cachi2(syft_docs: Vec<Value>, cachi2_doc: Value) -> Result<Value> {
    let syft_merged = merge_n_way(syft_docs)?;
    merge_sboms(syft_merged, cachi2_doc, &merge_by_prefering_cachi2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cdx(components: Value) -> Value {
        json!({
            "bomFormat": "CycloneDX",
            "specVersion": "1.5",
            "metadata": {"tools": {"components": []}},
            "components": components,
        })
    }

    #[test]
    fn apparent_sameness_dedupes_by_purl() {
        let left = cdx(json!([{"name": "a", "version": "1", "purl": "pkg:pypi/a@1"}]));
        let right = cdx(json!([
            {"name": "a", "version": "1", "purl": "pkg:pypi/a@1"},
            {"name": "b", "version": "2", "purl": "pkg:pypi/b@2"}
        ]));
        let merged = merge_sboms(left, right, &merge_by_apparent_sameness).unwrap();
        let comps = merged["components"].as_array().unwrap();
        assert_eq!(comps.len(), 2);
    }

    #[test]
    fn cross_format_merge_errors() {
        let cdx_doc = cdx(json!([]));
        let spdx_doc = json!({"spdxVersion": "SPDX-2.3", "SPDXID": "SPDXRef-DOCUMENT", "packages": [], "creationInfo": {"creators": []}});
        assert!(merge_sboms(cdx_doc, spdx_doc, &merge_by_apparent_sameness).is_err());
    }

    #[test]
    fn prefer_cachi2_drops_duplicate_by_key() {
        let syft = vec![
            SbomItem::Cdx(json!({"name": "a", "version": "1", "purl": "pkg:pypi/a@1"})),
            SbomItem::Cdx(json!({"name": "keep", "version": "1", "purl": "pkg:pypi/keep@1"})),
        ];
        let cachi2 = vec![SbomItem::Cdx(json!({"name": "a", "version": "1", "purl": "pkg:pypi/a@1?vcs_url=x"}))];
        let merged = merge_by_prefering_cachi2(syft, cachi2).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|c| c.name() == "keep"));
    }

    #[test]
    fn prefer_cachi2_drops_local_golang_replacement() {
        let syft = vec![SbomItem::Cdx(
            json!({"name": "dep", "version": "(devel)", "purl": "pkg:golang/github.com/x/dep@(devel)"}),
        )];
        let cachi2 = vec![];
        let merged = merge_by_prefering_cachi2(syft, cachi2).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn spdx_merge_rewrites_root_and_dedupes_relationships() {
        let left = json!({
            "spdxVersion": "SPDX-2.3",
            "SPDXID": "SPDXRef-DOCUMENT-A",
            "packages": [{"SPDXID": "SPDXRef-pkg-a", "name": "a"}],
            "relationships": [{"spdxElementId": "SPDXRef-DOCUMENT-A", "relationshipType": "DESCRIBES", "relatedSpdxElement": "SPDXRef-pkg-a"}],
            "creationInfo": {"creators": ["Tool: a"]},
        });
        let right = json!({
            "spdxVersion": "SPDX-2.3",
            "SPDXID": "SPDXRef-DOCUMENT-B",
            "packages": [{"SPDXID": "SPDXRef-pkg-b", "name": "b"}],
            "relationships": [{"spdxElementId": "SPDXRef-DOCUMENT-B", "relationshipType": "DESCRIBES", "relatedSpdxElement": "SPDXRef-pkg-b"}],
            "creationInfo": {"creators": ["Tool: a"]},
        });
        let merged = merge_sboms(left, right, &merge_by_apparent_sameness).unwrap();
        assert_eq!(merged["SPDXID"], "SPDXRef-DOCUMENT-A");
        assert_eq!(merged["packages"].as_array().unwrap().len(), 2);
        let rels = merged["relationships"].as_array().unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels.iter().all(|r| r["spdxElementId"] == "SPDXRef-DOCUMENT-A"));
        assert_eq!(merged["creationInfo"]["creators"].as_array().unwrap().len(), 1);
    }
}
