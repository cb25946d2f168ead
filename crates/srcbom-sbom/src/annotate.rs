//! SBOM annotators (§4.9): inject the built image as a component/root
//! package, and append base-image formulation entries.
//!
//! Grounded on `add_image_reference.py` (image-reference injection,
//! including the virtual-root redirection dance) and on §4.9's own
//! structured base-image-formulation description, which generalizes
//! `base_images_sbom_script.py`'s flat digest lists into a parsed
//! build-file stage graph.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::{json, Value};
use snafu::{ensure, OptionExt};

use crate::error::{NotAnObjectSnafu, Result};
use crate::merge::{detect_format, SbomFormat};
use srcbom_core::imageref::ImageReference;
use srcbom_core::purl::Purl;

/// The image being annotated onto an SBOM: a repository/tag pullspec plus
/// the manifest digest that pins it.
#[derive(Debug, Clone)]
pub struct Image {
    pub repository: String,
    pub name: String,
    pub tag: String,
    pub digest: String,
}

impl Image {
    pub fn from_url_and_digest(image_url_and_tag: &str, digest: &str) -> Result<Self> {
        let parsed = ImageReference::parse(image_url_and_tag)?;
        let tag = parsed.tag.unwrap_or_default();
        Ok(Image {
            repository: parsed.repository,
            name: parsed.name,
            tag,
            digest: digest.to_string(),
        })
    }

    fn digest_algo(&self) -> &str {
        self.digest.split_once(':').map(|(algo, _)| algo).unwrap_or("")
    }

    fn digest_hex(&self) -> &str {
        self.digest.split_once(':').map(|(_, hex)| hex).unwrap_or(&self.digest)
    }

    fn digest_algo_cyclonedx(&self) -> String {
        match self.digest_algo() {
            "sha256" => "SHA-256".to_string(),
            "sha512" => "SHA-512".to_string(),
            other => other.to_uppercase(),
        }
    }

    fn digest_algo_spdx(&self) -> String {
        self.digest_algo().to_uppercase()
    }

    pub fn purl(&self) -> Purl {
        let mut qualifiers = std::collections::BTreeMap::new();
        qualifiers.insert("repository_url".to_string(), self.repository.clone());
        Purl {
            ty: "oci".to_string(),
            namespace: None,
            name: self.name.clone(),
            version: Some(self.digest.clone()),
            qualifiers,
            subpath: None,
        }
    }
}

/// Extend `doc` with a reference to the image it describes. No-op fields
/// are format-specific: only SPDX documents get their `.name` rewritten, a
/// quirk of the upstream tooling preserved here rather than generalized.
pub fn add_image_reference(mut doc: Value, image: &Image) -> Result<Value> {
    match detect_format(&doc)? {
        SbomFormat::CycloneDx => add_image_component_cyclonedx(&mut doc, image)?,
        SbomFormat::Spdx => {
            add_image_package_spdx(&mut doc, image)?;
            doc["name"] = json!(format!("{}@{}", image.repository, image.digest));
        }
    }
    Ok(doc)
}

fn add_image_component_cyclonedx(doc: &mut Value, image: &Image) -> Result<()> {
    let component = json!({
        "type": "container",
        "name": image.name,
        "purl": image.purl().to_string_canonical(),
        "version": image.tag,
        "hashes": [{"alg": image.digest_algo_cyclonedx(), "content": image.digest_hex()}],
    });
    let components = doc
        .get_mut("components")
        .and_then(Value::as_array_mut)
        .context(NotAnObjectSnafu { what: "SBOM .components" })?;
    components.insert(0, component.clone());
    doc["metadata"]["component"] = component;
    Ok(())
}

const IMAGE_PACKAGE_SPDXID: &str = "SPDXRef-image";

fn is_virtual_root(package: &Value) -> bool {
    match package.get("name").and_then(Value::as_str) {
        Some(name) => name.is_empty() || name.starts_with('.'),
        None => true,
    }
}

fn add_image_package_spdx(doc: &mut Value, image: &Image) -> Result<()> {
    ensure!(doc.is_object(), NotAnObjectSnafu { what: "SBOM" });
    let doc_spdxid = doc
        .get("SPDXID")
        .and_then(Value::as_str)
        .context(NotAnObjectSnafu { what: "SBOM .SPDXID" })?
        .to_string();

    let package = json!({
        "SPDXID": IMAGE_PACKAGE_SPDXID,
        "name": image.name,
        "versionInfo": image.tag,
        "downloadLocation": "NOASSERTION",
        "licenseConcluded": "NOASSERTION",
        "supplier": "NOASSERTION",
        "externalRefs": [{
            "referenceLocator": image.purl().to_string_canonical(),
            "referenceType": "purl",
            "referenceCategory": "PACKAGE-MANAGER",
        }],
        "checksums": [{"algorithm": image.digest_algo_spdx(), "checksumValue": image.digest_hex()}],
    });

    redirect_current_roots_to_new_root(doc, &doc_spdxid, IMAGE_PACKAGE_SPDXID);

    let packages = doc
        .get_mut("packages")
        .and_then(Value::as_array_mut)
        .context(NotAnObjectSnafu { what: "SBOM .packages" })?;
    packages.insert(0, package);

    let relationships = doc
        .get_mut("relationships")
        .and_then(Value::as_array_mut)
        .context(NotAnObjectSnafu { what: "SBOM .relationships" })?;
    relationships.insert(
        0,
        json!({
            "spdxElementId": doc_spdxid,
            "relationshipType": "DESCRIBES",
            "relatedSpdxElement": IMAGE_PACKAGE_SPDXID,
        }),
    );
    Ok(())
}

/// For each `DESCRIBES` relationship from the document root: if the related
/// package is a virtual root, delete it and its describing relationship and
/// redirect every other relationship pointing at it to `new_root`;
/// otherwise rewrite `DESCRIBES` to `CONTAINS` with `new_root` as the
/// source, so `new_root` ends up containing what used to be the document
/// root(s).
fn redirect_current_roots_to_new_root(doc: &mut Value, doc_spdxid: &str, new_root: &str) {
    let relationships = match doc.get("relationships").and_then(Value::as_array) {
        Some(r) => r.clone(),
        None => return,
    };

    let describes_targets: Vec<String> = relationships
        .iter()
        .filter(|r| {
            r.get("spdxElementId").and_then(Value::as_str) == Some(doc_spdxid)
                && r.get("relationshipType").and_then(Value::as_str) == Some("DESCRIBES")
        })
        .filter_map(|r| r.get("relatedSpdxElement").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let mut virtual_roots = HashSet::new();
    for target in &describes_targets {
        let is_virtual = doc
            .get("packages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|p| p.get("SPDXID").and_then(Value::as_str) == Some(target.as_str()))
            .map(is_virtual_root)
            .unwrap_or(true);
        if is_virtual {
            virtual_roots.insert(target.clone());
        }
    }

    if let Some(packages) = doc.get_mut("packages").and_then(Value::as_array_mut) {
        packages.retain(|p| {
            p.get("SPDXID")
                .and_then(Value::as_str)
                .map(|id| !virtual_roots.contains(id))
                .unwrap_or(true)
        });
    }

    if let Some(relationships) = doc.get_mut("relationships").and_then(Value::as_array_mut) {
        relationships.retain(|r| {
            let related = r.get("relatedSpdxElement").and_then(Value::as_str);
            let is_virtual_describes = r.get("spdxElementId").and_then(Value::as_str) == Some(doc_spdxid)
                && r.get("relationshipType").and_then(Value::as_str) == Some("DESCRIBES")
                && related.map(|id| virtual_roots.contains(id)).unwrap_or(false);
            !is_virtual_describes
        });

        for relationship in relationships.iter_mut() {
            let element = relationship.get("spdxElementId").and_then(Value::as_str).map(str::to_string);
            let related = relationship.get("relatedSpdxElement").and_then(Value::as_str).map(str::to_string);

            if let Some(element) = &element {
                if virtual_roots.contains(element) {
                    relationship["spdxElementId"] = json!(new_root);
                }
            }
            if let Some(related) = &related {
                if virtual_roots.contains(related) {
                    relationship["relatedSpdxElement"] = json!(new_root);
                }
            }

            let is_root_describes = relationship.get("spdxElementId").and_then(Value::as_str) == Some(doc_spdxid)
                && relationship.get("relationshipType").and_then(Value::as_str) == Some("DESCRIBES")
                && related
                    .as_deref()
                    .map(|id| describes_targets.iter().any(|t| t == id) && !virtual_roots.contains(id))
                    .unwrap_or(false);
            if is_root_describes {
                relationship["spdxElementId"] = json!(new_root);
                relationship["relationshipType"] = json!("CONTAINS");
            }
        }
    }
}

// --- Base-image formulation (CycloneDX) -----------------------------------

#[derive(Debug, Deserialize)]
pub struct ParsedBuildFile {
    #[serde(rename = "Stages")]
    pub stages: Vec<ParsedStage>,
}

#[derive(Debug, Deserialize)]
pub struct ParsedStage {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "From")]
    pub from: FromSpec,
}

#[derive(Debug, Deserialize)]
pub struct FromSpec {
    #[serde(rename = "Image", default)]
    pub image: Option<String>,
    #[serde(rename = "Scratch", default)]
    pub scratch: Option<bool>,
    #[serde(rename = "Stage", default)]
    pub stage: Option<StageRef>,
}

#[derive(Debug, Deserialize)]
pub struct StageRef {
    #[serde(rename = "Named", default)]
    pub named: Option<String>,
    #[serde(rename = "Index", default)]
    pub index: Option<usize>,
}

fn is_pseudo_image_ref(r: &str) -> bool {
    r == "scratch" || r.starts_with("oci-archive:")
}

/// Walk `From.Stage` references back to the `From.Image` (or `From.Scratch`)
/// that ultimately backs stage `idx`.
fn resolve_stage_image(stages: &[ParsedStage], idx: usize) -> Option<String> {
    let stage = stages.get(idx)?;
    if stage.from.scratch == Some(true) {
        return None;
    }
    if let Some(image) = &stage.from.image {
        return Some(image.clone());
    }
    let stage_ref = stage.from.stage.as_ref()?;
    let target = if let Some(index) = stage_ref.index {
        index
    } else {
        let named = stage_ref.named.as_ref()?;
        stages.iter().position(|s| s.name.as_deref() == Some(named.as_str()))?
    };
    if target == idx {
        return None;
    }
    resolve_stage_image(stages, target)
}

const PROP_IS_BASE_IMAGE: &str = "konflux:container:is_base_image";
const PROP_IS_BUILDER_FOR_STAGE: &str = "konflux:container:is_builder_image:for_stage";

/// Append a `{components: [...]}` formulation entry describing every
/// non-pseudo, digest-resolved base/builder image stage.
pub fn add_base_image_formulation(
    mut doc: Value,
    build_file: &ParsedBuildFile,
    digests: &HashMap<String, String>,
) -> Result<Value> {
    ensure!(doc.is_object(), NotAnObjectSnafu { what: "SBOM" });

    let resolutions: Vec<Option<String>> = (0..build_file.stages.len())
        .map(|i| resolve_stage_image(&build_file.stages, i))
        .collect();

    let non_pseudo_indices: Vec<usize> = resolutions
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, Some(image) if !is_pseudo_image_ref(image)))
        .map(|(i, _)| i)
        .collect();
    let last_non_pseudo_idx = non_pseudo_indices.last().copied();

    let mut components: Vec<Value> = Vec::new();
    let mut index_by_purl: HashMap<String, usize> = HashMap::new();

    for &i in &non_pseudo_indices {
        let original_ref = resolutions[i].as_ref().expect("non-pseudo index has a resolved ref");
        let Some(resolved) = digests.get(original_ref) else {
            continue;
        };
        let parsed = ImageReference::parse(resolved)?;
        let digest = parsed
            .digest
            .clone()
            .context(NotAnObjectSnafu { what: "resolved base image digest" })?;
        let purl = Purl {
            ty: "oci".to_string(),
            namespace: None,
            name: parsed.name.clone(),
            version: Some(digest),
            qualifiers: std::collections::BTreeMap::from([("repository_url".to_string(), parsed.repository.clone())]),
            subpath: None,
        }
        .to_string_canonical();

        let property = if Some(i) == last_non_pseudo_idx {
            json!({"name": PROP_IS_BASE_IMAGE, "value": "true"})
        } else {
            json!({"name": PROP_IS_BUILDER_FOR_STAGE, "value": i.to_string()})
        };

        if let Some(&existing) = index_by_purl.get(&purl) {
            components[existing]["properties"].as_array_mut().unwrap().push(property);
        } else {
            index_by_purl.insert(purl.clone(), components.len());
            components.push(json!({
                "type": "container",
                "name": parsed.repository,
                "purl": purl,
                "properties": [property],
            }));
        }
    }

    if components.is_empty() {
        return Ok(doc);
    }

    let entry = json!({"components": components});
    match doc.get_mut("formulation").and_then(Value::as_array_mut) {
        Some(formulation) => formulation.push(entry),
        None => doc["formulation"] = json!([entry]),
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclonedx_image_reference_inserted_at_front() {
        let doc = json!({"bomFormat": "CycloneDX", "specVersion": "1.5", "components": [{"name": "existing"}], "metadata": {}});
        let image = Image::from_url_and_digest("quay.io/ns/app:v1", "sha256:deadbeef").unwrap();
        let updated = add_image_reference(doc, &image).unwrap();
        assert_eq!(updated["components"][0]["name"], "app");
        assert_eq!(updated["metadata"]["component"]["name"], "app");
        assert!(updated.get("name").is_none());
    }

    #[test]
    fn spdx_virtual_root_is_replaced() {
        let doc = json!({
            "spdxVersion": "SPDX-2.3",
            "SPDXID": "SPDXRef-DOCUMENT",
            "packages": [{"SPDXID": "SPDXRef-DocumentRoot-Unknown", "name": ""}],
            "relationships": [{"spdxElementId": "SPDXRef-DOCUMENT", "relationshipType": "DESCRIBES", "relatedSpdxElement": "SPDXRef-DocumentRoot-Unknown"}],
        });
        let image = Image::from_url_and_digest("quay.io/ns/app:v1", "sha256:deadbeef").unwrap();
        let updated = add_image_reference(doc, &image).unwrap();
        let packages = updated["packages"].as_array().unwrap();
        assert!(packages.iter().all(|p| p["SPDXID"] != "SPDXRef-DocumentRoot-Unknown"));
        assert_eq!(updated["name"], "quay.io/ns/app@sha256:deadbeef");
    }

    #[test]
    fn spdx_non_virtual_root_becomes_contains() {
        let doc = json!({
            "spdxVersion": "SPDX-2.3",
            "SPDXID": "SPDXRef-DOCUMENT",
            "packages": [{"SPDXID": "SPDXRef-rpm-foo", "name": "foo"}],
            "relationships": [{"spdxElementId": "SPDXRef-DOCUMENT", "relationshipType": "DESCRIBES", "relatedSpdxElement": "SPDXRef-rpm-foo"}],
        });
        let image = Image::from_url_and_digest("quay.io/ns/app:v1", "sha256:deadbeef").unwrap();
        let updated = add_image_reference(doc, &image).unwrap();
        let rels = updated["relationships"].as_array().unwrap();
        assert!(rels.iter().any(|r| r["spdxElementId"] == "SPDXRef-image"
            && r["relationshipType"] == "CONTAINS"
            && r["relatedSpdxElement"] == "SPDXRef-rpm-foo"));
        assert!(rels.iter().any(|r| r["relationshipType"] == "DESCRIBES" && r["relatedSpdxElement"] == "SPDXRef-image"));
    }

    #[test]
    fn base_image_formulation_tags_last_stage_as_base() {
        let build_file = ParsedBuildFile {
            stages: vec![
                ParsedStage { name: Some("builder".into()), from: FromSpec { image: Some("registry/builder:1".into()), scratch: None, stage: None } },
                ParsedStage { name: None, from: FromSpec { image: None, scratch: None, stage: Some(StageRef { named: Some("builder".into()), index: None }) } },
                ParsedStage { name: None, from: FromSpec { image: Some("registry/base:1".into()), scratch: None, stage: None } },
            ],
        };
        let digests = HashMap::from([
            ("registry/builder:1".to_string(), "registry/builder:1@sha256:aaaa".to_string()),
            ("registry/base:1".to_string(), "registry/base:1@sha256:bbbb".to_string()),
        ]);
        let doc = json!({"bomFormat": "CycloneDX", "specVersion": "1.5"});
        let updated = add_base_image_formulation(doc, &build_file, &digests).unwrap();
        let components = updated["formulation"][0]["components"].as_array().unwrap();
        assert_eq!(components.len(), 2);
        let base = components.iter().find(|c| c["name"] == "registry/base").unwrap();
        assert_eq!(base["properties"][0]["name"], PROP_IS_BASE_IMAGE);
    }

    #[test]
    fn base_image_formulation_skips_trailing_scratch_but_counts_it() {
        let build_file = ParsedBuildFile {
            stages: vec![
                ParsedStage { name: None, from: FromSpec { image: Some("registry/base:1".into()), scratch: None, stage: None } },
                ParsedStage { name: None, from: FromSpec { image: None, scratch: Some(true), stage: None } },
            ],
        };
        let digests = HashMap::from([("registry/base:1".to_string(), "registry/base:1@sha256:bbbb".to_string())]);
        let doc = json!({"bomFormat": "CycloneDX", "specVersion": "1.5"});
        let updated = add_base_image_formulation(doc, &build_file, &digests).unwrap();
        let components = updated["formulation"][0]["components"].as_array().unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0]["properties"][0]["name"], PROP_IS_BASE_IMAGE);
    }
}
