//! Synthesizes an SBOM over a list of artefacts copied out of an OCI image
//! (the `sbom-for-oci-copy` binary). Grounded on
//! `sbom_for_oci_copy_task.py` — including its choice to leave SPDX output
//! unimplemented.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, SpdxNotImplementedSnafu};
use srcbom_core::purl::Purl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OciCopySbomType {
    CycloneDx,
    Spdx,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub source: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha256sum: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OciCopyManifest {
    pub artifacts: Vec<Artifact>,
}

fn to_purl(artifact: &Artifact) -> Purl {
    let mut qualifiers = std::collections::BTreeMap::new();
    qualifiers.insert("download_url".to_string(), artifact.source.clone());
    qualifiers.insert("checksum".to_string(), format!("sha256:{}", artifact.sha256sum));
    Purl {
        ty: "generic".to_string(),
        namespace: None,
        name: artifact.filename.clone(),
        version: None,
        qualifiers,
        subpath: None,
    }
}

fn to_cyclonedx_component(artifact: &Artifact) -> Value {
    json!({
        "type": "file",
        "name": artifact.filename,
        "purl": to_purl(artifact).to_string_canonical(),
        "hashes": [{"alg": "SHA-256", "content": artifact.sha256sum}],
        "externalReferences": [{"type": "distribution", "url": artifact.source}],
    })
}

pub fn to_cyclonedx_sbom(artifacts: &[Artifact]) -> Value {
    json!({
        "$schema": "http://cyclonedx.org/schema/bom-1.5.schema.json",
        "bomFormat": "CycloneDX",
        "specVersion": "1.5",
        "version": 1,
        "metadata": {},
        "components": artifacts.iter().map(to_cyclonedx_component).collect::<Vec<_>>(),
    })
}

/// `sbom_type == Spdx` always errs, matching the original script's
/// `NotImplementedError("SPDX not implemented")`.
pub fn build_oci_copy_sbom(manifest: &OciCopyManifest, sbom_type: OciCopySbomType) -> Result<Value> {
    match sbom_type {
        OciCopySbomType::CycloneDx => Ok(to_cyclonedx_sbom(&manifest.artifacts)),
        OciCopySbomType::Spdx => SpdxNotImplementedSnafu.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_file_component_per_artifact() {
        let manifest = OciCopyManifest {
            artifacts: vec![Artifact {
                source: "https://example.com/a.tar".to_string(),
                filename: "a.tar".to_string(),
                kind: "tar".to_string(),
                sha256sum: "deadbeef".to_string(),
            }],
        };
        let sbom = build_oci_copy_sbom(&manifest, OciCopySbomType::CycloneDx).unwrap();
        let components = sbom["components"].as_array().unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0]["name"], "a.tar");
        assert!(components[0]["purl"].as_str().unwrap().starts_with("pkg:generic/a.tar?"));
    }

    #[test]
    fn spdx_output_is_unimplemented() {
        let manifest = OciCopyManifest { artifacts: vec![] };
        assert!(build_oci_copy_sbom(&manifest, OciCopySbomType::Spdx).is_err());
    }
}
