//! Synthesizes an SPDX document describing an OCI image index and every
//! platform-specific manifest it contains (the `index-image-sbom` binary).
//! Grounded on `index_image_sbom_script.py`.

use sha2::{Digest, Sha256};
use serde_json::{json, Value};
use snafu::{ensure, OptionExt};

use crate::error::{NotAnObjectSnafu, Result};
use srcbom_core::imageref::ImageReference;
use srcbom_core::purl::Purl;

const IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(Debug, Clone)]
struct IndexImage {
    repository: String,
    name: String,
    digest: String,
    tag: String,
    arch: Option<String>,
}

impl IndexImage {
    fn from_url_and_digest(image_url_and_tag: &str, digest: &str) -> Result<Self> {
        let parsed = ImageReference::parse(image_url_and_tag)?;
        Ok(IndexImage {
            repository: parsed.repository,
            name: parsed.name,
            digest: digest.to_string(),
            tag: parsed.tag.unwrap_or_default(),
            arch: None,
        })
    }

    fn digest_algo(&self) -> String {
        self.digest.split_once(':').map(|(a, _)| a).unwrap_or("").to_uppercase()
    }

    fn digest_hex(&self) -> &str {
        self.digest.split_once(':').map(|(_, h)| h).unwrap_or(&self.digest)
    }

    fn purl(&self, version: &str, arch: Option<&str>) -> Purl {
        let mut qualifiers = std::collections::BTreeMap::new();
        if let Some(arch) = arch {
            qualifiers.insert("arch".to_string(), arch.to_string());
        }
        qualifiers.insert("repository_url".to_string(), self.repository.clone());
        Purl {
            ty: "oci".to_string(),
            namespace: None,
            name: self.name.clone(),
            version: Some(version.to_string()),
            qualifiers,
            subpath: None,
        }
    }

    /// purls()[0] in the original — the per-arch manifest purl (tagged with
    /// `arch` and the index digest when both are known), else the plain
    /// manifest-digest purl. Order matters: `propose_spdx_id` hashes only
    /// the first one.
    fn purls(&self, index_digest: Option<&str>) -> Vec<String> {
        let mut out = Vec::new();
        if let (Some(index_digest), Some(arch)) = (index_digest, &self.arch) {
            out.push(self.purl(index_digest, Some(arch)).to_string_canonical());
        }
        out.push(self.purl(&self.digest, None).to_string_canonical());
        out
    }

    fn propose_spdx_id(&self) -> String {
        let first_purl = self.purls(None).remove(0);
        let hex = base16::encode_lower(&Sha256::digest(first_purl.as_bytes()));
        format!("SPDXRef-image-{}-{hex}", self.name)
    }
}

fn create_package(image: &IndexImage, spdxid: Option<&str>, image_index_digest: Option<&str>) -> Value {
    let name = match &image.arch {
        Some(arch) => format!("{}_{arch}", image.name),
        None => image.name.clone(),
    };
    let purls = image.purls(image_index_digest);
    json!({
        "SPDXID": spdxid.map(str::to_string).unwrap_or_else(|| image.propose_spdx_id()),
        "name": name,
        "versionInfo": image.tag,
        "supplier": "NOASSERTION",
        "downloadLocation": "NOASSERTION",
        "licenseDeclared": "NOASSERTION",
        "externalRefs": purls.into_iter().map(|purl| json!({
            "referenceCategory": "PACKAGE-MANAGER",
            "referenceType": "purl",
            "referenceLocator": purl,
        })).collect::<Vec<_>>(),
        "checksums": [{"algorithm": image.digest_algo(), "checksumValue": image.digest_hex()}],
    })
}

fn variant_of(spdxid: &str, related_spdxid: &str) -> Value {
    json!({
        "spdxElementId": spdxid,
        "relationshipType": "VARIANT_OF",
        "relatedSpdxElement": related_spdxid,
    })
}

/// `create_sbom`: `inspect_input` is the JSON produced by inspecting the
/// image index manifest (`{mediaType, manifests: [{mediaType, digest,
/// platform?}, ...]}`).
pub fn create_index_image_sbom(image_index_url: &str, image_index_digest: &str, inspect_input: &Value) -> Result<Value> {
    ensure!(
        inspect_input.get("mediaType").and_then(Value::as_str) == Some(IMAGE_INDEX_MEDIA_TYPE),
        NotAnObjectSnafu {
            what: "inspect input (expected a `buildah manifest inspect` image index document)"
        }
    );

    let index_image = IndexImage::from_url_and_digest(image_index_url, image_index_digest)?;
    let sbom_name = format!("{}@{}", index_image.repository, index_image.digest);

    let mut packages = vec![create_package(&index_image, Some("SPDXRef-image-index"), None)];
    let mut relationships = vec![json!({
        "spdxElementId": "SPDXRef-DOCUMENT",
        "relationshipType": "DESCRIBES",
        "relatedSpdxElement": "SPDXRef-image-index",
    })];

    let manifests = inspect_input
        .get("manifests")
        .and_then(Value::as_array)
        .context(NotAnObjectSnafu { what: "inspect input .manifests" })?;

    for manifest in manifests {
        if manifest.get("mediaType").and_then(Value::as_str) != Some(IMAGE_MANIFEST_MEDIA_TYPE) {
            continue;
        }
        let arch_image = IndexImage {
            arch: manifest.pointer("/platform/architecture").and_then(Value::as_str).map(str::to_string),
            name: index_image.name.clone(),
            digest: manifest
                .get("digest")
                .and_then(Value::as_str)
                .context(NotAnObjectSnafu { what: "manifest entry .digest" })?
                .to_string(),
            tag: index_image.tag.clone(),
            repository: index_image.repository.clone(),
        };
        packages.push(create_package(&arch_image, None, Some(&index_image.digest)));
        relationships.push(variant_of(&arch_image.propose_spdx_id(), "SPDXRef-image-index"));
    }

    Ok(json!({
        "spdxVersion": "SPDX-2.3",
        "dataLicense": "CC0-1.0",
        "documentNamespace": format!("https://konflux-ci.dev/spdxdocs/{}-{}-{}", index_image.name, index_image.tag, uuid::Uuid::new_v4()),
        "SPDXID": "SPDXRef-DOCUMENT",
        "creationInfo": {
            "created": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "creators": ["Tool: Konflux"],
            "licenseListVersion": "3.25",
        },
        "name": sbom_name,
        "packages": packages,
        "relationships": relationships,
    }))
}
